//! 容错机制测试
//!
//! 退避计算使用 proptest 属性测试；首 token 重试使用暂停时钟的 tokio 测试

use crate::error::GatewayError;
use crate::resilience::{
    stream_with_first_token_retry, ByteStream, CancellationToken, FirstTokenPolicy, Retrier,
    RetryConfig, StreamConsumer, TimeoutKind,
};
use bytes::Bytes;
use futures::StreamExt;
use proptest::prelude::*;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn arb_retry_config() -> impl Strategy<Value = RetryConfig> {
    (1u32..=5u32, 1u64..=1000u64, 10u64..=60000u64).prop_map(
        |(max_retries, base_delay_ms, max_delay_ms)| {
            let max_delay_ms = max_delay_ms.max(base_delay_ms);
            RetryConfig::new(max_retries, base_delay_ms, max_delay_ms)
        },
    )
}

proptest! {
    /// 无抖动时退避时间单调不减
    #[test]
    fn prop_backoff_non_decreasing(config in arb_retry_config()) {
        let retrier = Retrier::new(config);
        let sequence = retrier.compute_backoff_sequence(0.0);
        for pair in sequence.windows(2) {
            prop_assert!(pair[0] <= pair[1]);
        }
    }

    /// 退避时间永远不超过最大延迟
    #[test]
    fn prop_backoff_max_cap(
        config in arb_retry_config(),
        attempt in 0u32..64,
        jitter in 0.0f64..1.0
    ) {
        let max = Duration::from_millis(config.max_delay_ms);
        let retrier = Retrier::new(config);
        prop_assert!(retrier.backoff_delay_with_jitter(attempt, jitter) <= max);
    }

    /// 抖动范围在 [0, base) 之内
    #[test]
    fn prop_backoff_jitter_range(
        config in arb_retry_config(),
        attempt in 0u32..4,
        jitter in 0.0f64..1.0
    ) {
        let base = config.base_delay_ms;
        let retrier = Retrier::new(config);
        let without = retrier.backoff_delay_with_jitter(attempt, 0.0);
        let with = retrier.backoff_delay_with_jitter(attempt, jitter);
        prop_assert!(with >= without);
        prop_assert!(with - without <= Duration::from_millis(base));
    }
}

/// 收集所有 chunk 文本的测试消费者
struct CollectingConsumer;

impl StreamConsumer for CollectingConsumer {
    type Output = String;

    fn on_chunk(&mut self, chunk: &[u8]) -> Vec<String> {
        vec![String::from_utf8_lossy(chunk).into_owned()]
    }

    fn on_end(&mut self) -> Vec<String> {
        vec!["[END]".to_string()]
    }

    fn on_error(&mut self, error: &GatewayError) -> String {
        format!("[ERROR] {}", error.error_type())
    }
}

fn policy() -> FirstTokenPolicy {
    FirstTokenPolicy {
        first_token_timeout: Duration::from_millis(100),
        max_retries: 2,
        read_timeout: Duration::from_millis(500),
    }
}

fn chunks(parts: &[&'static str]) -> ByteStream {
    let items: Vec<Result<Bytes, GatewayError>> =
        parts.iter().map(|p| Ok(Bytes::from_static(p.as_bytes()))).collect();
    Box::pin(futures::stream::iter(items))
}

fn never() -> ByteStream {
    Box::pin(futures::stream::pending())
}

#[tokio::test(start_paused = true)]
async fn test_first_token_arrives_without_retry() {
    let attempts = Arc::new(AtomicU32::new(0));
    let counter = attempts.clone();

    let stream = stream_with_first_token_retry(
        policy(),
        move || {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Ok(chunks(&["a", "b"])) }
        },
        CollectingConsumer,
        CancellationToken::new(),
    )
    .await
    .unwrap();

    let output: Vec<String> = stream.collect().await;
    assert_eq!(output, vec!["a", "b", "[END]"]);
    assert_eq!(attempts.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_first_token_timeout_retries_then_succeeds() {
    let attempts = Arc::new(AtomicU32::new(0));
    let counter = attempts.clone();

    let stream = stream_with_first_token_retry(
        policy(),
        move || {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Ok(never())
                } else {
                    Ok(chunks(&["late"]))
                }
            }
        },
        CollectingConsumer,
        CancellationToken::new(),
    )
    .await
    .unwrap();

    let output: Vec<String> = stream.collect().await;
    assert_eq!(output, vec!["late", "[END]"]);
    assert_eq!(attempts.load(Ordering::SeqCst), 3);
}

#[tokio::test(start_paused = true)]
async fn test_first_token_retries_exhausted() {
    let attempts = Arc::new(AtomicU32::new(0));
    let counter = attempts.clone();

    let result = stream_with_first_token_retry(
        policy(),
        move || {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Ok(never()) }
        },
        CollectingConsumer,
        CancellationToken::new(),
    )
    .await;

    match result {
        Err(GatewayError::FirstTokenTimeout { kind, attempts: n }) => {
            assert_eq!(kind, TimeoutKind::Read);
            assert_eq!(n, 3);
        }
        Err(other) => panic!("unexpected error: {other}"),
        Ok(_) => panic!("expected first token timeout"),
    }
    assert_eq!(attempts.load(Ordering::SeqCst), 3);
}

#[tokio::test(start_paused = true)]
async fn test_mid_stream_timeout_is_not_retried() {
    let attempts = Arc::new(AtomicU32::new(0));
    let counter = attempts.clone();

    let stream = stream_with_first_token_retry(
        policy(),
        move || {
            counter.fetch_add(1, Ordering::SeqCst);
            async {
                let head = futures::stream::iter(vec![Ok(Bytes::from_static(b"first"))]);
                let body: ByteStream = Box::pin(head.chain(futures::stream::pending()));
                Ok(body)
            }
        },
        CollectingConsumer,
        CancellationToken::new(),
    )
    .await
    .unwrap();

    let output: Vec<String> = stream.collect().await;
    assert_eq!(output, vec!["first", "[ERROR] timeout_error"]);
    assert_eq!(attempts.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_open_error_propagates_unchanged() {
    let result = stream_with_first_token_retry(
        policy(),
        || async {
            Err::<ByteStream, _>(GatewayError::UpstreamStatus {
                status: 400,
                body: "bad".into(),
            })
        },
        CollectingConsumer,
        CancellationToken::new(),
    )
    .await;

    assert!(matches!(
        result,
        Err(GatewayError::UpstreamStatus { status: 400, .. })
    ));
}

#[tokio::test(start_paused = true)]
async fn test_cancellation_ends_stream_silently() {
    let cancel = CancellationToken::new();

    let stream = stream_with_first_token_retry(
        policy(),
        || async {
            let head = futures::stream::iter(vec![Ok(Bytes::from_static(b"hello"))]);
            let body: ByteStream = Box::pin(head.chain(futures::stream::pending()));
            Ok(body)
        },
        CollectingConsumer,
        cancel.clone(),
    )
    .await
    .unwrap();

    let mut stream = stream;
    assert_eq!(stream.next().await.as_deref(), Some("hello"));
    cancel.cancel();
    assert_eq!(stream.next().await, None);
}

#[tokio::test(start_paused = true)]
async fn test_cancelled_before_open() {
    let cancel = CancellationToken::new();
    cancel.cancel();

    let result = stream_with_first_token_retry(
        policy(),
        || async { Ok(chunks(&["x"])) },
        CollectingConsumer,
        cancel,
    )
    .await;

    assert!(matches!(result, Err(GatewayError::Cancelled)));
}
