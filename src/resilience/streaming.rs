//! 流式请求的首 token 重试
//!
//! 打开上游流后在首 token 超时内等待第一个非空 chunk；超时则关闭该响应并从头重试，
//! 直到首 token 重试预算耗尽。收到首 token 后不再重试：之后的读取超时或传输错误
//! 交给消费者渲染为协议对应的错误事件。

use super::timeout::{CancellationToken, TimeoutConfig, TimeoutKind};
use crate::error::GatewayError;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

/// 上游字节流
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, GatewayError>> + Send>>;

/// 消费者输出流
pub type OutputStream<T> = Pin<Box<dyn Stream<Item = T> + Send>>;

/// 流消费者
///
/// 负责把上游字节转换为调用方协议的输出（通常是 SSE 帧）
pub trait StreamConsumer: Send {
    type Output: Send;

    /// 处理一个上游 chunk
    fn on_chunk(&mut self, chunk: &[u8]) -> Vec<Self::Output>;

    /// 上游流正常结束
    fn on_end(&mut self) -> Vec<Self::Output>;

    /// 首 token 之后发生的错误，渲染为协议对应的错误负载
    fn on_error(&mut self, error: &GatewayError) -> Self::Output;
}

/// 首 token 重试策略
#[derive(Debug, Clone, PartialEq)]
pub struct FirstTokenPolicy {
    pub first_token_timeout: Duration,
    pub max_retries: u32,
    pub read_timeout: Duration,
}

impl From<&TimeoutConfig> for FirstTokenPolicy {
    fn from(config: &TimeoutConfig) -> Self {
        Self {
            first_token_timeout: config.first_token_timeout(),
            max_retries: config.first_token_max_retries,
            read_timeout: config.streaming_read_timeout(),
        }
    }
}

/// 已收到首个 chunk 的流
pub struct PrimedStream {
    first: Option<Bytes>,
    inner: ByteStream,
}

impl PrimedStream {
    fn new(first: Option<Bytes>, inner: ByteStream) -> Self {
        Self { first, inner }
    }
}

impl Stream for PrimedStream {
    type Item = Result<Bytes, GatewayError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if let Some(first) = self.first.take() {
            return Poll::Ready(Some(Ok(first)));
        }
        self.inner.poll_next_unpin(cx)
    }
}

enum FirstChunk {
    Data(Bytes),
    Empty,
    Failed(GatewayError),
    TimedOut,
    Cancelled,
}

async fn wait_first_chunk(
    stream: &mut ByteStream,
    timeout: Duration,
    cancel: &CancellationToken,
) -> FirstChunk {
    let first_non_empty = async {
        loop {
            match stream.next().await {
                Some(Ok(chunk)) if chunk.is_empty() => continue,
                Some(Ok(chunk)) => return FirstChunk::Data(chunk),
                Some(Err(e)) => return FirstChunk::Failed(e),
                None => return FirstChunk::Empty,
            }
        }
    };

    tokio::select! {
        biased;
        _ = cancel.cancelled() => FirstChunk::Cancelled,
        result = tokio::time::timeout(timeout, first_non_empty) => {
            result.unwrap_or(FirstChunk::TimedOut)
        }
    }
}

/// 打开上游流并等待首个 token，超时则重试
pub async fn open_with_first_token_retry<F, Fut>(
    policy: &FirstTokenPolicy,
    open: &mut F,
    cancel: &CancellationToken,
) -> Result<PrimedStream, GatewayError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<ByteStream, GatewayError>>,
{
    let max_attempts = policy.max_retries.saturating_add(1);

    for attempt in 1..=max_attempts {
        if cancel.is_cancelled() {
            return Err(GatewayError::Cancelled);
        }

        let mut stream = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(GatewayError::Cancelled),
            opened = open() => opened?,
        };

        match wait_first_chunk(&mut stream, policy.first_token_timeout, cancel).await {
            FirstChunk::Data(chunk) => {
                if attempt > 1 {
                    tracing::info!("[STREAM] 第 {} 次尝试收到首个 token", attempt);
                }
                return Ok(PrimedStream::new(Some(chunk), stream));
            }
            FirstChunk::Empty => return Ok(PrimedStream::new(None, stream)),
            FirstChunk::Failed(e) => return Err(e),
            FirstChunk::Cancelled => {
                drop(stream);
                return Err(GatewayError::Cancelled);
            }
            FirstChunk::TimedOut => {
                tracing::warn!(
                    "[STREAM] 首 token 超时 ({}ms)，关闭响应并重试 ({}/{})",
                    policy.first_token_timeout.as_millis(),
                    attempt,
                    max_attempts
                );
                drop(stream);
            }
        }
    }

    tracing::error!("[STREAM] 首 token 重试耗尽: {} 次尝试", max_attempts);
    Err(GatewayError::FirstTokenTimeout {
        kind: TimeoutKind::Read,
        attempts: max_attempts,
    })
}

enum NextChunk {
    Data(Bytes),
    End,
    Failed(GatewayError),
    TimedOut,
    Cancelled,
}

/// 带首 token 重试的流式处理
///
/// 首 token 到达前的错误（包括首 token 重试耗尽）直接返回；
/// 之后的输出交由 `consumer` 生成。调用方取消时静默结束，不产生错误负载。
pub async fn stream_with_first_token_retry<F, Fut, C>(
    policy: FirstTokenPolicy,
    mut open: F,
    consumer: C,
    cancel: CancellationToken,
) -> Result<OutputStream<C::Output>, GatewayError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<ByteStream, GatewayError>>,
    C: StreamConsumer + 'static,
    C::Output: 'static,
{
    let primed = open_with_first_token_retry(&policy, &mut open, &cancel).await?;
    let read_timeout = policy.read_timeout;

    let output = async_stream::stream! {
        let mut consumer = consumer;
        let mut body = primed;

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => NextChunk::Cancelled,
                result = tokio::time::timeout(read_timeout, body.next()) => match result {
                    Ok(Some(Ok(chunk))) => NextChunk::Data(chunk),
                    Ok(Some(Err(e))) => NextChunk::Failed(e),
                    Ok(None) => NextChunk::End,
                    Err(_) => NextChunk::TimedOut,
                },
            };

            match next {
                NextChunk::Data(chunk) => {
                    for item in consumer.on_chunk(&chunk) {
                        yield item;
                    }
                }
                NextChunk::End => break,
                NextChunk::Cancelled => {
                    tracing::debug!("[STREAM] 调用方已断开，关闭上游响应");
                    return;
                }
                NextChunk::Failed(e) => {
                    tracing::error!("[STREAM] 流式传输中断: {}", e);
                    yield consumer.on_error(&e);
                    return;
                }
                NextChunk::TimedOut => {
                    let e = GatewayError::StreamTimeout {
                        kind: TimeoutKind::Read,
                        timeout_ms: read_timeout.as_millis() as u64,
                    };
                    tracing::error!("[STREAM] {}", e);
                    yield consumer.on_error(&e);
                    return;
                }
            }
        }

        for item in consumer.on_end() {
            yield item;
        }
    };

    Ok(Box::pin(output))
}
