//! 重试策略
//!
//! 提供带指数退避和抖动的退避计算，以及可重试状态码判定。
//! 实际的重试循环在传输层中实现，因为 403 需要先强制刷新 Token 再重试。

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// 重试配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetryConfig {
    /// 最大重试次数（不含首次请求）
    pub max_retries: u32,
    /// 基础延迟（毫秒）
    pub base_delay_ms: u64,
    /// 最大延迟（毫秒）
    pub max_delay_ms: u64,
    /// 可退避重试的状态码（403 不在此列，由传输层强制刷新处理）
    pub retryable_codes: Vec<u16>,
}

/// 默认可重试状态码：429 与全部 5xx
fn default_retryable_codes() -> Vec<u16> {
    std::iter::once(429).chain(500..=599).collect()
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 1000,
            max_delay_ms: 30000,
            retryable_codes: default_retryable_codes(),
        }
    }
}

impl RetryConfig {
    /// 创建新的重试配置
    pub fn new(max_retries: u32, base_delay_ms: u64, max_delay_ms: u64) -> Self {
        Self {
            max_retries,
            base_delay_ms,
            max_delay_ms,
            retryable_codes: default_retryable_codes(),
        }
    }

    pub fn with_retryable_codes(mut self, codes: Vec<u16>) -> Self {
        self.retryable_codes = codes;
        self
    }

    /// 检查状态码是否可重试
    pub fn is_retryable(&self, status_code: u16) -> bool {
        self.retryable_codes.contains(&status_code)
    }

    /// 总尝试次数上限（包括首次请求）
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }
}

/// 重试器
#[derive(Debug, Clone)]
pub struct Retrier {
    config: RetryConfig,
}

impl Retrier {
    /// 创建新的重试器
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// 使用默认配置创建重试器
    pub fn with_defaults() -> Self {
        Self::new(RetryConfig::default())
    }

    /// 获取配置
    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// 检查状态码是否可重试
    pub fn is_retryable(&self, status_code: u16) -> bool {
        self.config.is_retryable(status_code)
    }

    /// 计算第 N 次重试的退避时间（指数退避 + 抖动）
    ///
    /// 公式: min(base_delay * 2^attempt + jitter, max_delay)
    /// 其中 jitter 是 [0, base_delay) 范围内的随机值
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        self.backoff_delay_with_jitter(attempt, rand_jitter_factor())
    }

    /// 计算退避时间（可指定抖动因子）
    ///
    /// jitter_factor 应在 [0.0, 1.0) 范围内
    pub fn backoff_delay_with_jitter(&self, attempt: u32, jitter_factor: f64) -> Duration {
        let base = self.config.base_delay_ms as f64;
        let max = self.config.max_delay_ms as f64;

        // 指数退避: base * 2^attempt
        let exponential = base * 2_f64.powi(attempt.min(30) as i32);

        // 抖动: [0, base) 范围内的随机值
        let jitter = base * jitter_factor.clamp(0.0, 1.0);

        let delay = (exponential + jitter).min(max);

        Duration::from_millis(delay as u64)
    }

    /// 计算整个重试序列的退避时间
    pub fn compute_backoff_sequence(&self, jitter_factor: f64) -> Vec<Duration> {
        (0..self.config.max_retries)
            .map(|attempt| self.backoff_delay_with_jitter(attempt, jitter_factor))
            .collect()
    }
}

/// 生成 [0.0, 1.0) 范围内的随机抖动因子
fn rand_jitter_factor() -> f64 {
    rand::thread_rng().gen_range(0.0..1.0)
}
