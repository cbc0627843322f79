//! 超时配置与取消令牌
//!
//! 非流式请求使用统一的请求超时；流式请求区分连接超时、首 token 超时
//! 和流式读取超时，首 token 超时拥有独立的（更小的）重试预算。

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// 超时类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeoutKind {
    /// 建立连接超时
    Connect,
    /// 等待数据超时
    Read,
}

impl std::fmt::Display for TimeoutKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TimeoutKind::Connect => write!(f, "connect"),
            TimeoutKind::Read => write!(f, "read"),
        }
    }
}

/// 超时配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TimeoutConfig {
    /// 非流式请求的统一超时（毫秒）
    pub request_timeout_ms: u64,
    /// 流式请求的连接超时（毫秒）
    pub connect_timeout_ms: u64,
    /// 等待首个 token 的超时（毫秒）
    pub first_token_timeout_ms: u64,
    /// 首 token 超时的重试次数
    pub first_token_max_retries: u32,
    /// 收到首个 token 后，两个 chunk 之间允许的最大间隔（毫秒）
    pub streaming_read_timeout_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: 300_000,
            connect_timeout_ms: 30_000,
            first_token_timeout_ms: 15_000,
            first_token_max_retries: 3,
            streaming_read_timeout_ms: 300_000,
        }
    }
}

impl TimeoutConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn first_token_timeout(&self) -> Duration {
        Duration::from_millis(self.first_token_timeout_ms)
    }

    pub fn streaming_read_timeout(&self) -> Duration {
        Duration::from_millis(self.streaming_read_timeout_ms)
    }

    /// 首 token 阶段的总尝试次数（包括首次请求）
    pub fn first_token_max_attempts(&self) -> u32 {
        self.first_token_max_retries.saturating_add(1)
    }
}

/// 取消令牌
///
/// 调用方断开连接时触发，流式处理据此关闭上游响应并静默结束
pub use tokio_util::sync::CancellationToken;
