//! 容错机制模块
//!
//! 提供重试退避、超时配置和流式首 token 重试

mod retry;
mod streaming;
mod timeout;

pub use retry::{Retrier, RetryConfig};
pub use streaming::{
    open_with_first_token_retry, stream_with_first_token_retry, ByteStream, FirstTokenPolicy,
    OutputStream, PrimedStream, StreamConsumer,
};
pub use timeout::{CancellationToken, TimeoutConfig, TimeoutKind};

#[cfg(test)]
mod tests;
