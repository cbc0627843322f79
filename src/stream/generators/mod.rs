//! SSE 帧生成器
//!
//! 把 `KiroEvent` 渲染为调用方协议的 SSE 帧：
//!
//! - OpenAI: `data: {...}\n\n`，以 `data: [DONE]` 结束
//! - Anthropic: `event: xxx\ndata: {...}\n\n`
//!
//! 文本与推理增量即时输出；工具调用要等流结束、合并正文中的文本调用之后
//! 才能确定，因此统一在 `finish` 中输出。

pub mod anthropic_sse;
pub mod openai_sse;

pub use anthropic_sse::AnthropicSseGenerator;
pub use openai_sse::OpenAiSseGenerator;

use crate::converter::Usage;
use crate::error::GatewayError;
use crate::stream::events::KiroEvent;
use crate::stream::result::StreamResult;

/// SSE 生成器
pub trait SseGenerator: Send {
    /// 渲染一个流事件，可能输出零到多帧
    fn on_event(&mut self, event: &KiroEvent) -> Vec<String>;

    /// 流结束：输出工具调用、停止原因与用量
    fn finish(&mut self, result: &StreamResult, usage: &Usage) -> Vec<String>;

    /// 首 token 之后的错误，渲染为协议对应的错误帧
    fn error_event(&self, error: &GatewayError) -> String;
}
