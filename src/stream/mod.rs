//! 流式处理层
//!
//! - `events`: Kiro 流事件 (`KiroEvent`) 与停止原因
//! - `parsers`: 上游二进制帧解码与文本工具调用识别
//! - `thinking`: 响应开头推理块的识别
//! - `result`: 事件折叠为完整结果
//! - `generators`: OpenAI / Anthropic SSE 帧生成
//! - `pipeline`: 把上述组件串成流式消费者
//!
//! ```text
//! AWS Event Stream ──> [AwsEventStreamParser] ──> KiroEvent ──> [ThinkingParser] ──> [OpenAiSseGenerator] ──> OpenAI SSE
//!                                                                                 └─> [AnthropicSseGenerator] ──> Anthropic SSE
//! ```

pub mod events;
pub mod generators;
pub mod parsers;
pub mod pipeline;
pub mod result;
pub mod thinking;

pub use events::{KiroEvent, StopReason, ToolCall};
pub use generators::{AnthropicSseGenerator, OpenAiSseGenerator, SseGenerator};
pub use parsers::{AwsEventStreamParser, ParserState};
pub use pipeline::{collect_response, KiroStreamProcessor, SseStreamConsumer};
pub use result::StreamResult;
pub use thinking::{ThinkingMode, ThinkingParser, ThinkingState};
