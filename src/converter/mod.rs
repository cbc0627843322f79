//! 请求与响应转换
//!
//! ```text
//! OpenAI / Anthropic 请求 ──> [RequestTranslator] ──> UnifiedRequest ──> [KiroPayloadBuilder] ──> Kiro 载荷
//! StreamResult ──> [ResponseRenderer] ──> chat.completion / message
//! ```

pub mod anthropic;
pub mod core;
pub mod kiro;
pub mod openai;
pub mod response;
pub mod traits;
pub mod usage;


pub use anthropic::AnthropicTranslator;
pub use kiro::{build_kiro_payload, KiroPayloadBuilder, PayloadOptions};
pub use openai::OpenAiTranslator;
pub use response::{AnthropicResponseRenderer, OpenAiResponseRenderer};
pub use traits::{RequestTranslator, ResponseRenderer};
pub use usage::{Usage, UsageCalculator};
