//! 数据模型
//!
//! - `openai` / `anthropic`: 入站请求
//! - `unified`: 协议无关的中间表示
//! - `codewhisperer`: Kiro 上游载荷

pub mod anthropic;
pub mod codewhisperer;
pub mod openai;
pub mod unified;

pub use unified::{
    Role, ToolResultStatus, UnifiedImage, UnifiedMessage, UnifiedRequest, UnifiedTool,
    UnifiedToolCall, UnifiedToolResult,
};
