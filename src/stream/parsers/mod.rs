//! Kiro 响应解码
//!
//! - `aws_event_stream`: 二进制帧中的 JSON 事件
//! - `bracket`: 正文中的 `[Called ... with args: {...}]` 工具调用及去重

pub mod aws_event_stream;
pub mod bracket;

pub use aws_event_stream::{parse_all, AwsEventStreamParser, ParserState};
pub use bracket::{
    assign_missing_ids, deduplicate_tool_calls, parse_bracket_tool_calls,
    strip_bracket_tool_calls,
};
