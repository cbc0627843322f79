//! Anthropic SSE 生成器
//!
//! 将 `KiroEvent` 转换为 Anthropic Messages API SSE 格式。
//!
//! # 格式说明
//!
//! ```text
//! event: message_start
//! data: {"type":"message_start","message":{...}}
//!
//! event: content_block_start
//! data: {"type":"content_block_start","index":0,"content_block":{"type":"text","text":""}}
//!
//! event: content_block_delta
//! data: {"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"Hello"}}
//!
//! event: content_block_stop
//! data: {"type":"content_block_stop","index":0}
//!
//! event: message_delta
//! data: {"type":"message_delta","delta":{"stop_reason":"end_turn"},"usage":{...}}
//!
//! event: message_stop
//! data: {"type":"message_stop"}
//! ```
//!
//! 文本块与推理块按到达顺序打开，类型切换时关闭上一个块；工具调用块在结束时依次输出。

use super::SseGenerator;
use crate::converter::response::anthropic_message_id;
use crate::converter::Usage;
use crate::error::GatewayError;
use crate::stream::events::{KiroEvent, StopReason};
use crate::stream::result::StreamResult;
use crate::stream::ToolCall;
use serde_json::json;

/// 内容块类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BlockKind {
    Text,
    Thinking,
}

/// Anthropic SSE 生成器
#[derive(Debug)]
pub struct AnthropicSseGenerator {
    /// 消息 ID
    message_id: String,
    /// 模型名称
    model: String,
    /// message_start 中报告的输入 token 估算值
    input_tokens: u32,
    /// 是否已发送 message_start 事件
    message_started: bool,
    /// 当前打开的内容块
    open_block: Option<(BlockKind, u32)>,
    /// 下一个内容块索引
    next_index: u32,
}

impl AnthropicSseGenerator {
    /// 创建新的生成器
    pub fn new(model: impl Into<String>, input_tokens: u32) -> Self {
        Self::with_id(anthropic_message_id(), model, input_tokens)
    }

    /// 使用指定的消息 ID 创建生成器
    pub fn with_id(id: impl Into<String>, model: impl Into<String>, input_tokens: u32) -> Self {
        Self {
            message_id: id.into(),
            model: model.into(),
            input_tokens,
            message_started: false,
            open_block: None,
            next_index: 0,
        }
    }

    /// 获取消息 ID
    pub fn message_id(&self) -> &str {
        &self.message_id
    }

    fn ensure_message_start(&mut self, frames: &mut Vec<String>) {
        if !self.message_started {
            self.message_started = true;
            frames.push(self.create_message_start());
        }
    }

    /// 打开指定类型的块，必要时先关闭当前块，返回块索引
    fn ensure_block(&mut self, kind: BlockKind, frames: &mut Vec<String>) -> u32 {
        if let Some((open_kind, index)) = self.open_block {
            if open_kind == kind {
                return index;
            }
        }
        self.close_block(frames);

        let index = self.next_index;
        self.next_index += 1;
        self.open_block = Some((kind, index));
        frames.push(match kind {
            BlockKind::Text => self.create_content_block_start_text(index),
            BlockKind::Thinking => self.create_content_block_start_thinking(index),
        });
        index
    }

    fn close_block(&mut self, frames: &mut Vec<String>) {
        if let Some((_, index)) = self.open_block.take() {
            frames.push(self.create_content_block_stop(index));
        }
    }

    fn push_tool_block(&mut self, call: &ToolCall, frames: &mut Vec<String>) {
        let index = self.next_index;
        self.next_index += 1;
        frames.push(self.create_content_block_start_tool(index, &call.id, &call.name));
        frames.push(self.create_input_json_delta(index, &call.arguments));
        frames.push(self.create_content_block_stop(index));
    }

    // ========================================================================
    // SSE 事件创建方法
    // ========================================================================

    fn create_message_start(&self) -> String {
        let event = json!({
            "type": "message_start",
            "message": {
                "id": self.message_id,
                "type": "message",
                "role": "assistant",
                "model": self.model,
                "content": [],
                "stop_reason": serde_json::Value::Null,
                "stop_sequence": serde_json::Value::Null,
                "usage": {
                    "input_tokens": self.input_tokens,
                    "output_tokens": 0
                }
            }
        });
        format!("event: message_start\ndata: {}\n\n", event)
    }

    fn create_content_block_start_text(&self, index: u32) -> String {
        let event = json!({
            "type": "content_block_start",
            "index": index,
            "content_block": {
                "type": "text",
                "text": ""
            }
        });
        format!("event: content_block_start\ndata: {}\n\n", event)
    }

    fn create_content_block_start_thinking(&self, index: u32) -> String {
        let event = json!({
            "type": "content_block_start",
            "index": index,
            "content_block": {
                "type": "thinking",
                "thinking": ""
            }
        });
        format!("event: content_block_start\ndata: {}\n\n", event)
    }

    fn create_content_block_start_tool(&self, index: u32, id: &str, name: &str) -> String {
        let event = json!({
            "type": "content_block_start",
            "index": index,
            "content_block": {
                "type": "tool_use",
                "id": id,
                "name": name,
                "input": {}
            }
        });
        format!("event: content_block_start\ndata: {}\n\n", event)
    }

    fn create_text_delta(&self, index: u32, text: &str) -> String {
        let event = json!({
            "type": "content_block_delta",
            "index": index,
            "delta": {
                "type": "text_delta",
                "text": text
            }
        });
        format!("event: content_block_delta\ndata: {}\n\n", event)
    }

    fn create_thinking_delta(&self, index: u32, thinking: &str) -> String {
        let event = json!({
            "type": "content_block_delta",
            "index": index,
            "delta": {
                "type": "thinking_delta",
                "thinking": thinking
            }
        });
        format!("event: content_block_delta\ndata: {}\n\n", event)
    }

    fn create_input_json_delta(&self, index: u32, partial_json: &str) -> String {
        let event = json!({
            "type": "content_block_delta",
            "index": index,
            "delta": {
                "type": "input_json_delta",
                "partial_json": partial_json
            }
        });
        format!("event: content_block_delta\ndata: {}\n\n", event)
    }

    fn create_content_block_stop(&self, index: u32) -> String {
        let event = json!({
            "type": "content_block_stop",
            "index": index
        });
        format!("event: content_block_stop\ndata: {}\n\n", event)
    }

    fn create_message_delta(&self, stop_reason: &StopReason, usage: &Usage) -> String {
        let event = json!({
            "type": "message_delta",
            "delta": {
                "stop_reason": stop_reason.to_anthropic_str(),
                "stop_sequence": serde_json::Value::Null
            },
            "usage": usage.to_anthropic_json()
        });
        format!("event: message_delta\ndata: {}\n\n", event)
    }

    fn create_message_stop(&self) -> String {
        let event = json!({
            "type": "message_stop"
        });
        format!("event: message_stop\ndata: {}\n\n", event)
    }
}

impl SseGenerator for AnthropicSseGenerator {
    fn on_event(&mut self, event: &KiroEvent) -> Vec<String> {
        let mut frames = Vec::new();

        match event {
            KiroEvent::Content(text) if !text.is_empty() => {
                self.ensure_message_start(&mut frames);
                let index = self.ensure_block(BlockKind::Text, &mut frames);
                frames.push(self.create_text_delta(index, text));
            }
            KiroEvent::Thinking(text) if !text.is_empty() => {
                self.ensure_message_start(&mut frames);
                let index = self.ensure_block(BlockKind::Thinking, &mut frames);
                frames.push(self.create_thinking_delta(index, text));
            }
            _ => {}
        }

        frames
    }

    fn finish(&mut self, result: &StreamResult, usage: &Usage) -> Vec<String> {
        let mut frames = Vec::new();
        self.ensure_message_start(&mut frames);

        // 没有任何内容时补一个空文本块
        if self.next_index == 0 && result.tool_calls.is_empty() {
            self.ensure_block(BlockKind::Text, &mut frames);
        }
        self.close_block(&mut frames);

        for call in &result.tool_calls {
            self.push_tool_block(call, &mut frames);
        }

        frames.push(self.create_message_delta(&result.stop_reason(), usage));
        frames.push(self.create_message_stop());
        frames
    }

    fn error_event(&self, error: &GatewayError) -> String {
        format!("event: error\ndata: {}\n\n", error.to_anthropic_json())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    fn parse(frame: &str) -> (String, Value) {
        let mut lines = frame.trim_end().lines();
        let event = lines
            .next()
            .and_then(|l| l.strip_prefix("event: "))
            .unwrap()
            .to_string();
        let data = lines.next().and_then(|l| l.strip_prefix("data: ")).unwrap();
        (event, serde_json::from_str(data).unwrap())
    }

    fn event_names(frames: &[String]) -> Vec<String> {
        frames.iter().map(|f| parse(f).0).collect()
    }

    #[test]
    fn test_generate_message_start() {
        let mut generator = AnthropicSseGenerator::with_id("msg_test", "claude-sonnet-4.5", 42);
        let frames = generator.on_event(&KiroEvent::Content("Hi".into()));
        let (name, start) = parse(&frames[0]);
        assert_eq!(name, "message_start");
        assert_eq!(start["message"]["id"], "msg_test");
        assert_eq!(start["message"]["usage"]["input_tokens"], 42);
        assert_eq!(
            event_names(&frames),
            vec!["message_start", "content_block_start", "content_block_delta"]
        );

        // message_start 只发送一次
        let frames = generator.on_event(&KiroEvent::Content(" there".into()));
        assert_eq!(event_names(&frames), vec!["content_block_delta"]);
    }

    #[test]
    fn test_thinking_then_text_switches_blocks() {
        let mut generator = AnthropicSseGenerator::new("m", 0);
        let mut frames = generator.on_event(&KiroEvent::Thinking("plan".into()));
        frames.extend(generator.on_event(&KiroEvent::Content("answer".into())));

        let (_, thinking_start) = parse(&frames[1]);
        assert_eq!(thinking_start["content_block"]["type"], "thinking");
        let (_, thinking_delta) = parse(&frames[2]);
        assert_eq!(thinking_delta["delta"]["type"], "thinking_delta");

        let (name, stop) = parse(&frames[3]);
        assert_eq!(name, "content_block_stop");
        assert_eq!(stop["index"], 0);

        let (_, text_start) = parse(&frames[4]);
        assert_eq!(text_start["index"], 1);
        assert_eq!(text_start["content_block"]["type"], "text");
    }

    #[test]
    fn test_finish_with_tool_use() {
        let mut generator = AnthropicSseGenerator::new("m", 0);
        let mut frames = generator.on_event(&KiroEvent::Content("Reading".into()));
        let result = StreamResult {
            content: "Reading".into(),
            tool_calls: vec![ToolCall {
                id: "toolu_1".into(),
                name: "read_file".into(),
                arguments: r#"{"path":"a.txt"}"#.into(),
            }],
            ..Default::default()
        };
        let usage = Usage {
            prompt_tokens: 7,
            completion_tokens: 3,
            total_tokens: 10,
            credits_used: None,
        };
        frames.extend(generator.finish(&result, &usage));

        assert_eq!(
            event_names(&frames),
            vec![
                "message_start",
                "content_block_start",
                "content_block_delta",
                "content_block_stop",
                "content_block_start",
                "content_block_delta",
                "content_block_stop",
                "message_delta",
                "message_stop",
            ]
        );

        let (_, tool_start) = parse(&frames[4]);
        assert_eq!(tool_start["index"], 1);
        assert_eq!(tool_start["content_block"]["name"], "read_file");
        let (_, input) = parse(&frames[5]);
        assert_eq!(input["delta"]["partial_json"], r#"{"path":"a.txt"}"#);

        let (_, delta) = parse(&frames[7]);
        assert_eq!(delta["delta"]["stop_reason"], "tool_use");
        assert_eq!(delta["usage"]["output_tokens"], 3);
    }

    #[test]
    fn test_empty_stream_still_has_text_block() {
        let mut generator = AnthropicSseGenerator::new("m", 0);
        let frames = generator.finish(&StreamResult::default(), &Usage::default());
        assert_eq!(
            event_names(&frames),
            vec![
                "message_start",
                "content_block_start",
                "content_block_stop",
                "message_delta",
                "message_stop",
            ]
        );
        let (_, delta) = parse(&frames[3]);
        assert_eq!(delta["delta"]["stop_reason"], "end_turn");
    }

    #[test]
    fn test_error_event() {
        let generator = AnthropicSseGenerator::new("m", 0);
        let (name, body) = parse(&generator.error_event(&GatewayError::Http("reset".into())));
        assert_eq!(name, "error");
        assert_eq!(body["type"], "error");
        assert_eq!(body["error"]["type"], "api_error");
    }
}
