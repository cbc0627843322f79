//! 非流式响应渲染

use super::traits::ResponseRenderer;
use super::usage::Usage;
use crate::stream::StreamResult;
use serde_json::{json, Value};
use uuid::Uuid;

/// 工具参数文本 -> JSON 对象
pub fn arguments_to_input(arguments: &str) -> Value {
    serde_json::from_str::<Value>(arguments)
        .ok()
        .filter(Value::is_object)
        .unwrap_or_else(|| json!({}))
}

pub fn openai_completion_id() -> String {
    format!("chatcmpl-{}", Uuid::new_v4().simple())
}

pub fn anthropic_message_id() -> String {
    format!("msg_{}", Uuid::new_v4().simple())
}

/// `chat.completion` 响应
#[derive(Debug, Clone)]
pub struct OpenAiResponseRenderer {
    pub model: String,
}

impl ResponseRenderer for OpenAiResponseRenderer {
    fn render(&self, result: &StreamResult, usage: &Usage) -> Value {
        let mut message = json!({
            "role": "assistant",
            "content": result.content,
        });
        if !result.thinking_content.is_empty() {
            message["reasoning_content"] = json!(result.thinking_content);
        }
        if !result.tool_calls.is_empty() {
            message["tool_calls"] = Value::Array(
                result
                    .tool_calls
                    .iter()
                    .map(|call| {
                        json!({
                            "id": call.id,
                            "type": "function",
                            "function": {"name": call.name, "arguments": call.arguments},
                        })
                    })
                    .collect(),
            );
        }

        json!({
            "id": openai_completion_id(),
            "object": "chat.completion",
            "created": chrono::Utc::now().timestamp(),
            "model": self.model,
            "choices": [{
                "index": 0,
                "message": message,
                "finish_reason": result.stop_reason().to_openai_str(),
            }],
            "usage": usage.to_openai_json(),
        })
    }
}

/// Anthropic `message` 响应
#[derive(Debug, Clone)]
pub struct AnthropicResponseRenderer {
    pub model: String,
}

impl ResponseRenderer for AnthropicResponseRenderer {
    fn render(&self, result: &StreamResult, usage: &Usage) -> Value {
        let mut content: Vec<Value> = Vec::new();
        if !result.thinking_content.is_empty() {
            content.push(json!({
                "type": "thinking",
                "thinking": result.thinking_content,
                "signature": "",
            }));
        }
        if !result.content.is_empty() || result.tool_calls.is_empty() {
            content.push(json!({"type": "text", "text": result.content}));
        }
        for call in &result.tool_calls {
            content.push(json!({
                "type": "tool_use",
                "id": call.id,
                "name": call.name,
                "input": arguments_to_input(&call.arguments),
            }));
        }

        json!({
            "id": anthropic_message_id(),
            "type": "message",
            "role": "assistant",
            "model": self.model,
            "content": content,
            "stop_reason": result.stop_reason().to_anthropic_str(),
            "stop_sequence": null,
            "usage": usage.to_anthropic_json(),
        })
    }
}
