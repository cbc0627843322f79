//! Anthropic Messages 请求 -> 统一模型

use super::core::extract_text_content;
use super::traits::RequestTranslator;
use crate::error::GatewayError;
use crate::models::anthropic::{
    AnthropicContent, AnthropicMessage, AnthropicMessagesRequest, AnthropicTool, ContentBlock,
    SystemPrompt,
};
use crate::models::{
    Role, ToolResultStatus, UnifiedImage, UnifiedMessage, UnifiedRequest, UnifiedTool,
    UnifiedToolCall, UnifiedToolResult,
};
use serde_json::Value;

/// Anthropic 请求转换器
#[derive(Debug, Default, Clone, Copy)]
pub struct AnthropicTranslator;

impl RequestTranslator for AnthropicTranslator {
    type Input = AnthropicMessagesRequest;
    type Output = UnifiedRequest;

    fn translate_request(
        &self,
        request: AnthropicMessagesRequest,
    ) -> Result<UnifiedRequest, GatewayError> {
        let system_prompt = request
            .system
            .as_ref()
            .map(flatten_system_prompt)
            .unwrap_or_default();

        let messages = request
            .messages
            .iter()
            .filter_map(convert_message)
            .collect();

        let tools = request
            .tools
            .as_deref()
            .unwrap_or_default()
            .iter()
            .map(convert_tool)
            .collect();

        Ok(UnifiedRequest {
            model: request.model,
            system_prompt,
            messages,
            tools,
            tool_choice_required: tool_choice_requires_tool(request.tool_choice.as_ref()),
            stream: request.stream,
        })
    }
}

/// 系统提示块按换行拼接，`cache_control` 丢弃
pub fn flatten_system_prompt(system: &SystemPrompt) -> String {
    match system {
        SystemPrompt::Text(text) => text.clone(),
        SystemPrompt::Blocks(blocks) => blocks
            .iter()
            .filter(|b| !b.text.is_empty())
            .map(|b| b.text.as_str())
            .collect::<Vec<_>>()
            .join("\n"),
    }
}

fn convert_message(message: &AnthropicMessage) -> Option<UnifiedMessage> {
    let role = match message.role.as_str() {
        "user" => Role::User,
        "assistant" => Role::Assistant,
        other => {
            tracing::warn!("[KIRO_CONVERT] 忽略未知角色的消息: {}", other);
            return None;
        }
    };

    let blocks = match &message.content {
        AnthropicContent::Text(text) => return Some(UnifiedMessage::new(role, text.clone())),
        AnthropicContent::Blocks(blocks) => blocks,
    };

    let mut unified = UnifiedMessage::new(role, "");
    for block in blocks {
        match block {
            ContentBlock::Text { text } => unified.content.push_str(text),
            ContentBlock::Image { source } => {
                if source.source_type == "base64" && !source.data.is_empty() {
                    unified.images.push(UnifiedImage {
                        media_type: source.media_type.clone(),
                        data: source.data.clone(),
                    });
                } else {
                    tracing::debug!("[KIRO_CONVERT] 跳过非 base64 图片");
                }
            }
            ContentBlock::ToolUse { id, name, input } => {
                if id.is_empty() || name.is_empty() {
                    tracing::warn!("[KIRO_CONVERT] 丢弃缺少 id 或 name 的 tool_use");
                    continue;
                }
                let arguments = match input {
                    Value::Null => "{}".to_string(),
                    other => other.to_string(),
                };
                unified.tool_calls.push(UnifiedToolCall {
                    id: id.clone(),
                    name: name.clone(),
                    arguments,
                });
            }
            ContentBlock::ToolResult {
                tool_use_id,
                content,
                is_error,
            } => {
                unified.tool_results.push(UnifiedToolResult {
                    tool_use_id: tool_use_id.clone(),
                    content: content.as_ref().map(extract_text_content).unwrap_or_default(),
                    status: ToolResultStatus::from_is_error(*is_error),
                });
            }
            // 历史中的推理内容不回传给上游
            ContentBlock::Thinking { .. } | ContentBlock::Unknown => {}
        }
    }
    Some(unified)
}

fn convert_tool(tool: &AnthropicTool) -> UnifiedTool {
    UnifiedTool {
        name: tool.name.clone(),
        description: tool.description.clone().unwrap_or_default(),
        input_schema: tool
            .input_schema
            .clone()
            .unwrap_or_else(|| serde_json::json!({})),
    }
}

/// `{"type":"any"}` 或 `{"type":"tool"}` 时要求必须调用工具
fn tool_choice_requires_tool(tool_choice: Option<&Value>) -> bool {
    matches!(
        tool_choice
            .and_then(|c| c.get("type"))
            .and_then(Value::as_str),
        Some("any") | Some("tool")
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn request(body: Value) -> AnthropicMessagesRequest {
        serde_json::from_value(body).unwrap()
    }

    #[test]
    fn test_system_blocks_flattened() {
        let req = request(json!({
            "model": "claude-sonnet-4-5",
            "system": [
                {"type": "text", "text": "First", "cache_control": {"type": "ephemeral"}},
                {"type": "text", "text": "Second"}
            ],
            "messages": [{"role": "user", "content": "hi"}]
        }));
        let unified = AnthropicTranslator.translate_request(req).unwrap();
        assert_eq!(unified.system_prompt, "First\nSecond");
    }

    #[test]
    fn test_tool_use_and_results() {
        let req = request(json!({
            "model": "m",
            "messages": [
                {"role": "user", "content": "Find it"},
                {"role": "assistant", "content": [
                    {"type": "thinking", "thinking": "hmm"},
                    {"type": "text", "text": "Looking"},
                    {"type": "tool_use", "id": "toolu_1", "name": "search", "input": {"q": "x"}},
                    {"type": "tool_use", "id": "", "name": "bad", "input": {}}
                ]},
                {"role": "user", "content": [
                    {"type": "tool_result", "tool_use_id": "toolu_1", "content": [{"type": "text", "text": "found"}]},
                    {"type": "tool_result", "tool_use_id": "toolu_2", "is_error": true}
                ]}
            ],
            "tools": [{"name": "search", "input_schema": {"type": "object"}}],
            "tool_choice": {"type": "any"}
        }));
        let unified = AnthropicTranslator.translate_request(req).unwrap();

        let assistant = &unified.messages[1];
        assert_eq!(assistant.content, "Looking");
        assert_eq!(assistant.tool_calls.len(), 1);
        assert_eq!(assistant.tool_calls[0].arguments, r#"{"q":"x"}"#);

        let results = &unified.messages[2].tool_results;
        assert_eq!(results[0].content, "found");
        assert_eq!(results[1].content, "");
        assert_eq!(results[0].status, ToolResultStatus::Success);
        assert_eq!(results[1].status, ToolResultStatus::Error);
        assert_eq!(unified.tools[0].description, "");
        assert!(unified.tool_choice_required);
    }

    #[test]
    fn test_base64_image() {
        let req = request(json!({
            "model": "m",
            "messages": [{"role": "user", "content": [
                {"type": "image", "source": {"type": "base64", "media_type": "image/png", "data": "AAAA"}},
                {"type": "image", "source": {"type": "url", "url": "https://example.com/x.png"}},
                {"type": "text", "text": "describe"}
            ]}]
        }));
        let unified = AnthropicTranslator.translate_request(req).unwrap();
        assert_eq!(unified.messages[0].images.len(), 1);
        assert_eq!(unified.messages[0].content, "describe");
    }

    #[test]
    fn test_auto_tool_choice() {
        assert!(!tool_choice_requires_tool(Some(&json!({"type": "auto"}))));
        assert!(tool_choice_requires_tool(Some(&json!({"type": "tool", "name": "x"}))));
    }
}
