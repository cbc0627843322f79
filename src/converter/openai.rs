//! OpenAI Chat Completions 请求 -> 统一模型

use super::core::extract_text_content;
use super::traits::RequestTranslator;
use crate::error::GatewayError;
use crate::models::openai::{ChatCompletionRequest, ChatMessage, MessageContent, Tool};
use crate::models::{
    Role, ToolResultStatus, UnifiedImage, UnifiedMessage, UnifiedRequest, UnifiedTool,
    UnifiedToolCall, UnifiedToolResult,
};
use serde_json::Value;

/// OpenAI 请求转换器
#[derive(Debug, Default, Clone, Copy)]
pub struct OpenAiTranslator;

impl RequestTranslator for OpenAiTranslator {
    type Input = ChatCompletionRequest;
    type Output = UnifiedRequest;

    fn translate_request(&self, request: ChatCompletionRequest) -> Result<UnifiedRequest, GatewayError> {
        let mut system_parts: Vec<String> = Vec::new();
        let mut messages: Vec<UnifiedMessage> = Vec::new();

        for message in &request.messages {
            match message.role.as_str() {
                "system" | "developer" => {
                    let text = content_text(message.content.as_ref());
                    if !text.is_empty() {
                        system_parts.push(text);
                    }
                }
                "user" => messages.push(convert_user(message)),
                "assistant" => messages.push(convert_assistant(message)),
                "tool" | "function" => messages.push(convert_tool_result(message)),
                other => {
                    tracing::warn!("[KIRO_CONVERT] 忽略未知角色的消息: {}", other);
                }
            }
        }

        let tools = request
            .tools
            .as_deref()
            .unwrap_or_default()
            .iter()
            .filter_map(convert_tool)
            .collect();

        Ok(UnifiedRequest {
            model: request.model,
            system_prompt: system_parts.join("\n"),
            messages,
            tools,
            tool_choice_required: tool_choice_requires_tool(request.tool_choice.as_ref()),
            stream: request.stream,
        })
    }
}

fn content_text(content: Option<&MessageContent>) -> String {
    match content {
        None => String::new(),
        Some(MessageContent::Text(text)) => text.clone(),
        Some(MessageContent::Parts(parts)) => extract_text_content(&Value::Array(parts.clone())),
        Some(MessageContent::Other(value)) => extract_text_content(value),
    }
}

/// `image_url` 中的 data URL -> 图片；普通 URL 跳过
fn extract_images(content: Option<&MessageContent>) -> Vec<UnifiedImage> {
    let Some(MessageContent::Parts(parts)) = content else {
        return Vec::new();
    };
    parts
        .iter()
        .filter(|part| part.get("type").and_then(Value::as_str) == Some("image_url"))
        .filter_map(|part| {
            let url = part
                .get("image_url")
                .and_then(|u| u.get("url").or(Some(u)))
                .and_then(Value::as_str)?;
            let parsed = parse_data_url(url);
            if parsed.is_none() {
                tracing::debug!("[KIRO_CONVERT] 跳过非 data URL 图片");
            }
            parsed
        })
        .collect()
}

/// 解析 `data:image/png;base64,....`
pub fn parse_data_url(url: &str) -> Option<UnifiedImage> {
    let rest = url.strip_prefix("data:")?;
    let (header, data) = rest.split_once(',')?;
    let media_type = header.strip_suffix(";base64")?;
    if data.is_empty() {
        return None;
    }
    Some(UnifiedImage {
        media_type: if media_type.is_empty() {
            "image/png".to_string()
        } else {
            media_type.to_string()
        },
        data: data.to_string(),
    })
}

fn convert_user(message: &ChatMessage) -> UnifiedMessage {
    let mut unified = UnifiedMessage::user(content_text(message.content.as_ref()));
    unified.images = extract_images(message.content.as_ref());
    unified
}

fn convert_assistant(message: &ChatMessage) -> UnifiedMessage {
    let tool_calls = message
        .tool_calls
        .as_deref()
        .unwrap_or_default()
        .iter()
        .filter_map(|call| {
            if call.id.is_empty() || call.function.name.is_empty() {
                tracing::warn!("[KIRO_CONVERT] 丢弃缺少 id 或 name 的工具调用");
                return None;
            }
            Some(UnifiedToolCall {
                id: call.id.clone(),
                name: call.function.name.clone(),
                arguments: call.function.arguments.clone(),
            })
        })
        .collect();
    UnifiedMessage::assistant(content_text(message.content.as_ref())).with_tool_calls(tool_calls)
}

/// `tool` 角色消息转为携带工具结果的 user 消息
fn convert_tool_result(message: &ChatMessage) -> UnifiedMessage {
    let tool_use_id = message.tool_call_id.clone().unwrap_or_default();
    UnifiedMessage::user("").with_tool_results(vec![UnifiedToolResult {
        tool_use_id,
        content: content_text(message.content.as_ref()),
        status: ToolResultStatus::Success,
    }])
}

fn convert_tool(tool: &Tool) -> Option<UnifiedTool> {
    if tool.tool_type != "function" {
        tracing::debug!("[KIRO_CONVERT] 忽略不支持的工具类型: {}", tool.tool_type);
        return None;
    }
    let (name, description, parameters) = match &tool.function {
        Some(function) => (
            function.name.clone(),
            function.description.clone(),
            function.parameters.clone(),
        ),
        None => (
            tool.name.clone()?,
            tool.description.clone(),
            tool.parameters.clone(),
        ),
    };
    if name.is_empty() {
        return None;
    }
    Some(UnifiedTool {
        name,
        description: description.unwrap_or_default(),
        input_schema: parameters.unwrap_or_else(|| serde_json::json!({})),
    })
}

/// `"required"` 或指定函数时要求必须调用工具
fn tool_choice_requires_tool(tool_choice: Option<&Value>) -> bool {
    match tool_choice {
        Some(Value::String(choice)) => choice == "required",
        Some(Value::Object(obj)) => {
            obj.get("type").and_then(Value::as_str) == Some("function") || obj.contains_key("function")
        }
        _ => false,
    }
}
