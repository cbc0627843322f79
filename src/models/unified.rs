//! 协议无关的统一消息模型
//!
//! OpenAI 与 Anthropic 请求在入口处都会被规整为这里的类型，
//! 之后的合并、校验与 Kiro 载荷构建只面向统一模型。
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// 工具调用，`arguments` 为 JSON 文本
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnifiedToolCall {
    pub id: String,
    pub name: String,
    pub arguments: String,
}

/// 工具执行状态
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolResultStatus {
    #[default]
    Success,
    Error,
}

impl ToolResultStatus {
    pub fn from_is_error(is_error: Option<bool>) -> Self {
        if is_error.unwrap_or(false) {
            Self::Error
        } else {
            Self::Success
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Error => "error",
        }
    }
}

/// 工具结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnifiedToolResult {
    pub tool_use_id: String,
    pub content: String,
    #[serde(default)]
    pub status: ToolResultStatus,
}

/// Base64 图片
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnifiedImage {
    pub media_type: String,
    pub data: String,
}

impl UnifiedImage {
    /// 图片格式（`image/png` -> `png`）
    pub fn format(&self) -> &str {
        self.media_type
            .rsplit('/')
            .next()
            .filter(|s| !s.is_empty())
            .unwrap_or("png")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnifiedMessage {
    pub role: Role,
    pub content: String,
    #[serde(default)]
    pub tool_calls: Vec<UnifiedToolCall>,
    #[serde(default)]
    pub tool_results: Vec<UnifiedToolResult>,
    #[serde(default)]
    pub images: Vec<UnifiedImage>,
}

impl UnifiedMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_results: Vec::new(),
            images: Vec::new(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    pub fn with_tool_calls(mut self, tool_calls: Vec<UnifiedToolCall>) -> Self {
        self.tool_calls = tool_calls;
        self
    }

    pub fn with_tool_results(mut self, tool_results: Vec<UnifiedToolResult>) -> Self {
        self.tool_results = tool_results;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnifiedTool {
    pub name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
}

/// 统一请求
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnifiedRequest {
    pub model: String,
    pub system_prompt: String,
    pub messages: Vec<UnifiedMessage>,
    pub tools: Vec<UnifiedTool>,
    /// 调用方要求必须调用工具（OpenAI `tool_choice: "required"` / Anthropic `{"type":"any"}`）
    pub tool_choice_required: bool,
    pub stream: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_image_format() {
        let image = UnifiedImage {
            media_type: "image/jpeg".to_string(),
            data: String::new(),
        };
        assert_eq!(image.format(), "jpeg");

        let bare = UnifiedImage {
            media_type: String::new(),
            data: String::new(),
        };
        assert_eq!(bare.format(), "png");
    }
}
