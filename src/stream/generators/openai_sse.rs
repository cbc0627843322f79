//! OpenAI SSE 生成器
//!
//! 将 `KiroEvent` 转换为 OpenAI Chat Completions SSE 格式。
//!
//! # 格式说明
//!
//! ```text
//! data: {"id":"chatcmpl-xxx","object":"chat.completion.chunk","created":1234567890,"model":"claude-sonnet-4.5","choices":[{"index":0,"delta":{"role":"assistant","content":"Hello"},"finish_reason":null}]}
//!
//! data: {"id":"chatcmpl-xxx",...,"choices":[{"index":0,"delta":{},"finish_reason":"stop"}],"usage":{...}}
//!
//! data: [DONE]
//! ```

use super::SseGenerator;
use crate::converter::response::openai_completion_id;
use crate::converter::Usage;
use crate::error::GatewayError;
use crate::stream::events::KiroEvent;
use crate::stream::result::StreamResult;
use serde::Serialize;

/// 结束标记
pub const DONE_FRAME: &str = "data: [DONE]\n\n";

/// OpenAI SSE 生成器
#[derive(Debug)]
pub struct OpenAiSseGenerator {
    /// 响应 ID
    response_id: String,
    /// 模型名称
    model: String,
    /// 创建时间戳
    created: i64,
    /// 是否已发送 `role: assistant`
    role_sent: bool,
}

impl OpenAiSseGenerator {
    /// 创建新的生成器
    pub fn new(model: impl Into<String>) -> Self {
        Self::with_id(openai_completion_id(), model)
    }

    /// 使用指定的响应 ID 创建生成器
    pub fn with_id(id: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            response_id: id.into(),
            model: model.into(),
            created: chrono::Utc::now().timestamp(),
            role_sent: false,
        }
    }

    /// 获取响应 ID
    pub fn response_id(&self) -> &str {
        &self.response_id
    }

    fn take_role(&mut self) -> Option<&'static str> {
        if self.role_sent {
            None
        } else {
            self.role_sent = true;
            Some("assistant")
        }
    }

    fn frame(
        &self,
        delta: OpenAiDelta<'_>,
        finish_reason: Option<&str>,
        usage: Option<serde_json::Value>,
    ) -> String {
        let chunk = OpenAiStreamChunk {
            id: &self.response_id,
            object: "chat.completion.chunk",
            created: self.created,
            model: &self.model,
            choices: vec![OpenAiChoice {
                index: 0,
                delta,
                finish_reason,
            }],
            usage,
        };
        match serde_json::to_string(&chunk) {
            Ok(json) => format!("data: {}\n\n", json),
            Err(e) => {
                tracing::error!("[KIRO_STREAM] 序列化 OpenAI chunk 失败: {}", e);
                String::new()
            }
        }
    }
}

impl SseGenerator for OpenAiSseGenerator {
    fn on_event(&mut self, event: &KiroEvent) -> Vec<String> {
        match event {
            KiroEvent::Content(text) if !text.is_empty() => {
                let role = self.take_role();
                vec![self.frame(
                    OpenAiDelta {
                        role,
                        content: Some(text.as_str()),
                        ..Default::default()
                    },
                    None,
                    None,
                )]
            }
            KiroEvent::Thinking(text) if !text.is_empty() => {
                let role = self.take_role();
                vec![self.frame(
                    OpenAiDelta {
                        role,
                        reasoning_content: Some(text.as_str()),
                        ..Default::default()
                    },
                    None,
                    None,
                )]
            }
            // 工具调用在结束时统一输出；用量在结束时计算
            _ => Vec::new(),
        }
    }

    fn finish(&mut self, result: &StreamResult, usage: &Usage) -> Vec<String> {
        let mut frames = Vec::new();

        if !result.tool_calls.is_empty() {
            let tool_calls = result
                .tool_calls
                .iter()
                .enumerate()
                .map(|(index, call)| OpenAiToolCallDelta {
                    index,
                    id: Some(call.id.as_str()),
                    r#type: Some("function"),
                    function: Some(OpenAiFunctionDelta {
                        name: Some(call.name.as_str()),
                        arguments: Some(call.arguments.as_str()),
                    }),
                })
                .collect();
            let role = self.take_role();
            frames.push(self.frame(
                OpenAiDelta {
                    role,
                    tool_calls: Some(tool_calls),
                    ..Default::default()
                },
                None,
                None,
            ));
        }

        let role = self.take_role();
        frames.push(self.frame(
            OpenAiDelta {
                role,
                ..Default::default()
            },
            Some(result.stop_reason().to_openai_str()),
            Some(usage.to_openai_json()),
        ));
        frames.push(DONE_FRAME.to_string());
        frames
    }

    fn error_event(&self, error: &GatewayError) -> String {
        format!("data: {}\n\n{}", error.to_openai_json(), DONE_FRAME)
    }
}

// ============================================================================
// OpenAI SSE 数据结构
// ============================================================================

#[derive(Debug, Serialize)]
struct OpenAiStreamChunk<'a> {
    id: &'a str,
    object: &'a str,
    created: i64,
    model: &'a str,
    choices: Vec<OpenAiChoice<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    usage: Option<serde_json::Value>,
}

#[derive(Debug, Serialize)]
struct OpenAiChoice<'a> {
    index: usize,
    delta: OpenAiDelta<'a>,
    finish_reason: Option<&'a str>,
}

#[derive(Debug, Default, Serialize)]
struct OpenAiDelta<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reasoning_content: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<OpenAiToolCallDelta<'a>>>,
}

#[derive(Debug, Serialize)]
struct OpenAiToolCallDelta<'a> {
    index: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    r#type: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    function: Option<OpenAiFunctionDelta<'a>>,
}

#[derive(Debug, Serialize)]
struct OpenAiFunctionDelta<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    arguments: Option<&'a str>,
}
