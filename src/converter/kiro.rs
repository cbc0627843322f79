//! 统一模型 -> Kiro (CodeWhisperer) 载荷
//!
//! 处理顺序：
//! 1. 工具：超长描述移入系统提示，校验名称
//! 2. 历史：无工具时转文本，有工具时移除孤立结果，再合并相邻消息
//! 3. 以 assistant 结尾时补一条 `Continue`
//! 4. 系统提示拼到第一条 user 消息，伪推理标签注入当前消息
//! 5. 构建历史与当前消息

use super::core::{
    build_system_prompt, ensure_assistant_before_tool_results, inject_thinking_tags,
    merge_adjacent_messages, process_tools_with_long_descriptions, sanitize_json_schema,
    strip_all_tool_content, tool_description_or_placeholder, validate_tool_names,
    EMPTY_CONTENT_PLACEHOLDER,
};
use super::traits::RequestTranslator;
use crate::config::ThinkingConfig;
use crate::error::GatewayError;
use crate::models::codewhisperer::*;
use crate::models::{
    Role, UnifiedImage, UnifiedMessage, UnifiedRequest, UnifiedTool, UnifiedToolCall,
    UnifiedToolResult,
};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// 工具结果为空时的占位
pub const EMPTY_TOOL_RESULT_PLACEHOLDER: &str = "(empty result)";

/// 当前消息为空时的内容
pub const CONTINUE_PROMPT: &str = "Continue";

/// 载荷构建参数
#[derive(Debug, Clone)]
pub struct PayloadOptions {
    /// 已解析的 Kiro 模型 ID
    pub model_id: String,
    pub profile_arn: Option<String>,
    pub thinking: ThinkingConfig,
    pub tool_description_max_length: usize,
}

/// Kiro 载荷构建器
#[derive(Debug, Clone)]
pub struct KiroPayloadBuilder {
    options: PayloadOptions,
}

impl KiroPayloadBuilder {
    pub fn new(options: PayloadOptions) -> Self {
        Self { options }
    }
}

impl RequestTranslator for KiroPayloadBuilder {
    type Input = UnifiedRequest;
    type Output = CodeWhispererRequest;

    fn translate_request(&self, request: UnifiedRequest) -> Result<CodeWhispererRequest, GatewayError> {
        build_kiro_payload(request, &self.options)
    }
}

/// 构建 Kiro 请求
pub fn build_kiro_payload(
    request: UnifiedRequest,
    options: &PayloadOptions,
) -> Result<CodeWhispererRequest, GatewayError> {
    if request.messages.is_empty() {
        return Err(GatewayError::Validation("No messages to send".to_string()));
    }

    let (tools, tool_documentation) =
        process_tools_with_long_descriptions(request.tools, options.tool_description_max_length);
    validate_tool_names(&tools)?;

    let messages = if tools.is_empty() {
        strip_all_tool_content(request.messages).0
    } else {
        ensure_assistant_before_tool_results(request.messages).0
    };
    let mut messages = merge_adjacent_messages(messages);

    if messages.last().map(|m| m.role) == Some(Role::Assistant) {
        messages.push(UnifiedMessage::user(CONTINUE_PROMPT));
    }

    let system_prompt = build_system_prompt(
        &request.system_prompt,
        &tool_documentation,
        &options.thinking,
        request.tool_choice_required,
    );

    let conversation_id = generate_conversation_id(&messages);

    let Some(mut current) = messages.pop() else {
        return Err(GatewayError::Validation("No messages to send".to_string()));
    };

    // 系统提示拼到第一条 user 消息
    if !system_prompt.is_empty() {
        let target = match messages.iter_mut().find(|m| m.role == Role::User) {
            Some(first_user) => first_user,
            None => &mut current,
        };
        target.content = if target.content.is_empty() {
            system_prompt
        } else {
            format!("{}\n\n{}", system_prompt, target.content)
        };
    }

    let history = fix_history_alternation(build_kiro_history(&messages, &options.model_id), &options.model_id);

    let content = if current.content.trim().is_empty() {
        CONTINUE_PROMPT.to_string()
    } else {
        current.content.clone()
    };
    let content = inject_thinking_tags(&content, &options.thinking);

    let context = UserInputMessageContext {
        tools: if tools.is_empty() {
            None
        } else {
            Some(convert_tools_to_kiro_format(&tools))
        },
        tool_results: non_empty(convert_tool_results_to_kiro_format(&current.tool_results)),
    };

    tracing::debug!(
        "[KIRO_CONVERT] 构建载荷: model={}, history={}, tools={}",
        options.model_id,
        history.len(),
        tools.len()
    );

    Ok(CodeWhispererRequest {
        conversation_state: ConversationState {
            chat_trigger_type: CHAT_TRIGGER_TYPE.to_string(),
            conversation_id,
            current_message: CurrentMessage {
                user_input_message: UserInputMessage {
                    content,
                    model_id: options.model_id.clone(),
                    origin: MESSAGE_ORIGIN.to_string(),
                    images: non_empty(convert_images_to_kiro_format(&current.images)),
                    user_input_message_context: if context.is_empty() {
                        None
                    } else {
                        Some(context)
                    },
                },
            },
            history: non_empty(history),
        },
        profile_arn: options.profile_arn.clone(),
    })
}

fn non_empty<T>(items: Vec<T>) -> Option<Vec<T>> {
    if items.is_empty() {
        None
    } else {
        Some(items)
    }
}

/// 统一工具 -> Kiro 工具定义
pub fn convert_tools_to_kiro_format(tools: &[UnifiedTool]) -> Vec<CWTool> {
    tools
        .iter()
        .map(|tool| CWTool {
            tool_specification: ToolSpecification {
                name: tool.name.clone(),
                description: tool_description_or_placeholder(tool),
                input_schema: InputSchema {
                    json: sanitize_json_schema(&tool.input_schema),
                },
            },
        })
        .collect()
}

/// 统一工具结果 -> Kiro 工具结果，空内容替换为占位
pub fn convert_tool_results_to_kiro_format(results: &[UnifiedToolResult]) -> Vec<CWToolResult> {
    results
        .iter()
        .map(|result| CWToolResult {
            content: vec![CWTextContent {
                text: if result.content.is_empty() {
                    EMPTY_TOOL_RESULT_PLACEHOLDER.to_string()
                } else {
                    result.content.clone()
                },
            }],
            status: result.status.as_str().to_string(),
            tool_use_id: result.tool_use_id.clone(),
        })
        .collect()
}

/// 统一工具调用 -> Kiro toolUses，参数无法解析时使用空对象
pub fn convert_tool_uses_to_kiro_format(calls: &[UnifiedToolCall]) -> Vec<CWToolUse> {
    calls
        .iter()
        .map(|call| CWToolUse {
            input: serde_json::from_str(&call.arguments)
                .unwrap_or_else(|_| serde_json::json!({})),
            name: call.name.clone(),
            tool_use_id: call.id.clone(),
        })
        .collect()
}

pub fn convert_images_to_kiro_format(images: &[UnifiedImage]) -> Vec<CWImage> {
    images
        .iter()
        .map(|image| CWImage {
            format: image.format().to_string(),
            source: CWImageSource {
                bytes: image.data.clone(),
            },
        })
        .collect()
}

fn text_or_placeholder(text: &str) -> String {
    if text.trim().is_empty() {
        EMPTY_CONTENT_PLACEHOLDER.to_string()
    } else {
        text.to_string()
    }
}

/// 构建历史消息，system 消息忽略
pub fn build_kiro_history(messages: &[UnifiedMessage], model_id: &str) -> Vec<HistoryItem> {
    messages
        .iter()
        .filter_map(|message| match message.role {
            Role::User => {
                let tool_results = convert_tool_results_to_kiro_format(&message.tool_results);
                let context = UserInputMessageContext {
                    tools: None,
                    tool_results: non_empty(tool_results),
                };
                Some(HistoryItem::User(UserHistoryItem {
                    user_input_message: UserInputMessage {
                        content: text_or_placeholder(&message.content),
                        model_id: model_id.to_string(),
                        origin: MESSAGE_ORIGIN.to_string(),
                        images: non_empty(convert_images_to_kiro_format(&message.images)),
                        user_input_message_context: if context.is_empty() {
                            None
                        } else {
                            Some(context)
                        },
                    },
                }))
            }
            Role::Assistant => Some(HistoryItem::Assistant(AssistantHistoryItem {
                assistant_response_message: AssistantResponseMessage {
                    content: text_or_placeholder(&message.content),
                    tool_uses: non_empty(convert_tool_uses_to_kiro_format(&message.tool_calls)),
                },
            })),
            Role::System => None,
        })
        .collect()
}

fn placeholder_user(model_id: &str) -> HistoryItem {
    HistoryItem::User(UserHistoryItem {
        user_input_message: UserInputMessage {
            content: CONTINUE_PROMPT.to_string(),
            model_id: model_id.to_string(),
            origin: MESSAGE_ORIGIN.to_string(),
            images: None,
            user_input_message_context: None,
        },
    })
}

fn placeholder_assistant() -> HistoryItem {
    HistoryItem::Assistant(AssistantHistoryItem {
        assistant_response_message: AssistantResponseMessage {
            content: "I understand.".to_string(),
            tool_uses: None,
        },
    })
}

/// 确保历史以 user 开头、严格交替并以 assistant 结尾
fn fix_history_alternation(history: Vec<HistoryItem>, model_id: &str) -> Vec<HistoryItem> {
    if history.is_empty() {
        return history;
    }

    let mut fixed: Vec<HistoryItem> = Vec::with_capacity(history.len() + 2);
    for item in history {
        match (&item, fixed.last()) {
            (HistoryItem::User(_), Some(HistoryItem::User(_))) => fixed.push(placeholder_assistant()),
            (HistoryItem::Assistant(_), Some(HistoryItem::Assistant(_))) | (HistoryItem::Assistant(_), None) => {
                fixed.push(placeholder_user(model_id))
            }
            _ => {}
        }
        fixed.push(item);
    }

    if let Some(HistoryItem::User(_)) = fixed.last() {
        fixed.push(placeholder_assistant());
    }
    fixed
}

/// 由对话内容派生稳定的会话 ID
///
/// 取前三条和最后一条消息的角色与前 100 个字符做 SHA-256，保留前 16 位十六进制；
/// 没有消息时使用随机 UUID
pub fn generate_conversation_id(messages: &[UnifiedMessage]) -> String {
    if messages.is_empty() {
        return Uuid::new_v4().to_string();
    }

    let mut key: Vec<&UnifiedMessage> = messages.iter().take(3).collect();
    if messages.len() > 3 {
        if let Some(last) = messages.last() {
            key.push(last);
        }
    }

    let simplified: Vec<serde_json::Value> = key
        .iter()
        .map(|m| {
            let prefix: String = m.content.chars().take(100).collect();
            serde_json::json!({"role": m.role.as_str(), "content": prefix})
        })
        .collect();
    let serialized = serde_json::Value::Array(simplified).to_string();

    let digest = Sha256::digest(serialized.as_bytes());
    digest
        .iter()
        .take(8)
        .map(|b| format!("{:02x}", b))
        .collect()
}
