//! Kiro 流事件类型
//!
//! 解码器 (parsers) 输出 `KiroEvent`，生成器 (generators) 消费 `KiroEvent`
//! 并渲染为 OpenAI 或 Anthropic 的 SSE 帧。

use serde::{Deserialize, Serialize};

/// 已完成的工具调用，`arguments` 为规范化后的 JSON 文本
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: String,
}

/// Kiro 流事件
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum KiroEvent {
    /// 文本内容增量
    Content(String),

    /// 推理内容增量（仅在推理内容模式下产生）
    Thinking(String),

    /// 工具调用开始
    ToolUseStart {
        /// 工具调用 ID
        id: String,
        /// 工具名称
        name: String,
    },

    /// 工具调用参数增量（部分 JSON）
    ToolUseInput {
        /// 工具调用 ID
        id: String,
        /// 参数增量
        partial_json: String,
    },

    /// 工具调用结束，携带完整的调用
    ToolUseStop(ToolCall),

    /// 上游报告的用量（通常是 credits）
    Usage(serde_json::Value),

    /// 上下文使用百分比
    ContextUsage(f64),
}

/// 停止原因
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum StopReason {
    /// 正常结束
    #[default]
    EndTurn,
    /// 达到最大 token 数
    MaxTokens,
    /// 需要工具调用
    ToolUse,
}

impl StopReason {
    /// 根据是否产生工具调用推断停止原因
    pub fn from_tool_calls(has_tool_calls: bool) -> Self {
        if has_tool_calls {
            Self::ToolUse
        } else {
            Self::EndTurn
        }
    }

    /// 转换为 OpenAI 格式的字符串
    pub fn to_openai_str(&self) -> &'static str {
        match self {
            Self::EndTurn => "stop",
            Self::MaxTokens => "length",
            Self::ToolUse => "tool_calls",
        }
    }

    /// 转换为 Anthropic 格式的字符串
    pub fn to_anthropic_str(&self) -> &'static str {
        match self {
            Self::EndTurn => "end_turn",
            Self::MaxTokens => "max_tokens",
            Self::ToolUse => "tool_use",
        }
    }
}
