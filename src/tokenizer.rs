//! Token 估算
//!
//! 使用 tiktoken 的 cl100k_base 编码估算 token 数，再乘以 Claude 修正系数。
//! 编码器初始化失败时退化为按字符数估算。
use crate::models::{UnifiedMessage, UnifiedTool};
use once_cell::sync::Lazy;
use std::sync::Arc;

/// Claude 分词比 cl100k_base 多出约 15%
pub const CLAUDE_CORRECTION_FACTOR: f64 = 1.15;

/// 每条消息的格式化开销
const TOKENS_PER_MESSAGE: u32 = 4;
/// 回复前缀开销
const REPLY_PRIMING_TOKENS: u32 = 3;

static CL100K: Lazy<Option<Arc<tiktoken_rs::CoreBPE>>> = Lazy::new(|| match tiktoken_rs::cl100k_base() {
    Ok(bpe) => Some(Arc::new(bpe)),
    Err(e) => {
        tracing::warn!("[TOKENIZER] 初始化 cl100k_base 失败，使用字符数估算: {}", e);
        None
    }
});

/// Token 估算器
#[derive(Clone)]
pub struct TokenEstimator {
    bpe: Option<Arc<tiktoken_rs::CoreBPE>>,
    correction: f64,
}

impl std::fmt::Debug for TokenEstimator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenEstimator")
            .field("tiktoken", &self.bpe.is_some())
            .field("correction", &self.correction)
            .finish()
    }
}

impl TokenEstimator {
    pub fn new() -> Self {
        Self {
            bpe: CL100K.clone(),
            correction: CLAUDE_CORRECTION_FACTOR,
        }
    }

    /// 仅按字符数估算
    pub fn heuristic() -> Self {
        Self {
            bpe: None,
            correction: CLAUDE_CORRECTION_FACTOR,
        }
    }

    fn raw_count(&self, text: &str) -> u32 {
        match &self.bpe {
            Some(bpe) => bpe.encode_with_special_tokens(text).len() as u32,
            None => (text.len() / 4 + 1) as u32,
        }
    }

    fn corrected(&self, raw: u32) -> u32 {
        (raw as f64 * self.correction).round() as u32
    }

    /// 估算文本的 token 数
    pub fn count_tokens(&self, text: &str) -> u32 {
        if text.is_empty() {
            return 0;
        }
        self.corrected(self.raw_count(text))
    }

    /// 估算消息列表的 token 数，包含格式化开销
    pub fn count_message_tokens(&self, messages: &[UnifiedMessage]) -> u32 {
        if messages.is_empty() {
            return 0;
        }
        let mut raw = 0u32;
        for message in messages {
            raw += TOKENS_PER_MESSAGE;
            raw += self.raw_count(message.role.as_str());
            if !message.content.is_empty() {
                raw += self.raw_count(&message.content);
            }
            for call in &message.tool_calls {
                raw += self.raw_count(&call.name);
                raw += self.raw_count(&call.arguments);
            }
            for result in &message.tool_results {
                raw += self.raw_count(&result.content);
            }
            // 图片按固定开销计
            raw += 100 * message.images.len() as u32;
        }
        raw += REPLY_PRIMING_TOKENS;
        self.corrected(raw)
    }

    /// 估算工具定义的 token 数
    pub fn count_tools_tokens(&self, tools: &[UnifiedTool]) -> u32 {
        if tools.is_empty() {
            return 0;
        }
        let mut raw = 0u32;
        for tool in tools {
            raw += TOKENS_PER_MESSAGE;
            raw += self.raw_count(&tool.name);
            raw += self.raw_count(&tool.description);
            raw += self.raw_count(&tool.input_schema.to_string());
        }
        self.corrected(raw)
    }

    /// 估算整个请求的输入 token 数
    pub fn estimate_request_tokens(
        &self,
        system_prompt: &str,
        messages: &[UnifiedMessage],
        tools: &[UnifiedTool],
    ) -> u32 {
        self.count_tokens(system_prompt)
            + self.count_message_tokens(messages)
            + self.count_tools_tokens(tools)
    }
}

impl Default for TokenEstimator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::UnifiedToolCall;

    #[test]
    fn test_empty_text_is_zero() {
        assert_eq!(TokenEstimator::new().count_tokens(""), 0);
        assert_eq!(TokenEstimator::new().count_message_tokens(&[]), 0);
    }

    #[test]
    fn test_heuristic_applies_correction() {
        let estimator = TokenEstimator::heuristic();
        // 40 字节 -> 11 -> round(12.65) = 13
        assert_eq!(estimator.count_tokens(&"a".repeat(40)), 13);
    }

    #[test]
    fn test_longer_text_has_more_tokens() {
        let estimator = TokenEstimator::new();
        let short = estimator.count_tokens("hello");
        let long = estimator.count_tokens(&"hello world, this is a longer sentence. ".repeat(20));
        assert!(short > 0);
        assert!(long > short);
    }

    #[test]
    fn test_message_tokens_include_tool_calls() {
        let estimator = TokenEstimator::heuristic();
        let plain = vec![UnifiedMessage::assistant("ok")];
        let with_call = vec![UnifiedMessage::assistant("ok").with_tool_calls(vec![UnifiedToolCall {
            id: "c1".into(),
            name: "search".into(),
            arguments: r#"{"query":"rust async streams"}"#.into(),
        }])];
        assert!(estimator.count_message_tokens(&with_call) > estimator.count_message_tokens(&plain));
    }

    #[test]
    fn test_request_estimate_sums_parts() {
        let estimator = TokenEstimator::heuristic();
        let messages = vec![UnifiedMessage::user("What is the weather?")];
        let tools = vec![UnifiedTool {
            name: "weather".into(),
            description: "Get weather".into(),
            input_schema: serde_json::json!({"type": "object"}),
        }];
        let total = estimator.estimate_request_tokens("Be brief.", &messages, &tools);
        assert_eq!(
            total,
            estimator.count_tokens("Be brief.")
                + estimator.count_message_tokens(&messages)
                + estimator.count_tools_tokens(&tools)
        );
    }
}
