//! 流结果聚合
//!
//! 把一串 `KiroEvent` 折叠成完整的结果，用于非流式响应以及流式响应结束时的
//! 工具调用汇总与用量计算。

use crate::stream::events::{KiroEvent, StopReason, ToolCall};
use crate::stream::parsers::{
    assign_missing_ids, deduplicate_tool_calls, parse_bracket_tool_calls,
    strip_bracket_tool_calls,
};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct StreamResult {
    pub content: String,
    pub thinking_content: String,
    pub tool_calls: Vec<ToolCall>,
    pub usage: Option<serde_json::Value>,
    pub context_usage_percentage: Option<f64>,
}

impl StreamResult {
    pub fn new() -> Self {
        Self::default()
    }

    /// 从事件序列构建
    pub fn from_events<'a>(events: impl IntoIterator<Item = &'a KiroEvent>) -> Self {
        let mut result = Self::new();
        for event in events {
            result.push(event);
        }
        result
    }

    /// 累积一个事件
    pub fn push(&mut self, event: &KiroEvent) {
        match event {
            KiroEvent::Content(text) => self.content.push_str(text),
            KiroEvent::Thinking(text) => self.thinking_content.push_str(text),
            KiroEvent::ToolUseStop(call) => self.tool_calls.push(call.clone()),
            KiroEvent::Usage(usage) => self.usage = Some(usage.clone()),
            KiroEvent::ContextUsage(pct) => self.context_usage_percentage = Some(*pct),
            KiroEvent::ToolUseStart { .. } | KiroEvent::ToolUseInput { .. } => {}
        }
    }

    /// 合并正文中的文本工具调用并去重，返回最终的工具调用列表
    pub fn collect_tool_calls(&self) -> Vec<ToolCall> {
        let mut calls = self.tool_calls.clone();
        calls.extend(parse_bracket_tool_calls(&self.content));
        let mut calls = deduplicate_tool_calls(calls);
        assign_missing_ids(&mut calls);
        calls
    }

    /// 结束处理：合并文本工具调用并从正文中移除其写法（用于非流式响应）
    pub fn finish(mut self) -> Self {
        self.tool_calls = self.collect_tool_calls();
        self.content = strip_bracket_tool_calls(&self.content);
        self
    }

    pub fn stop_reason(&self) -> StopReason {
        StopReason::from_tool_calls(!self.tool_calls.is_empty())
    }

    /// 上游报告的 credits 用量
    pub fn credits_used(&self) -> Option<f64> {
        self.usage.as_ref().and_then(|u| u.as_f64())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fold_events() {
        let events = vec![
            KiroEvent::Content("Hello".into()),
            KiroEvent::Thinking("hmm".into()),
            KiroEvent::Content(" world".into()),
            KiroEvent::Usage(serde_json::json!(0.5)),
            KiroEvent::ContextUsage(12.5),
        ];
        let result = StreamResult::from_events(&events);
        assert_eq!(result.content, "Hello world");
        assert_eq!(result.thinking_content, "hmm");
        assert_eq!(result.credits_used(), Some(0.5));
        assert_eq!(result.context_usage_percentage, Some(12.5));
        assert_eq!(result.stop_reason(), StopReason::EndTurn);
    }

    #[test]
    fn test_finish_merges_bracket_calls() {
        let events = vec![
            KiroEvent::Content(r#"Let me check. [Called lookup with args: {"id": 7}]"#.into()),
            KiroEvent::ToolUseStop(ToolCall {
                id: "t1".into(),
                name: "other".into(),
                arguments: "{}".into(),
            }),
        ];
        let result = StreamResult::from_events(&events).finish();
        assert_eq!(result.content, "Let me check.");
        assert_eq!(result.tool_calls.len(), 2);
        assert_eq!(result.tool_calls[0].id, "t1");
        assert_eq!(result.tool_calls[1].name, "lookup");
        assert_eq!(result.tool_calls[1].arguments, r#"{"id":7}"#);
        assert!(result.tool_calls[1].id.starts_with("call_"));
        assert_eq!(result.stop_reason(), StopReason::ToolUse);
    }

    #[test]
    fn test_bracket_duplicate_of_structured_call_is_dropped() {
        let events = vec![
            KiroEvent::ToolUseStop(ToolCall {
                id: "t1".into(),
                name: "lookup".into(),
                arguments: r#"{"id":7}"#.into(),
            }),
            KiroEvent::Content(r#"[Called lookup with args: {"id": 7}]"#.into()),
        ];
        let result = StreamResult::from_events(&events).finish();
        assert_eq!(result.tool_calls.len(), 1);
        assert_eq!(result.tool_calls[0].id, "t1");
        assert_eq!(result.content, "");
    }
}
