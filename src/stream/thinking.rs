//! 推理块识别
//!
//! 开启伪推理时，模型会在回答开头输出 `<thinking>...</thinking>`。这里用一个三态
//! 状态机在流式文本中识别该块：
//!
//! ```text
//! PreContent ──(匹配开标签)──> InThinking ──(匹配闭标签)──> Streaming
//!      └──────(不可能是标签)──────────────────────────────────┘
//! ```
//!
//! 只检查响应开头；进入 Streaming 后所有文本原样输出。

use crate::stream::events::KiroEvent;
use serde::{Deserialize, Serialize};

/// 默认识别的开标签
pub const DEFAULT_OPEN_TAGS: &[&str] = &["<thinking>", "<think>", "<reasoning>", "<thought>"];

/// 推理内容的输出方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThinkingMode {
    /// 作为独立的推理内容字段输出
    #[default]
    AsReasoningContent,
    /// 丢弃推理内容
    Remove,
    /// 保留标签，原样作为正文输出
    Pass,
    /// 去掉标签，推理文本并入正文
    StripTags,
}

impl std::str::FromStr for ThinkingMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "as_reasoning_content" => Ok(Self::AsReasoningContent),
            "remove" => Ok(Self::Remove),
            "pass" => Ok(Self::Pass),
            "strip_tags" => Ok(Self::StripTags),
            other => Err(format!("未知的推理输出方式: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThinkingState {
    PreContent,
    InThinking,
    Streaming,
}

/// 单次输入的解析结果
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ThinkingParseResult {
    pub thinking_content: Option<String>,
    pub regular_content: Option<String>,
    pub is_first_thinking_chunk: bool,
    pub is_last_thinking_chunk: bool,
    pub state_changed: bool,
}

/// 推理块状态机
#[derive(Debug, Clone)]
pub struct ThinkingParser {
    mode: ThinkingMode,
    open_tags: Vec<String>,
    initial_buffer_size: usize,
    max_tag_length: usize,
    state: ThinkingState,
    initial_buffer: String,
    thinking_buffer: String,
    open_tag: Option<String>,
    close_tag: Option<String>,
    is_first_thinking_chunk: bool,
    found_thinking_block: bool,
    pass_open_emitted: bool,
}

impl ThinkingParser {
    pub fn new(mode: ThinkingMode, open_tags: Vec<String>, initial_buffer_size: usize) -> Self {
        let open_tags = if open_tags.is_empty() {
            DEFAULT_OPEN_TAGS.iter().map(|t| t.to_string()).collect()
        } else {
            open_tags
        };
        let max_tag_length = open_tags.iter().map(|t| t.len()).max().unwrap_or(0) * 2;

        Self {
            mode,
            open_tags,
            initial_buffer_size,
            max_tag_length,
            state: ThinkingState::PreContent,
            initial_buffer: String::new(),
            thinking_buffer: String::new(),
            open_tag: None,
            close_tag: None,
            is_first_thinking_chunk: true,
            found_thinking_block: false,
            pass_open_emitted: false,
        }
    }

    pub fn with_defaults(mode: ThinkingMode) -> Self {
        Self::new(mode, Vec::new(), 20)
    }

    pub fn state(&self) -> ThinkingState {
        self.state
    }

    pub fn found_thinking_block(&self) -> bool {
        self.found_thinking_block
    }

    pub fn mode(&self) -> ThinkingMode {
        self.mode
    }

    /// 输入一段文本
    pub fn feed(&mut self, content: &str) -> ThinkingParseResult {
        let mut result = ThinkingParseResult::default();
        if content.is_empty() {
            return result;
        }

        match self.state {
            ThinkingState::PreContent => {
                self.initial_buffer.push_str(content);
                self.handle_pre_content(&mut result);
            }
            ThinkingState::InThinking => {
                self.thinking_buffer.push_str(content);
                self.process_thinking_buffer(&mut result);
            }
            ThinkingState::Streaming => {
                result.regular_content = Some(content.to_string());
            }
        }

        result
    }

    /// 流结束时刷新缓冲区
    pub fn finalize(&mut self) -> ThinkingParseResult {
        let mut result = ThinkingParseResult::default();

        match self.state {
            ThinkingState::InThinking => {
                let thinking = std::mem::take(&mut self.thinking_buffer);
                if !thinking.is_empty() {
                    result.thinking_content = Some(thinking);
                    result.is_first_thinking_chunk = self.is_first_thinking_chunk;
                    self.is_first_thinking_chunk = false;
                }
                result.is_last_thinking_chunk = true;
                result.state_changed = true;
                self.state = ThinkingState::Streaming;
            }
            ThinkingState::PreContent => {
                let buffered = std::mem::take(&mut self.initial_buffer);
                if !buffered.is_empty() {
                    result.regular_content = Some(buffered);
                }
                result.state_changed = true;
                self.state = ThinkingState::Streaming;
            }
            ThinkingState::Streaming => {}
        }

        result
    }

    fn handle_pre_content(&mut self, result: &mut ThinkingParseResult) {
        let stripped = self.initial_buffer.trim_start().to_string();

        let matched = self
            .open_tags
            .iter()
            .find(|tag| stripped.starts_with(tag.as_str()))
            .cloned();
        if let Some(tag) = matched {
            tracing::debug!("[THINKING] 识别到推理块开标签: {}", tag);
            self.close_tag = Some(format!("</{}", &tag[1..]));
            self.thinking_buffer = stripped[tag.len()..].to_string();
            self.open_tag = Some(tag);
            self.initial_buffer.clear();
            self.state = ThinkingState::InThinking;
            self.found_thinking_block = true;
            result.state_changed = true;
            self.process_thinking_buffer(result);
            return;
        }

        if stripped.is_empty() {
            if self.initial_buffer.len() <= self.initial_buffer_size {
                return;
            }
        } else if self.initial_buffer.len() <= self.initial_buffer_size
            && self
                .open_tags
                .iter()
                .any(|tag| tag.starts_with(stripped.as_str()))
        {
            // 可能是标签前缀，等待更多数据
            return;
        }

        self.state = ThinkingState::Streaming;
        result.state_changed = true;
        result.regular_content = Some(std::mem::take(&mut self.initial_buffer));
    }

    fn process_thinking_buffer(&mut self, result: &mut ThinkingParseResult) {
        let Some(close_tag) = self.close_tag.clone() else {
            return;
        };

        if let Some(idx) = self.thinking_buffer.find(&close_tag) {
            let thinking = self.thinking_buffer[..idx].to_string();
            let after = self.thinking_buffer[idx + close_tag.len()..]
                .trim_start()
                .to_string();
            self.thinking_buffer.clear();
            self.state = ThinkingState::Streaming;
            result.state_changed = true;

            if !thinking.is_empty() {
                result.thinking_content = Some(thinking);
                result.is_first_thinking_chunk = self.is_first_thinking_chunk;
                self.is_first_thinking_chunk = false;
            }
            result.is_last_thinking_chunk = true;

            if !after.is_empty() {
                result.regular_content = Some(after);
            }
            return;
        }

        // 闭标签可能被切分，保留尾部 max_tag_length 字节
        if self.thinking_buffer.len() > self.max_tag_length {
            let split = floor_char_boundary(
                &self.thinking_buffer,
                self.thinking_buffer.len() - self.max_tag_length,
            );
            if split == 0 {
                return;
            }
            let rest = self.thinking_buffer.split_off(split);
            let send = std::mem::replace(&mut self.thinking_buffer, rest);
            result.thinking_content = Some(send);
            result.is_first_thinking_chunk = self.is_first_thinking_chunk;
            self.is_first_thinking_chunk = false;
        }
    }

    /// 按输出方式把解析结果转为事件
    pub fn render(&mut self, result: ThinkingParseResult) -> Vec<KiroEvent> {
        let mut events = Vec::new();

        match self.mode {
            ThinkingMode::AsReasoningContent => {
                if let Some(text) = result.thinking_content.filter(|t| !t.is_empty()) {
                    events.push(KiroEvent::Thinking(text));
                }
            }
            ThinkingMode::Remove => {}
            ThinkingMode::StripTags => {
                if let Some(text) = result.thinking_content.filter(|t| !t.is_empty()) {
                    events.push(KiroEvent::Content(text));
                }
            }
            ThinkingMode::Pass => {
                let text = result.thinking_content.unwrap_or_default();
                if !text.is_empty() || result.is_last_thinking_chunk {
                    let mut out = String::new();
                    if !self.pass_open_emitted {
                        out.push_str(self.open_tag.as_deref().unwrap_or("<thinking>"));
                        self.pass_open_emitted = true;
                    }
                    out.push_str(&text);
                    if result.is_last_thinking_chunk {
                        out.push_str(self.close_tag.as_deref().unwrap_or("</thinking>"));
                    }
                    events.push(KiroEvent::Content(out));
                }
            }
        }

        if let Some(text) = result.regular_content.filter(|t| !t.is_empty()) {
            events.push(KiroEvent::Content(text));
        }

        events
    }
}

fn floor_char_boundary(s: &str, mut index: usize) -> usize {
    if index >= s.len() {
        return s.len();
    }
    while index > 0 && !s.is_char_boundary(index) {
        index -= 1;
    }
    index
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collect(parser: &mut ThinkingParser, chunks: &[&str]) -> (String, String) {
        let mut thinking = String::new();
        let mut regular = String::new();
        for chunk in chunks {
            let result = parser.feed(chunk);
            thinking.push_str(result.thinking_content.as_deref().unwrap_or(""));
            regular.push_str(result.regular_content.as_deref().unwrap_or(""));
        }
        let result = parser.finalize();
        thinking.push_str(result.thinking_content.as_deref().unwrap_or(""));
        regular.push_str(result.regular_content.as_deref().unwrap_or(""));
        (thinking, regular)
    }

    #[test]
    fn test_single_chunk() {
        let mut parser = ThinkingParser::with_defaults(ThinkingMode::AsReasoningContent);
        let (thinking, regular) = collect(&mut parser, &["<thinking>reason</thinking>answer"]);
        assert_eq!(thinking, "reason");
        assert_eq!(regular, "answer");
        assert!(parser.found_thinking_block());
    }

    #[test]
    fn test_byte_by_byte_equals_single_chunk() {
        let input = "<thinking>reason</thinking>answer";
        let chunks: Vec<String> = input.chars().map(|c| c.to_string()).collect();
        let refs: Vec<&str> = chunks.iter().map(String::as_str).collect();
        let mut parser = ThinkingParser::with_defaults(ThinkingMode::AsReasoningContent);
        assert_eq!(
            collect(&mut parser, &refs),
            ("reason".to_string(), "answer".to_string())
        );
    }

    #[test]
    fn test_leading_whitespace_and_whitespace_after_close() {
        let mut parser = ThinkingParser::with_defaults(ThinkingMode::AsReasoningContent);
        let (thinking, regular) = collect(&mut parser, &["\n  <think>", "x</think>\n\n", "y"]);
        assert_eq!(thinking, "x");
        assert_eq!(regular, "y");
    }

    #[test]
    fn test_no_tag_streams_immediately() {
        let mut parser = ThinkingParser::with_defaults(ThinkingMode::AsReasoningContent);
        let result = parser.feed("Hello");
        assert_eq!(result.regular_content.as_deref(), Some("Hello"));
        assert_eq!(parser.state(), ThinkingState::Streaming);
        assert_eq!(parser.feed("<thinking>").regular_content.as_deref(), Some("<thinking>"));
    }

    #[test]
    fn test_partial_prefix_waits() {
        let mut parser = ThinkingParser::with_defaults(ThinkingMode::AsReasoningContent);
        let result = parser.feed("<thi");
        assert_eq!(result, ThinkingParseResult::default());
        assert_eq!(parser.state(), ThinkingState::PreContent);
    }

    #[test]
    fn test_prefix_that_diverges_becomes_content() {
        let mut parser = ThinkingParser::with_defaults(ThinkingMode::AsReasoningContent);
        let (thinking, regular) = collect(&mut parser, &["<th", "e end"]);
        assert_eq!(thinking, "");
        assert_eq!(regular, "<the end");
    }

    #[test]
    fn test_unclosed_block_flushed_on_finalize() {
        let mut parser = ThinkingParser::with_defaults(ThinkingMode::AsReasoningContent);
        let (thinking, regular) = collect(&mut parser, &["<thinking>still thinking"]);
        assert_eq!(thinking, "still thinking");
        assert_eq!(regular, "");
    }

    #[test]
    fn test_long_thinking_is_flushed_incrementally() {
        let mut parser = ThinkingParser::with_defaults(ThinkingMode::AsReasoningContent);
        parser.feed("<thinking>");
        let result = parser.feed(&"a".repeat(100));
        let flushed = result.thinking_content.unwrap();
        assert_eq!(flushed.len(), 100 - parser.max_tag_length);
        assert!(result.is_first_thinking_chunk);
    }

    #[test]
    fn test_multibyte_thinking_split_is_safe() {
        let mut parser = ThinkingParser::with_defaults(ThinkingMode::AsReasoningContent);
        let text = "思".repeat(30);
        let (thinking, regular) =
            collect(&mut parser, &["<thinking>", &text, "</thinking>", "答"]);
        assert_eq!(thinking, text);
        assert_eq!(regular, "答");
    }

    #[test]
    fn test_render_pass_mode_wraps_tags() {
        let mut parser = ThinkingParser::with_defaults(ThinkingMode::Pass);
        let mut events = Vec::new();
        for chunk in ["<thinking>", "abc", "</thinking>", "done"] {
            let result = parser.feed(chunk);
            events.extend(parser.render(result));
        }
        let result = parser.finalize();
        events.extend(parser.render(result));

        let text: String = events
            .iter()
            .map(|e| match e {
                KiroEvent::Content(t) => t.as_str(),
                _ => "",
            })
            .collect();
        assert_eq!(text, "<thinking>abc</thinking>done");
    }

    #[test]
    fn test_render_modes() {
        let result = ThinkingParseResult {
            thinking_content: Some("why".into()),
            regular_content: Some("what".into()),
            is_first_thinking_chunk: true,
            is_last_thinking_chunk: true,
            state_changed: true,
        };

        let mut reasoning = ThinkingParser::with_defaults(ThinkingMode::AsReasoningContent);
        assert_eq!(
            reasoning.render(result.clone()),
            vec![
                KiroEvent::Thinking("why".into()),
                KiroEvent::Content("what".into())
            ]
        );

        let mut remove = ThinkingParser::with_defaults(ThinkingMode::Remove);
        assert_eq!(
            remove.render(result.clone()),
            vec![KiroEvent::Content("what".into())]
        );

        let mut strip = ThinkingParser::with_defaults(ThinkingMode::StripTags);
        assert_eq!(
            strip.render(result),
            vec![
                KiroEvent::Content("why".into()),
                KiroEvent::Content("what".into())
            ]
        );
    }

    #[test]
    fn test_mode_from_str() {
        assert_eq!("pass".parse::<ThinkingMode>(), Ok(ThinkingMode::Pass));
        assert_eq!(
            "AS_REASONING_CONTENT".parse::<ThinkingMode>(),
            Ok(ThinkingMode::AsReasoningContent)
        );
        assert!("bogus".parse::<ThinkingMode>().is_err());
    }
}
