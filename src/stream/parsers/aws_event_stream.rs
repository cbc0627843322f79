//! AWS Event Stream 解码器
//!
//! Kiro 的响应体是 AWS Event Stream 二进制帧，每帧的载荷是一个 JSON 对象：
//!
//! ```text
//! [binary headers]{"content":"Hello"}[crc][binary headers]{"name":"f","toolUseId":"t1"}[crc]...
//! ```
//!
//! 这里不解析二进制头，而是在字节流中定位已知的 JSON 起始模式，再用括号匹配
//! 截取完整对象。输入按字节缓冲，因此 chunk 可以在任意位置（包括多字节 UTF-8
//! 字符中间）切分，解码结果与一次性输入完全一致。

use crate::stream::events::{KiroEvent, ToolCall};

/// 已知的帧起始模式
const FRAME_PATTERNS: &[&[u8]] = &[
    b"{\"content\":",
    b"{\"name\":",
    b"{\"input\":",
    b"{\"stop\":",
    b"{\"toolUseId\":",
    b"{\"followupPrompt\":",
    b"{\"usage\":",
    b"{\"unit\":",
    b"{\"contextUsagePercentage\":",
];

/// 最长模式的长度，用于在无匹配时保留缓冲尾部
fn max_pattern_len() -> usize {
    FRAME_PATTERNS.iter().map(|p| p.len()).max().unwrap_or(0)
}

/// 在字节数组中查找子序列
pub fn find_subsequence(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

/// 查找 `bytes` 开头 JSON 对象的结束位置（不含）
///
/// 对象未闭合时返回 `None`
pub fn find_json_end(bytes: &[u8]) -> Option<usize> {
    if bytes.first() != Some(&b'{') {
        return None;
    }

    let mut depth = 0usize;
    let mut in_string = false;
    let mut escape_next = false;

    for (i, &b) in bytes.iter().enumerate() {
        if escape_next {
            escape_next = false;
            continue;
        }

        match b {
            b'\\' if in_string => escape_next = true,
            b'"' => in_string = !in_string,
            b'{' if !in_string => depth += 1,
            b'}' if !in_string => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return Some(i + 1);
                }
            }
            _ => {}
        }
    }

    None
}

/// 生成 `call_` 前缀的 8 位十六进制 ID
pub fn generate_tool_call_id() -> String {
    let uuid = uuid::Uuid::new_v4().simple().to_string();
    format!("call_{}", &uuid[..8])
}

/// 规范化工具参数：空串或非法 JSON 变为 `{}`，合法 JSON 重新序列化
pub fn normalize_arguments(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return "{}".to_string();
    }
    match serde_json::from_str::<serde_json::Value>(trimmed) {
        Ok(value) => serde_json::to_string(&value).unwrap_or_else(|_| "{}".to_string()),
        Err(e) => {
            tracing::warn!(
                "[KIRO_STREAM] 工具参数不是合法 JSON，替换为空对象: {} ({})",
                e,
                truncate(trimmed, 200)
            );
            "{}".to_string()
        }
    }
}

fn truncate(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        s.to_string()
    } else {
        let head: String = s.chars().take(max_chars).collect();
        format!("{head}...")
    }
}

/// 正在累积的工具调用
#[derive(Debug, Clone)]
struct PendingToolCall {
    id: String,
    name: String,
    arguments: String,
}

impl PendingToolCall {
    fn finish(self) -> ToolCall {
        ToolCall {
            id: self.id,
            name: self.name,
            arguments: normalize_arguments(&self.arguments),
        }
    }
}

/// 解码器状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ParserState {
    /// 等待下一帧
    #[default]
    Idle,
    /// 正在接收工具调用参数
    InToolCall,
}

/// AWS Event Stream 解码器
#[derive(Debug, Default)]
pub struct AwsEventStreamParser {
    buffer: Vec<u8>,
    last_content: Option<String>,
    current_tool: Option<PendingToolCall>,
}

impl AwsEventStreamParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// 当前状态
    pub fn state(&self) -> ParserState {
        if self.current_tool.is_some() {
            ParserState::InToolCall
        } else {
            ParserState::Idle
        }
    }

    /// 输入一个 chunk，返回解出的事件
    pub fn process(&mut self, chunk: &[u8]) -> Vec<KiroEvent> {
        self.buffer.extend_from_slice(chunk);
        let mut events = Vec::new();
        let mut pos = 0;

        loop {
            let start = match self.next_frame_start(pos) {
                Some(start) => start,
                None => {
                    // 保留可能是模式前缀的尾部
                    let keep = max_pattern_len().saturating_sub(1);
                    pos = pos.max(self.buffer.len().saturating_sub(keep));
                    break;
                }
            };

            let end = match find_json_end(&self.buffer[start..]) {
                Some(len) => start + len,
                None => {
                    // 帧不完整，等待更多数据
                    pos = start;
                    break;
                }
            };

            match serde_json::from_slice::<serde_json::Value>(&self.buffer[start..end]) {
                Ok(value) => self.handle_frame(&value, &mut events),
                Err(e) => tracing::debug!("[KIRO_STREAM] 跳过无法解析的帧: {}", e),
            }
            pos = end;
        }

        self.buffer.drain(..pos);
        events
    }

    /// 流结束：完成未收到 stop 的工具调用
    pub fn finish(&mut self) -> Vec<KiroEvent> {
        self.buffer.clear();
        self.finalize_tool_call().into_iter().collect()
    }

    /// 清空全部状态以便复用
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.last_content = None;
        self.current_tool = None;
    }

    fn next_frame_start(&self, from: usize) -> Option<usize> {
        let window = &self.buffer[from..];
        FRAME_PATTERNS
            .iter()
            .filter_map(|pattern| find_subsequence(window, pattern))
            .min()
            .map(|idx| from + idx)
    }

    fn handle_frame(&mut self, value: &serde_json::Value, events: &mut Vec<KiroEvent>) {
        if let Some(content) = value.get("content").and_then(|v| v.as_str()) {
            if value.get("followupPrompt").is_some() {
                return;
            }
            if self.last_content.as_deref() == Some(content) {
                tracing::debug!("[KIRO_STREAM] 跳过重复的内容帧");
                return;
            }
            self.last_content = Some(content.to_string());
            events.push(KiroEvent::Content(content.to_string()));
            return;
        }

        if value.get("followupPrompt").is_some() {
            return;
        }

        let is_tool_frame = ["name", "toolUseId", "input", "stop"]
            .iter()
            .any(|key| value.get(*key).is_some());
        if is_tool_frame {
            self.last_content = None;
            self.handle_tool_frame(value, events);
            return;
        }

        if let Some(usage) = value.get("usage") {
            self.last_content = None;
            events.push(KiroEvent::Usage(usage.clone()));
            return;
        }

        if let Some(pct) = value
            .get("contextUsagePercentage")
            .and_then(|v| v.as_f64())
        {
            self.last_content = None;
            events.push(KiroEvent::ContextUsage(pct));
        }
    }

    fn handle_tool_frame(&mut self, value: &serde_json::Value, events: &mut Vec<KiroEvent>) {
        let id = value
            .get("toolUseId")
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty());
        let name = value
            .get("name")
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty());

        let continues_current = match (&self.current_tool, id) {
            (Some(current), Some(id)) => current.id == id,
            (Some(_), None) => name.is_none(),
            (None, _) => false,
        };

        if !continues_current && (id.is_some() || name.is_some()) {
            if let Some(finished) = self.finalize_tool_call() {
                events.push(finished);
            }
            let pending = PendingToolCall {
                id: id.map(str::to_string).unwrap_or_else(generate_tool_call_id),
                name: name.unwrap_or_default().to_string(),
                arguments: String::new(),
            };
            events.push(KiroEvent::ToolUseStart {
                id: pending.id.clone(),
                name: pending.name.clone(),
            });
            self.current_tool = Some(pending);
        } else if let (Some(current), Some(name)) = (self.current_tool.as_mut(), name) {
            if current.name.is_empty() {
                current.name = name.to_string();
            }
        }

        let input = match value.get("input") {
            Some(serde_json::Value::String(s)) => s.clone(),
            Some(serde_json::Value::Null) | None => String::new(),
            Some(other) => other.to_string(),
        };
        if !input.is_empty() {
            if let Some(current) = self.current_tool.as_mut() {
                current.arguments.push_str(&input);
                events.push(KiroEvent::ToolUseInput {
                    id: current.id.clone(),
                    partial_json: input,
                });
            }
        }

        if value.get("stop").and_then(|v| v.as_bool()).unwrap_or(false) {
            if let Some(finished) = self.finalize_tool_call() {
                events.push(finished);
            }
        }
    }

    fn finalize_tool_call(&mut self) -> Option<KiroEvent> {
        let pending = self.current_tool.take()?;
        if pending.name.is_empty() {
            tracing::warn!("[KIRO_STREAM] 丢弃没有名称的工具调用: {}", pending.id);
            return None;
        }
        Some(KiroEvent::ToolUseStop(pending.finish()))
    }
}

/// 一次性解码完整响应体
pub fn parse_all(bytes: &[u8]) -> Vec<KiroEvent> {
    let mut parser = AwsEventStreamParser::new();
    let mut events = parser.process(bytes);
    events.extend(parser.finish());
    events
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(json: &str) -> Vec<u8> {
        let mut bytes = vec![0x00, 0x00, 0x01, 0x2a, 0x0b, b':', b'e', b'v'];
        bytes.extend_from_slice(json.as_bytes());
        bytes.extend_from_slice(&[0xde, 0xad, 0xbe, 0xef]);
        bytes
    }

    fn body(frames: &[&str]) -> Vec<u8> {
        frames.iter().flat_map(|f| frame(f)).collect()
    }

    #[test]
    fn test_find_subsequence() {
        assert_eq!(find_subsequence(b"hello world", b"world"), Some(6));
        assert_eq!(find_subsequence(b"hello", b"xyz"), None);
        assert_eq!(find_subsequence(b"ab", b"abc"), None);
    }

    #[test]
    fn test_find_json_end() {
        assert_eq!(find_json_end(br#"{"a":"}"}tail"#), Some(9));
        assert_eq!(find_json_end(br#"{"a":{"b":1}}x"#), Some(13));
        assert_eq!(find_json_end(br#"{"a":"\"}"}"#), Some(11));
        assert_eq!(find_json_end(br#"{"a":1"#), None);
        assert_eq!(find_json_end(b"x{}"), None);
    }

    #[test]
    fn test_content_frames() {
        let events = parse_all(&body(&[
            r#"{"content":"Hello"}"#,
            r#"{"content":" world"}"#,
        ]));
        assert_eq!(
            events,
            vec![
                KiroEvent::Content("Hello".into()),
                KiroEvent::Content(" world".into())
            ]
        );
    }

    #[test]
    fn test_duplicate_content_suppressed() {
        let events = parse_all(&body(&[
            r#"{"content":"a"}"#,
            r#"{"content":"a"}"#,
            r#"{"content":"b"}"#,
        ]));
        assert_eq!(
            events,
            vec![KiroEvent::Content("a".into()), KiroEvent::Content("b".into())]
        );
    }

    #[test]
    fn test_followup_prompt_skipped() {
        let events = parse_all(&body(&[
            r#"{"content":"x","followupPrompt":{"content":"y"}}"#,
            r#"{"followupPrompt":{"content":"z"}}"#,
            r#"{"content":"real"}"#,
        ]));
        assert_eq!(events, vec![KiroEvent::Content("real".into())]);
    }

    #[test]
    fn test_tool_call_sequence() {
        let events = parse_all(&body(&[
            r#"{"name":"get_weather","toolUseId":"tool_1"}"#,
            r#"{"input":"{\"city\":"}"#,
            r#"{"input":"\"Paris\"}"}"#,
            r#"{"stop":true}"#,
        ]));
        assert_eq!(
            events.first(),
            Some(&KiroEvent::ToolUseStart {
                id: "tool_1".into(),
                name: "get_weather".into()
            })
        );
        assert_eq!(
            events.last(),
            Some(&KiroEvent::ToolUseStop(ToolCall {
                id: "tool_1".into(),
                name: "get_weather".into(),
                arguments: r#"{"city":"Paris"}"#.into()
            }))
        );
    }

    #[test]
    fn test_repeated_frames_with_same_id_accumulate() {
        let events = parse_all(&body(&[
            r#"{"name":"f","toolUseId":"t1","input":"{\"a\":"}"#,
            r#"{"name":"f","toolUseId":"t1","input":"1}"}"#,
            r#"{"name":"f","toolUseId":"t1","stop":true}"#,
        ]));
        let stops: Vec<_> = events
            .iter()
            .filter_map(|e| match e {
                KiroEvent::ToolUseStop(call) => Some(call.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(stops.len(), 1);
        assert_eq!(stops[0].arguments, r#"{"a":1}"#);
    }

    #[test]
    fn test_new_tool_start_finalizes_previous() {
        let events = parse_all(&body(&[
            r#"{"name":"a","toolUseId":"t1","input":"{}"}"#,
            r#"{"name":"b","toolUseId":"t2","input":{"k":"v"},"stop":true}"#,
        ]));
        let stops: Vec<_> = events
            .iter()
            .filter_map(|e| match e {
                KiroEvent::ToolUseStop(call) => Some((call.name.clone(), call.arguments.clone())),
                _ => None,
            })
            .collect();
        assert_eq!(
            stops,
            vec![
                ("a".to_string(), "{}".to_string()),
                ("b".to_string(), r#"{"k":"v"}"#.to_string())
            ]
        );
    }

    #[test]
    fn test_invalid_arguments_become_empty_object() {
        let events = parse_all(&body(&[
            r#"{"name":"f","toolUseId":"t1"}"#,
            r#"{"input":"{not json"}"#,
            r#"{"stop":true}"#,
        ]));
        assert!(events.contains(&KiroEvent::ToolUseStop(ToolCall {
            id: "t1".into(),
            name: "f".into(),
            arguments: "{}".into()
        })));
    }

    #[test]
    fn test_missing_tool_use_id_generates_one() {
        let events = parse_all(&body(&[r#"{"name":"f","stop":true}"#]));
        match events.last() {
            Some(KiroEvent::ToolUseStop(call)) => {
                assert!(call.id.starts_with("call_"));
                assert_eq!(call.id.len(), 13);
                assert_eq!(call.arguments, "{}");
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_unterminated_tool_call_finalized_at_end() {
        let events = parse_all(&body(&[
            r#"{"name":"f","toolUseId":"t1"}"#,
            r#"{"input":"{\"x\":true}"}"#,
        ]));
        assert_eq!(
            events.last(),
            Some(&KiroEvent::ToolUseStop(ToolCall {
                id: "t1".into(),
                name: "f".into(),
                arguments: r#"{"x":true}"#.into()
            }))
        );
    }

    #[test]
    fn test_usage_and_context_frames() {
        let events = parse_all(&body(&[
            r#"{"unit":"credit","unitPlural":"credits","usage":0.34}"#,
            r#"{"contextUsagePercentage":54.5}"#,
        ]));
        assert_eq!(
            events,
            vec![
                KiroEvent::Usage(serde_json::json!(0.34)),
                KiroEvent::ContextUsage(54.5)
            ]
        );
    }

    #[test]
    fn test_split_frames_and_utf8() {
        let input = body(&[r#"{"content":"héllo 世界"}"#, r#"{"content":"!"}"#]);
        let mut parser = AwsEventStreamParser::new();
        let mut events = Vec::new();
        for byte in &input {
            events.extend(parser.process(std::slice::from_ref(byte)));
        }
        events.extend(parser.finish());
        assert_eq!(events, parse_all(&input));
        assert_eq!(events[0], KiroEvent::Content("héllo 世界".into()));
    }

    #[test]
    fn test_buffer_does_not_grow_without_frames() {
        let mut parser = AwsEventStreamParser::new();
        parser.process(&[0u8; 4096]);
        assert!(parser.buffer.len() < max_pattern_len());
    }
}
