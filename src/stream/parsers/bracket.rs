//! 文本形式的工具调用
//!
//! 部分模型会把工具调用写进正文：`[Called get_weather with args: {"city": "Paris"}]`。
//! 这里负责从正文中识别这种写法，并与结构化的工具调用去重。

use super::aws_event_stream::{find_json_end, generate_tool_call_id, normalize_arguments};
use crate::stream::events::ToolCall;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::{HashMap, HashSet};

static BRACKET_CALL_RE: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"\[Called\s+([A-Za-z0-9_.\-]+)\s+with\s+args:\s*").ok());

/// 一次文本形式工具调用的识别结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BracketMatch {
    /// 在原文中的字节范围
    pub span: std::ops::Range<usize>,
    pub name: String,
    pub arguments: String,
}

/// 在文本中查找所有 `[Called <name> with args: {...}]`
///
/// 参数对象用括号匹配截取，支持任意深度的嵌套
pub fn find_bracket_tool_calls(text: &str) -> Vec<BracketMatch> {
    let Some(re) = BRACKET_CALL_RE.as_ref() else {
        return Vec::new();
    };
    if !text.contains("[Called") {
        return Vec::new();
    }

    let mut matches = Vec::new();
    let mut search_from = 0;

    while search_from < text.len() {
        let Some(caps) = re.captures_at(text, search_from) else {
            break;
        };
        let (Some(whole), Some(name)) = (caps.get(0), caps.get(1)) else {
            break;
        };

        let args_start = whole.end();
        let Some(args_len) = find_json_end(&text.as_bytes()[args_start..]) else {
            search_from = whole.end();
            continue;
        };
        let args_end = args_start + args_len;

        let rest = &text[args_end..];
        let trailing_ws = rest.len() - rest.trim_start().len();
        if !rest[trailing_ws..].starts_with(']') {
            search_from = args_end;
            continue;
        }
        let end = args_end + trailing_ws + 1;

        matches.push(BracketMatch {
            span: whole.start()..end,
            name: name.as_str().to_string(),
            arguments: text[args_start..args_end].to_string(),
        });
        search_from = end;
    }

    matches
}

/// 解析文本形式的工具调用，结果没有 ID（去重后再分配）
pub fn parse_bracket_tool_calls(text: &str) -> Vec<ToolCall> {
    find_bracket_tool_calls(text)
        .into_iter()
        .map(|m| ToolCall {
            id: String::new(),
            name: m.name,
            arguments: normalize_arguments(&m.arguments),
        })
        .collect()
}

/// 从文本中移除工具调用写法
pub fn strip_bracket_tool_calls(text: &str) -> String {
    let matches = find_bracket_tool_calls(text);
    if matches.is_empty() {
        return text.to_string();
    }

    let mut result = String::with_capacity(text.len());
    let mut last = 0;
    for m in matches {
        result.push_str(&text[last..m.span.start]);
        last = m.span.end;
    }
    result.push_str(&text[last..]);
    result.trim().to_string()
}

fn is_better(candidate: &ToolCall, existing: &ToolCall) -> bool {
    candidate.arguments != "{}"
        && (existing.arguments == "{}" || candidate.arguments.len() > existing.arguments.len())
}

/// 工具调用去重
///
/// - 有 ID 的按 ID 去重：保留参数非空且更长的一条
/// - 没有 ID 的按 (名称, 参数) 与已保留的全部调用比较
///
/// 输出保持首次出现的顺序
pub fn deduplicate_tool_calls(calls: Vec<ToolCall>) -> Vec<ToolCall> {
    let mut kept: Vec<ToolCall> = Vec::with_capacity(calls.len());
    let mut by_id: HashMap<String, usize> = HashMap::new();

    for call in calls {
        if call.id.is_empty() {
            kept.push(call);
            continue;
        }
        match by_id.get(&call.id) {
            Some(&idx) => {
                if is_better(&call, &kept[idx]) {
                    kept[idx] = call;
                }
            }
            None => {
                by_id.insert(call.id.clone(), kept.len());
                kept.push(call);
            }
        }
    }

    let mut seen: HashSet<(String, String)> = kept
        .iter()
        .filter(|c| !c.id.is_empty())
        .map(|c| (c.name.clone(), c.arguments.clone()))
        .collect();

    let before = kept.len();
    kept.retain(|call| {
        if !call.id.is_empty() {
            return true;
        }
        seen.insert((call.name.clone(), call.arguments.clone()))
    });
    if kept.len() < before {
        tracing::debug!("[KIRO_STREAM] 去除 {} 个重复的工具调用", before - kept.len());
    }

    kept
}

/// 为没有 ID 的调用分配 `call_` ID
pub fn assign_missing_ids(calls: &mut [ToolCall]) {
    for call in calls.iter_mut().filter(|c| c.id.is_empty()) {
        call.id = generate_tool_call_id();
    }
}
