//! 模型信息缓存与模型名解析
//!
//! 缓存 `ListAvailableModels` 返回的模型及其输入 token 上限，
//! 并把客户端传入的各种模型名写法规整为 Kiro 的模型 ID。

use crate::models::codewhisperer::AvailableModel;
use chrono::{DateTime, Duration, Utc};
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use regex::Regex;
use std::collections::HashMap;

/// 缓存未命中时使用的输入 token 上限
pub const DEFAULT_MAX_INPUT_TOKENS: u64 = 200_000;

/// 上游不可用时对外展示的模型
pub const FALLBACK_MODELS: &[&str] = &[
    "auto",
    "claude-sonnet-4",
    "claude-haiku-4.5",
    "claude-sonnet-4.5",
    "claude-opus-4.5",
];

/// 不在 `ListAvailableModels` 中但仍可调用的模型：显示名 -> 内部 ID
const HIDDEN_MODELS: &[(&str, &str)] = &[("claude-3.7-sonnet", "CLAUDE_3_7_SONNET_20250219_V1_0")];

/// 模型别名
const MODEL_ALIASES: &[(&str, &str)] = &[("auto-kiro", "auto")];

/// 单个模型的缓存信息
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelInfo {
    pub model_id: String,
    pub display_name: Option<String>,
    pub max_input_tokens: u64,
}

impl From<&AvailableModel> for ModelInfo {
    fn from(model: &AvailableModel) -> Self {
        Self {
            model_id: model.model_id.clone(),
            display_name: model.model_name.clone(),
            max_input_tokens: model
                .token_limits
                .as_ref()
                .and_then(|l| l.max_input_tokens)
                .unwrap_or(DEFAULT_MAX_INPUT_TOKENS),
        }
    }
}

#[derive(Debug, Default)]
struct CacheInner {
    models: HashMap<String, ModelInfo>,
    /// 保持上游返回的顺序
    order: Vec<String>,
    updated_at: Option<DateTime<Utc>>,
}

/// 模型信息缓存
///
/// 单写多读，读取不阻塞彼此
#[derive(Debug)]
pub struct ModelInfoCache {
    inner: RwLock<CacheInner>,
    ttl: Duration,
}

impl ModelInfoCache {
    pub fn new(ttl_secs: u64) -> Self {
        Self {
            inner: RwLock::new(CacheInner::default()),
            ttl: Duration::seconds(ttl_secs.min(i64::MAX as u64) as i64),
        }
    }

    /// 用上游返回的模型列表替换缓存
    pub fn update(&self, models: &[AvailableModel]) {
        let mut inner = self.inner.write();
        inner.models.clear();
        inner.order.clear();
        for model in models {
            let info = ModelInfo::from(model);
            if !inner.models.contains_key(&info.model_id) {
                inner.order.push(info.model_id.clone());
            }
            inner.models.insert(info.model_id.clone(), info);
        }
        inner.updated_at = Some(Utc::now());
        tracing::info!("[MODELS] 已缓存 {} 个模型", inner.models.len());
    }

    pub fn get(&self, model_id: &str) -> Option<ModelInfo> {
        self.inner.read().models.get(model_id).cloned()
    }

    pub fn contains(&self, model_id: &str) -> bool {
        self.inner.read().models.contains_key(model_id)
    }

    /// 模型的输入 token 上限，未命中时返回默认值
    pub fn max_input_tokens(&self, model_id: &str) -> u64 {
        self.get(model_id)
            .map(|m| m.max_input_tokens)
            .unwrap_or(DEFAULT_MAX_INPUT_TOKENS)
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().models.is_empty()
    }

    /// 从未加载或已超过有效期
    pub fn is_stale(&self) -> bool {
        match self.inner.read().updated_at {
            Some(at) => Utc::now() - at >= self.ttl,
            None => true,
        }
    }

    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.inner.read().updated_at
    }

    /// 缓存中的模型 ID，按上游顺序
    pub fn model_ids(&self) -> Vec<String> {
        self.inner.read().order.clone()
    }

    /// 对外展示的模型列表：缓存（为空时用兜底列表）+ 隐藏模型 + 别名
    pub fn available_models(&self) -> Vec<String> {
        let mut ids = self.model_ids();
        if ids.is_empty() {
            ids = FALLBACK_MODELS.iter().map(|s| s.to_string()).collect();
        }
        for name in HIDDEN_MODELS
            .iter()
            .map(|(name, _)| *name)
            .chain(MODEL_ALIASES.iter().map(|(alias, _)| *alias))
        {
            if !ids.iter().any(|id| id == name) {
                ids.push(name.to_string());
            }
        }
        ids
    }
}

static MINOR_VERSION_RE: Lazy<Option<Regex>> = Lazy::new(|| {
    Regex::new(r"^claude-(sonnet|haiku|opus)-(\d+)-(\d{1,2})(?:-(?:\d{8}|latest))?$").ok()
});
static DATED_MAJOR_RE: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"^claude-(sonnet|haiku|opus)-(\d+)-(?:\d{8}|latest)$").ok());
static LEGACY_RE: Lazy<Option<Regex>> = Lazy::new(|| {
    Regex::new(r"^claude-(\d+)-(\d+)-(sonnet|haiku|opus)(?:-(?:\d{8}|latest))?$").ok()
});
static INVERTED_RE: Lazy<Option<Regex>> = Lazy::new(|| {
    Regex::new(r"^claude-([4-9](?:\.\d+)?)-(sonnet|haiku|opus)(?:-[A-Za-z0-9.\-]+)?$").ok()
});

fn apply(re: &Lazy<Option<Regex>>, name: &str, template: &str) -> Option<String> {
    let re = re.as_ref()?;
    let caps = re.captures(name)?;
    let mut out = String::new();
    caps.expand(template, &mut out);
    Some(out)
}

/// 把客户端的模型名规整为 Kiro 的写法
///
/// - `claude-sonnet-4-5-20250929` -> `claude-sonnet-4.5`
/// - `claude-sonnet-4-20250514` -> `claude-sonnet-4`
/// - `claude-3-7-sonnet-20250219` -> `claude-3.7-sonnet`
/// - `claude-4.5-opus-high` -> `claude-opus-4.5`
///
/// 不认识的写法原样返回
pub fn normalize_model_name(name: &str) -> String {
    let lower = name.trim().to_lowercase();
    apply(&MINOR_VERSION_RE, &lower, "claude-${1}-${2}.${3}")
        .or_else(|| apply(&DATED_MAJOR_RE, &lower, "claude-${1}-${2}"))
        .or_else(|| apply(&LEGACY_RE, &lower, "claude-${1}.${2}-${3}"))
        .or_else(|| apply(&INVERTED_RE, &lower, "claude-${2}-${1}"))
        .unwrap_or_else(|| name.trim().to_string())
}

/// 模型解析结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedModel {
    /// 发给 Kiro 的模型 ID
    pub internal_id: String,
    /// 规整后的名称
    pub normalized: String,
    /// 是否在缓存或隐藏模型表中确认存在
    pub verified: bool,
}

/// 解析客户端模型名：别名 -> 规整 -> 隐藏模型 -> 缓存
pub fn resolve_model(name: &str, cache: &ModelInfoCache) -> ResolvedModel {
    let aliased = MODEL_ALIASES
        .iter()
        .find(|(alias, _)| alias.eq_ignore_ascii_case(name.trim()))
        .map(|(_, target)| target.to_string())
        .unwrap_or_else(|| name.trim().to_string());
    let normalized = normalize_model_name(&aliased);

    if let Some((_, internal)) = HIDDEN_MODELS.iter().find(|(display, _)| *display == normalized) {
        return ResolvedModel {
            internal_id: internal.to_string(),
            normalized,
            verified: true,
        };
    }

    let verified = cache.contains(&normalized);
    if !verified && !cache.is_empty() {
        tracing::debug!("[MODELS] 模型 {} 不在缓存中，原样透传", normalized);
    }
    ResolvedModel {
        internal_id: normalized.clone(),
        normalized,
        verified,
    }
}
