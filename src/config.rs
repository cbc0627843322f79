//! 网关配置
//!
//! 配置来源按优先级从低到高：内置默认值 → YAML 文件 → 环境变量。
use crate::error::GatewayError;
use crate::resilience::{RetryConfig, TimeoutConfig};
use crate::stream::thinking::{ThinkingMode, DEFAULT_OPEN_TAGS};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Kiro API 固定使用的区域
pub const API_REGION: &str = "us-east-1";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GatewayConfig {
    pub credentials: CredentialsConfig,
    pub endpoints: EndpointsConfig,
    pub retry: RetryConfig,
    pub timeouts: TimeoutConfig,
    pub thinking: ThinkingConfig,
    /// 工具描述超过该长度时移入系统提示，0 表示不处理
    pub tool_description_max_length: usize,
    /// 模型信息缓存有效期（秒）
    pub model_cache_ttl_secs: u64,
    /// 出站 HTTP(S) 代理
    pub proxy_url: Option<String>,
    pub logging: LoggingConfig,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            credentials: CredentialsConfig::default(),
            endpoints: EndpointsConfig::default(),
            retry: RetryConfig::default(),
            timeouts: TimeoutConfig::default(),
            thinking: ThinkingConfig::default(),
            tool_description_max_length: 10_000,
            model_cache_ttl_secs: 3600,
            proxy_url: None,
            logging: LoggingConfig::default(),
        }
    }
}

/// 凭证来源
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CredentialsConfig {
    /// JSON 凭证文件
    pub creds_file: Option<PathBuf>,
    /// kiro-cli 的 SQLite 数据库（同时配置时优先于 JSON 文件）
    pub sqlite_db: Option<PathBuf>,
    /// 仅提供 refresh token 时使用
    pub refresh_token: Option<String>,
    pub profile_arn: Option<String>,
    /// 认证（SSO）区域
    pub region: String,
    /// Token 剩余有效期低于该值（秒）时提前刷新
    pub refresh_threshold_secs: i64,
}

impl Default for CredentialsConfig {
    fn default() -> Self {
        Self {
            creds_file: None,
            sqlite_db: None,
            refresh_token: None,
            profile_arn: None,
            region: API_REGION.to_string(),
            refresh_threshold_secs: 600,
        }
    }
}

impl CredentialsConfig {
    pub fn has_source(&self) -> bool {
        self.creds_file.is_some()
            || self.sqlite_db.is_some()
            || self
                .refresh_token
                .as_deref()
                .is_some_and(|t| !t.trim().is_empty())
    }
}

/// 上游地址模板，`{region}` 会被替换
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EndpointsConfig {
    pub api_host: String,
    pub desktop_refresh_url: String,
    pub oidc_token_url: String,
}

impl Default for EndpointsConfig {
    fn default() -> Self {
        Self {
            api_host: "https://q.{region}.amazonaws.com".to_string(),
            desktop_refresh_url: "https://prod.{region}.auth.desktop.kiro.dev/refreshToken"
                .to_string(),
            oidc_token_url: "https://oidc.{region}.amazonaws.com/token".to_string(),
        }
    }
}

impl EndpointsConfig {
    pub fn api_host(&self) -> String {
        fill_region(&self.api_host, API_REGION)
    }

    pub fn desktop_refresh_url(&self, region: &str) -> String {
        fill_region(&self.desktop_refresh_url, region)
    }

    pub fn oidc_token_url(&self, region: &str) -> String {
        fill_region(&self.oidc_token_url, region)
    }
}

fn fill_region(template: &str, region: &str) -> String {
    template.replace("{region}", region)
}

/// 伪推理配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ThinkingConfig {
    pub enabled: bool,
    pub mode: ThinkingMode,
    /// 注入到提示中的推理 token 上限
    pub max_tokens: u32,
    pub open_tags: Vec<String>,
    /// 开头最多缓冲多少字节来判断是否为推理块
    pub initial_buffer_size: usize,
}

impl Default for ThinkingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            mode: ThinkingMode::AsReasoningContent,
            max_tokens: 4000,
            open_tags: DEFAULT_OPEN_TAGS.iter().map(|t| t.to_string()).collect(),
            initial_buffer_size: 20,
        }
    }
}

/// 调试输出模式
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DebugMode {
    #[default]
    Off,
    /// 仅在请求失败时写盘
    Errors,
    /// 所有请求都写盘
    All,
}

impl std::str::FromStr for DebugMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "off" | "" => Ok(Self::Off),
            "errors" => Ok(Self::Errors),
            "all" => Ok(Self::All),
            other => Err(format!("未知的调试模式: {other}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// tracing 过滤级别，`RUST_LOG` 优先
    pub level: String,
    pub debug_mode: DebugMode,
    pub debug_dir: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            debug_mode: DebugMode::Off,
            debug_dir: None,
        }
    }
}

impl GatewayConfig {
    /// 从 YAML 文件加载
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("读取配置文件 {:?} 失败: {e}", path))?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> anyhow::Result<Self> {
        let config: GatewayConfig = serde_yaml::from_str(content)?;
        Ok(config)
    }

    /// 加载配置：可选的 YAML 文件，再叠加环境变量
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// 使用进程环境变量覆盖
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    /// 使用给定的查找函数覆盖
    pub fn apply_overrides_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(path) = get("KIRO_CREDS_FILE") {
            self.credentials.creds_file = Some(expand_home(&path));
        }
        if let Some(path) = get("KIRO_CLI_DB_FILE") {
            self.credentials.sqlite_db = Some(expand_home(&path));
        }
        if let Some(token) = get("REFRESH_TOKEN") {
            self.credentials.refresh_token = Some(token);
        }
        if let Some(arn) = get("PROFILE_ARN") {
            self.credentials.profile_arn = Some(arn);
        }
        if let Some(region) = get("KIRO_REGION") {
            self.credentials.region = region;
        }

        if let Some(secs) = get("FIRST_TOKEN_TIMEOUT").and_then(|v| v.parse::<f64>().ok()) {
            self.timeouts.first_token_timeout_ms = (secs * 1000.0) as u64;
        }
        if let Some(n) = get("FIRST_TOKEN_MAX_RETRIES").and_then(|v| v.parse().ok()) {
            self.timeouts.first_token_max_retries = n;
        }
        if let Some(secs) = get("STREAMING_READ_TIMEOUT").and_then(|v| v.parse::<f64>().ok()) {
            self.timeouts.streaming_read_timeout_ms = (secs * 1000.0) as u64;
        }

        if let Some(flag) = get("FAKE_REASONING") {
            self.thinking.enabled = parse_bool(&flag);
        }
        if let Some(n) = get("FAKE_REASONING_MAX_TOKENS").and_then(|v| v.parse().ok()) {
            self.thinking.max_tokens = n;
        }
        if let Some(mode) = get("FAKE_REASONING_HANDLING") {
            match mode.parse() {
                Ok(mode) => self.thinking.mode = mode,
                Err(e) => tracing::warn!("[CONFIG] 忽略 FAKE_REASONING_HANDLING: {}", e),
            }
        }

        if let Some(n) = get("TOOL_DESCRIPTION_MAX_LENGTH").and_then(|v| v.parse().ok()) {
            self.tool_description_max_length = n;
        }

        if let Some(proxy) = get("VPN_PROXY_URL").or_else(|| get("HTTPS_PROXY")) {
            self.proxy_url = Some(proxy);
        }

        if let Some(level) = get("LOG_LEVEL") {
            self.logging.level = level.to_lowercase();
        }
        if let Some(mode) = get("DEBUG_MODE") {
            match mode.parse() {
                Ok(mode) => self.logging.debug_mode = mode,
                Err(e) => tracing::warn!("[CONFIG] 忽略 DEBUG_MODE: {}", e),
            }
        }
        if let Some(dir) = get("DEBUG_DIR") {
            self.logging.debug_dir = Some(expand_home(&dir));
        }
    }

    /// 校验配置
    pub fn validate(&self) -> Result<(), GatewayError> {
        if !self.credentials.has_source() {
            return Err(GatewayError::Config(
                "未配置凭证：需要 KIRO_CREDS_FILE、KIRO_CLI_DB_FILE 或 REFRESH_TOKEN 之一"
                    .to_string(),
            ));
        }
        if self.timeouts.first_token_timeout_ms == 0 {
            return Err(GatewayError::Config("首 token 超时必须大于 0".to_string()));
        }
        Ok(())
    }
}

fn parse_bool(value: &str) -> bool {
    matches!(
        value.trim().to_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

/// 展开路径开头的 `~`
pub fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    if path == "~" {
        if let Some(home) = dirs::home_dir() {
            return home;
        }
    }
    PathBuf::from(path)
}
