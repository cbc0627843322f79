//! 日志与调试输出
//!
//! - `init_tracing`: 初始化 tracing 订阅者
//! - `DebugSink`: 按请求记录原始请求体与上游响应，写入前统一脱敏
use crate::config::{DebugMode, LoggingConfig};
use chrono::Local;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use regex::Regex;
use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// 初始化全局 tracing 订阅者
///
/// `RUST_LOG` 优先于配置中的级别；重复初始化返回错误而不是 panic
pub fn init_tracing(config: &LoggingConfig) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.as_str()));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init()
        .map_err(|e| anyhow::anyhow!("初始化日志失败: {e}"))
}

/// 调试输出
///
/// 网关在请求的各个阶段调用这些方法；实现决定是否以及如何落盘
pub trait DebugSink: Send + Sync {
    /// 记录某个阶段的请求体（如 `request`、`kiro_request`）
    fn record_body(&self, request_id: &str, stage: &str, body: &str);

    /// 记录一段上游原始响应
    fn record_chunk(&self, request_id: &str, chunk: &[u8]);

    /// 请求结束
    fn finish(&self, request_id: &str, success: bool);
}

/// 不记录任何内容
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopDebugSink;

impl DebugSink for NoopDebugSink {
    fn record_body(&self, _request_id: &str, _stage: &str, _body: &str) {}
    fn record_chunk(&self, _request_id: &str, _chunk: &[u8]) {}
    fn finish(&self, _request_id: &str, _success: bool) {}
}

/// 写入目录的调试输出
///
/// `All` 模式立即写盘；`Errors` 模式先缓存在内存，只有请求失败时才写盘
pub struct FileDebugSink {
    dir: PathBuf,
    mode: DebugMode,
    pending: Mutex<HashMap<String, Vec<(String, String)>>>,
}

impl FileDebugSink {
    pub fn new(dir: impl Into<PathBuf>, mode: DebugMode) -> Self {
        Self {
            dir: dir.into(),
            mode,
            pending: Mutex::new(HashMap::new()),
        }
    }

    fn file_path(&self, request_id: &str, name: &str) -> PathBuf {
        self.dir.join(format!("{request_id}_{name}"))
    }

    fn write(&self, request_id: &str, name: &str, content: &str, append: bool) {
        if let Err(e) = fs::create_dir_all(&self.dir) {
            tracing::warn!("[DEBUG_LOG] 创建调试目录失败: {}", e);
            return;
        }
        let path = self.file_path(request_id, name);
        let mut options = OpenOptions::new();
        options.create(true);
        if append {
            options.append(true);
        } else {
            options.write(true).truncate(true);
        }
        match options.open(&path) {
            Ok(mut file) => {
                if let Err(e) = file.write_all(content.as_bytes()) {
                    tracing::warn!("[DEBUG_LOG] 写入 {:?} 失败: {}", path, e);
                }
            }
            Err(e) => tracing::warn!("[DEBUG_LOG] 打开 {:?} 失败: {}", path, e),
        }
    }

    fn buffer(&self, request_id: &str, name: &str, content: String) {
        let mut pending = self.pending.lock();
        let entries = pending.entry(request_id.to_string()).or_default();
        match entries.iter_mut().find(|(n, _)| n == name) {
            Some((_, existing)) if name == RAW_RESPONSE_FILE => existing.push_str(&content),
            Some((_, existing)) => *existing = content,
            None => entries.push((name.to_string(), content)),
        }
    }
}

const RAW_RESPONSE_FILE: &str = "response_stream_raw.txt";

impl DebugSink for FileDebugSink {
    fn record_body(&self, request_id: &str, stage: &str, body: &str) {
        let name = format!("{stage}.json");
        let sanitized = sanitize_log_message(body);
        match self.mode {
            DebugMode::Off => {}
            DebugMode::All => self.write(request_id, &name, &sanitized, false),
            DebugMode::Errors => self.buffer(request_id, &name, sanitized),
        }
    }

    fn record_chunk(&self, request_id: &str, chunk: &[u8]) {
        let sanitized = sanitize_log_message(&String::from_utf8_lossy(chunk));
        match self.mode {
            DebugMode::Off => {}
            DebugMode::All => self.write(request_id, RAW_RESPONSE_FILE, &sanitized, true),
            DebugMode::Errors => self.buffer(request_id, RAW_RESPONSE_FILE, sanitized),
        }
    }

    fn finish(&self, request_id: &str, success: bool) {
        let entries = self.pending.lock().remove(request_id);
        if success || self.mode != DebugMode::Errors {
            return;
        }
        if let Some(entries) = entries {
            tracing::info!(
                "[DEBUG_LOG] 请求 {} 失败，写入 {} 个调试文件",
                request_id,
                entries.len()
            );
            for (name, content) in entries {
                self.write(request_id, &name, &content, false);
            }
            let marker = format!("failed at {}\n", Local::now().format("%Y-%m-%d %H:%M:%S%.3f"));
            self.write(request_id, "error.txt", &marker, false);
        }
    }
}

/// 根据日志配置构建调试输出
pub fn debug_sink_from_config(config: &LoggingConfig) -> Arc<dyn DebugSink> {
    match (&config.debug_dir, config.debug_mode) {
        (Some(dir), mode) if mode != DebugMode::Off => Arc::new(FileDebugSink::new(dir, mode)),
        _ => Arc::new(NoopDebugSink),
    }
}

static SANITIZE_PATTERNS: Lazy<Vec<(Regex, &'static str)>> = Lazy::new(|| {
    [
        (r"Bearer\s+[A-Za-z0-9._~+/=-]+", "Bearer ***"),
        (
            r#"(?i)access[_-]?token["']?\s*[:=]\s*["']?[A-Za-z0-9._~+/=-]+"#,
            "access_token: ***",
        ),
        (
            r#"(?i)refresh[_-]?token["']?\s*[:=]\s*["']?[A-Za-z0-9._~+/=-]+"#,
            "refresh_token: ***",
        ),
        (
            r#"(?i)client[_-]?secret["']?\s*[:=]\s*["']?[A-Za-z0-9._~+/=-]+"#,
            "client_secret: ***",
        ),
        (
            r#"(?i)api[_-]?key["']?\s*[:=]\s*["']?[A-Za-z0-9._-]+"#,
            "api_key: ***",
        ),
        (r#"(?i)password["']?\s*[:=]\s*["']?[^\s"',}]+"#, "password: ***"),
    ]
    .into_iter()
    .filter_map(|(pattern, replacement)| Regex::new(pattern).ok().map(|re| (re, replacement)))
    .collect()
});

/// 日志脱敏：隐藏 token、密钥等敏感字段
pub fn sanitize_log_message(message: &str) -> String {
    let mut sanitized = message.to_string();
    for (re, replacement) in SANITIZE_PATTERNS.iter() {
        sanitized = re.replace_all(&sanitized, *replacement).into_owned();
    }
    sanitized
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_bearer_token() {
        let output = sanitize_log_message("Authorization: Bearer abcDEF123._-XYZ");
        assert!(!output.contains("abcDEF123"));
        assert!(output.contains("Bearer ***"));
    }

    #[test]
    fn test_sanitize_camel_case_tokens() {
        let output = sanitize_log_message(r#"{"accessToken":"aoa_123","refreshToken":"aor_456"}"#);
        assert!(!output.contains("aoa_123"));
        assert!(!output.contains("aor_456"));
    }

    #[test]
    fn test_sanitize_client_secret() {
        let output = sanitize_log_message("client_secret = \"cs_SeCreT-999\"");
        assert!(output.contains("client_secret: ***"));
        assert!(!output.contains("cs_SeCreT"));
    }

    #[test]
    fn test_plain_text_unchanged() {
        let input = "这是一段普通日志，不包含任何敏感字段。";
        assert_eq!(sanitize_log_message(input), input);
    }

    #[test]
    fn test_file_sink_all_mode_writes_immediately() {
        let dir = tempfile::tempdir().unwrap();
        let sink = FileDebugSink::new(dir.path(), DebugMode::All);
        sink.record_body("req1", "kiro_request", r#"{"refreshToken":"secret"}"#);
        sink.record_chunk("req1", b"{\"content\":\"a\"}");
        sink.record_chunk("req1", b"{\"content\":\"b\"}");

        let body = fs::read_to_string(dir.path().join("req1_kiro_request.json")).unwrap();
        assert!(!body.contains("\"secret\""));
        let raw = fs::read_to_string(dir.path().join("req1_response_stream_raw.txt")).unwrap();
        assert_eq!(raw, "{\"content\":\"a\"}{\"content\":\"b\"}");
    }

    #[test]
    fn test_file_sink_errors_mode_only_writes_on_failure() {
        let dir = tempfile::tempdir().unwrap();
        let sink = FileDebugSink::new(dir.path(), DebugMode::Errors);

        sink.record_body("ok", "request", "{}");
        sink.finish("ok", true);
        assert!(!dir.path().join("ok_request.json").exists());

        sink.record_body("bad", "request", "{}");
        sink.record_chunk("bad", b"partial");
        sink.finish("bad", false);
        assert!(dir.path().join("bad_request.json").exists());
        assert_eq!(
            fs::read_to_string(dir.path().join("bad_response_stream_raw.txt")).unwrap(),
            "partial"
        );
    }
}
