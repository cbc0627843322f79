//! 网关错误类型
//!
//! 所有对外暴露的 API 都返回 `GatewayError`。错误按调用方使用的协议渲染：
//! OpenAI 风格 `{"error": {...}}`，Anthropic 风格 `{"type": "error", "error": {...}}`。

use crate::resilience::TimeoutKind;
use thiserror::Error;

/// 网关错误
#[derive(Error, Debug)]
pub enum GatewayError {
    /// 配置错误（凭证缺失、文件不存在等），不重试
    #[error("配置错误: {0}")]
    Config(String),

    /// 认证失败（Token 刷新失败或响应缺少字段）
    #[error("认证失败: {0}")]
    Auth(String),

    /// 请求校验失败
    #[error("请求无效: {0}")]
    Validation(String),

    /// 上游重试耗尽
    #[error("上游请求失败: 尝试 {attempts} 次后放弃 - {message}")]
    Upstream {
        attempts: u32,
        last_status: Option<u16>,
        message: String,
    },

    /// 上游返回了非成功状态码（原样透传给调用方）
    #[error("上游返回错误 {status}: {body}")]
    UpstreamStatus { status: u16, body: String },

    /// 流式请求首个 token 超时，且首 token 重试预算耗尽
    #[error("流式请求超时 ({kind} timeout): 尝试 {attempts} 次后仍未收到数据")]
    FirstTokenTimeout { kind: TimeoutKind, attempts: u32 },

    /// 流式传输中途读取超时（已收到首个 token，不重试）
    #[error("流式读取超时 ({kind} timeout): {timeout_ms}ms 内未收到数据")]
    StreamTimeout { kind: TimeoutKind, timeout_ms: u64 },

    /// HTTP 传输错误
    #[error("HTTP 错误: {0}")]
    Http(String),

    /// 调用方取消（客户端断开），不视为失败
    #[error("请求已取消")]
    Cancelled,

    /// 内部错误
    #[error("内部错误: {0}")]
    Internal(String),
}

impl GatewayError {
    /// 获取对应的 HTTP 状态码
    pub fn status_code(&self) -> u16 {
        match self {
            GatewayError::Config(_) => 500,
            GatewayError::Auth(_) => 401,
            GatewayError::Validation(_) => 400,
            GatewayError::Upstream { .. } => 502,
            GatewayError::UpstreamStatus { status, .. } => *status,
            GatewayError::FirstTokenTimeout { .. } => 504,
            GatewayError::StreamTimeout { .. } => 504,
            GatewayError::Http(_) => 502,
            GatewayError::Cancelled => 499,
            GatewayError::Internal(_) => 500,
        }
    }

    /// 获取错误类型字符串
    pub fn error_type(&self) -> &'static str {
        match self {
            GatewayError::Config(_) => "configuration_error",
            GatewayError::Auth(_) => "authentication_error",
            GatewayError::Validation(_) => "invalid_request_error",
            GatewayError::Upstream { .. } => "api_error",
            GatewayError::UpstreamStatus { status, .. } => match status {
                400 => "invalid_request_error",
                401 | 403 => "authentication_error",
                404 => "not_found_error",
                429 => "rate_limit_error",
                _ => "api_error",
            },
            GatewayError::FirstTokenTimeout { .. } | GatewayError::StreamTimeout { .. } => {
                "timeout_error"
            }
            GatewayError::Http(_) => "api_error",
            GatewayError::Cancelled => "cancelled",
            GatewayError::Internal(_) => "internal_error",
        }
    }

    /// 是否为客户端取消
    pub fn is_cancelled(&self) -> bool {
        matches!(self, GatewayError::Cancelled)
    }

    /// 转换为 OpenAI 风格的错误 JSON
    pub fn to_openai_json(&self) -> serde_json::Value {
        serde_json::json!({
            "error": {
                "message": self.to_string(),
                "type": self.error_type(),
                "code": self.status_code()
            }
        })
    }

    /// 转换为 Anthropic 风格的错误 JSON
    pub fn to_anthropic_json(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "error",
            "error": {
                "type": self.error_type(),
                "message": self.to_string()
            }
        })
    }
}

impl From<reqwest::Error> for GatewayError {
    fn from(err: reqwest::Error) -> Self {
        GatewayError::Http(err.to_string())
    }
}

impl From<serde_json::Error> for GatewayError {
    fn from(err: serde_json::Error) -> Self {
        GatewayError::Internal(format!("JSON 序列化失败: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(GatewayError::Config("x".into()).status_code(), 500);
        assert_eq!(GatewayError::Auth("x".into()).status_code(), 401);
        assert_eq!(GatewayError::Validation("x".into()).status_code(), 400);
        assert_eq!(
            GatewayError::Upstream {
                attempts: 4,
                last_status: Some(503),
                message: "x".into()
            }
            .status_code(),
            502
        );
        assert_eq!(
            GatewayError::FirstTokenTimeout {
                kind: TimeoutKind::Read,
                attempts: 4
            }
            .status_code(),
            504
        );
        assert_eq!(
            GatewayError::UpstreamStatus {
                status: 404,
                body: String::new()
            }
            .status_code(),
            404
        );
        assert_eq!(GatewayError::Cancelled.status_code(), 499);
    }

    #[test]
    fn test_first_token_timeout_names_kind() {
        let read = GatewayError::FirstTokenTimeout {
            kind: TimeoutKind::Read,
            attempts: 3,
        };
        let connect = GatewayError::FirstTokenTimeout {
            kind: TimeoutKind::Connect,
            attempts: 3,
        };
        assert!(read.to_string().contains("read timeout"));
        assert!(connect.to_string().contains("connect timeout"));
    }

    #[test]
    fn test_dialect_rendering() {
        let err = GatewayError::Validation("messages 为空".into());

        let openai = err.to_openai_json();
        assert_eq!(openai["error"]["type"], "invalid_request_error");
        assert_eq!(openai["error"]["code"], 400);
        assert!(openai["error"]["message"]
            .as_str()
            .unwrap()
            .contains("messages 为空"));

        let anthropic = err.to_anthropic_json();
        assert_eq!(anthropic["type"], "error");
        assert_eq!(anthropic["error"]["type"], "invalid_request_error");
    }

    #[test]
    fn test_upstream_status_error_type() {
        let err = GatewayError::UpstreamStatus {
            status: 429,
            body: "slow down".into(),
        };
        assert_eq!(err.error_type(), "rate_limit_error");
    }
}
