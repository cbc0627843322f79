//! Kiro 后端请求头与机器指纹

use once_cell::sync::Lazy;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION, CONNECTION, CONTENT_TYPE};
use sha2::{Digest, Sha256};

const SDK_USER_AGENT: &str = "aws-sdk-js/1.0.27 ua/2.1 os/win32#10.0.19044 lang/js md/nodejs#22.21.1 api/codewhispererstreaming#1.0.27 m/E";
const AMZ_USER_AGENT: &str = "aws-sdk-js/1.0.27";
const KIRO_VERSION: &str = "KiroIDE-0.7.45";

static MACHINE_FINGERPRINT: Lazy<String> = Lazy::new(|| {
    let host = std::env::var("HOSTNAME")
        .or_else(|_| std::env::var("COMPUTERNAME"))
        .unwrap_or_else(|_| "unknown-host".to_string());
    let user = std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_else(|_| "unknown-user".to_string());
    fingerprint_for(&host, &user)
});

/// 当前机器的指纹（进程内缓存）
pub fn machine_fingerprint() -> &'static str {
    &MACHINE_FINGERPRINT
}

/// `sha256("{host}-{user}-kiro-gateway")` 的十六进制
pub fn fingerprint_for(host: &str, user: &str) -> String {
    let digest = Sha256::digest(format!("{}-{}-kiro-gateway", host, user).as_bytes());
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

/// 构建发往 Kiro 后端的请求头
///
/// 流式请求额外带 `Connection: close`，避免复用已被上游半关闭的连接
pub fn kiro_headers(token: &str, fingerprint: &str, streaming: bool) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

    insert(&mut headers, AUTHORIZATION, format!("Bearer {}", token));
    insert(
        &mut headers,
        reqwest::header::USER_AGENT,
        format!("{} {}-{}", SDK_USER_AGENT, KIRO_VERSION, fingerprint),
    );
    insert(
        &mut headers,
        HeaderName::from_static("x-amz-user-agent"),
        format!("{} {}-{}", AMZ_USER_AGENT, KIRO_VERSION, fingerprint),
    );
    insert(
        &mut headers,
        HeaderName::from_static("amz-sdk-invocation-id"),
        uuid::Uuid::new_v4().to_string(),
    );

    headers.insert(
        HeaderName::from_static("x-amzn-codewhisperer-optout"),
        HeaderValue::from_static("true"),
    );
    headers.insert(
        HeaderName::from_static("x-amzn-kiro-agent-mode"),
        HeaderValue::from_static("vibe"),
    );
    headers.insert(
        HeaderName::from_static("amz-sdk-request"),
        HeaderValue::from_static("attempt=1; max=3"),
    );

    if streaming {
        headers.insert(CONNECTION, HeaderValue::from_static("close"));
    }
    headers
}

fn insert(headers: &mut HeaderMap, name: HeaderName, value: String) {
    match HeaderValue::from_str(&value) {
        Ok(value) => {
            headers.insert(name, value);
        }
        Err(_) => tracing::warn!("[KIRO_HTTP] 请求头 {} 含非法字符，已跳过", name),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fingerprint_is_stable_sha256() {
        let a = fingerprint_for("host", "alice");
        assert_eq!(a.len(), 64);
        assert_eq!(a, fingerprint_for("host", "alice"));
        assert_ne!(a, fingerprint_for("host", "bob"));
        assert_eq!(machine_fingerprint(), machine_fingerprint());
    }

    #[test]
    fn test_headers() {
        let headers = kiro_headers("tok", "fp", false);
        assert_eq!(headers["authorization"], "Bearer tok");
        assert_eq!(headers["content-type"], "application/json");
        assert_eq!(headers["x-amzn-codewhisperer-optout"], "true");
        assert_eq!(headers["x-amzn-kiro-agent-mode"], "vibe");
        assert_eq!(headers["amz-sdk-request"], "attempt=1; max=3");
        assert!(headers["user-agent"]
            .to_str()
            .unwrap()
            .ends_with("KiroIDE-0.7.45-fp"));
        assert_eq!(headers["x-amz-user-agent"], "aws-sdk-js/1.0.27 KiroIDE-0.7.45-fp");
        assert!(headers.get("connection").is_none());

        let streaming = kiro_headers("tok", "fp", true);
        assert_eq!(streaming["connection"], "close");
        assert_ne!(
            headers["amz-sdk-invocation-id"],
            streaming["amz-sdk-invocation-id"]
        );
    }
}
