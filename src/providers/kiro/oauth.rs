//! Kiro Token 刷新
//!
//! - Kiro 桌面端：`POST https://prod.{region}.auth.desktop.kiro.dev/refreshToken`，JSON 请求体
//! - AWS SSO OIDC：`POST https://oidc.{region}.amazonaws.com/token`，表单请求体，不带 scope
//!
//! 两者的响应都是 camelCase JSON；`expiresIn` 转换为绝对时间并预留 60 秒。
//! 响应缺少 accessToken 或 refreshToken 视为认证失败，不重试。

use super::credentials::{AuthType, KiroCredentials};
use crate::config::EndpointsConfig;
use crate::error::GatewayError;
use chrono::{DateTime, Duration, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 提前过期的秒数
const EXPIRY_SAFETY_MARGIN_SECS: i64 = 60;

/// 响应中没有 `expiresIn` 时的默认有效期
const DEFAULT_EXPIRES_IN_SECS: i64 = 3600;

/// Token 刷新错误
#[derive(Error, Debug)]
pub enum RefreshError {
    /// 刷新接口返回非成功状态码
    #[error("Token 刷新失败: {status} - {body}")]
    Status { status: u16, body: String },

    #[error("Token 刷新请求失败: {0}")]
    Http(String),

    /// 响应缺少必要字段
    #[error("Token 刷新响应缺少字段: {0}")]
    MissingField(&'static str),
}

impl RefreshError {
    pub fn status(&self) -> Option<u16> {
        match self {
            RefreshError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for RefreshError {
    fn from(err: reqwest::Error) -> Self {
        RefreshError::Http(err.to_string())
    }
}

impl From<RefreshError> for GatewayError {
    fn from(err: RefreshError) -> Self {
        match err {
            RefreshError::Http(message) => GatewayError::Http(message),
            other => GatewayError::Auth(other.to_string()),
        }
    }
}

/// 刷新结果
#[derive(Debug, Clone, PartialEq)]
pub struct RefreshedToken {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: DateTime<Utc>,
    pub profile_arn: Option<String>,
}

impl RefreshedToken {
    /// 合并到已有凭证
    pub fn apply_to(self, creds: &mut KiroCredentials) {
        creds.access_token = self.access_token;
        creds.refresh_token = self.refresh_token;
        creds.expires_at = Some(self.expires_at);
        if self.profile_arn.is_some() {
            creds.profile_arn = self.profile_arn;
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DesktopRefreshRequest<'a> {
    refresh_token: &'a str,
}

#[derive(Debug, Serialize)]
struct OidcRefreshForm<'a> {
    grant_type: &'a str,
    client_id: &'a str,
    client_secret: &'a str,
    refresh_token: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RefreshResponse {
    #[serde(default, alias = "access_token")]
    access_token: Option<String>,
    #[serde(default, alias = "refresh_token")]
    refresh_token: Option<String>,
    #[serde(default, alias = "expires_in")]
    expires_in: Option<i64>,
    #[serde(default, alias = "profile_arn")]
    profile_arn: Option<String>,
}

impl RefreshResponse {
    fn into_token(self) -> Result<RefreshedToken, RefreshError> {
        let access_token = self
            .access_token
            .filter(|t| !t.is_empty())
            .ok_or(RefreshError::MissingField("accessToken"))?;
        let refresh_token = self
            .refresh_token
            .filter(|t| !t.is_empty())
            .ok_or(RefreshError::MissingField("refreshToken"))?;
        let expires_in = self.expires_in.unwrap_or(DEFAULT_EXPIRES_IN_SECS);
        Ok(RefreshedToken {
            access_token,
            refresh_token,
            expires_at: Utc::now() + Duration::seconds(expires_in - EXPIRY_SAFETY_MARGIN_SECS),
            profile_arn: self.profile_arn,
        })
    }
}

/// Token 刷新客户端
#[derive(Debug, Clone)]
pub struct TokenRefresher {
    client: Client,
    endpoints: EndpointsConfig,
}

impl TokenRefresher {
    pub fn new(client: Client, endpoints: EndpointsConfig) -> Self {
        Self { client, endpoints }
    }

    /// 按凭证类型选择刷新方式
    pub async fn refresh(&self, creds: &KiroCredentials) -> Result<RefreshedToken, RefreshError> {
        if creds.refresh_token.is_empty() {
            return Err(RefreshError::MissingField("refreshToken"));
        }
        match creds.auth_type() {
            AuthType::KiroDesktop => self.refresh_desktop(creds).await,
            AuthType::AwsSsoOidc => self.refresh_oidc(creds).await,
        }
    }

    async fn refresh_desktop(&self, creds: &KiroCredentials) -> Result<RefreshedToken, RefreshError> {
        let url = self.endpoints.desktop_refresh_url(&creds.region);
        tracing::info!("[KIRO_AUTH] 正在刷新 Token (desktop): region={}", creds.region);

        let resp = self
            .client
            .post(&url)
            .header("Accept", "application/json")
            .json(&DesktopRefreshRequest {
                refresh_token: &creds.refresh_token,
            })
            .send()
            .await?;
        Self::read_response(resp).await
    }

    async fn refresh_oidc(&self, creds: &KiroCredentials) -> Result<RefreshedToken, RefreshError> {
        let (Some(client_id), Some(client_secret)) = (&creds.client_id, &creds.client_secret) else {
            return Err(RefreshError::MissingField("clientId/clientSecret"));
        };
        let url = self.endpoints.oidc_token_url(&creds.region);
        tracing::info!("[KIRO_AUTH] 正在刷新 Token (sso-oidc): region={}", creds.region);

        let resp = self
            .client
            .post(&url)
            .header("Accept", "application/json")
            .form(&OidcRefreshForm {
                grant_type: "refresh_token",
                client_id,
                client_secret,
                refresh_token: &creds.refresh_token,
            })
            .send()
            .await?;
        Self::read_response(resp).await
    }

    async fn read_response(resp: reqwest::Response) -> Result<RefreshedToken, RefreshError> {
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            tracing::error!("[KIRO_AUTH] Token 刷新失败: {} - {}", status.as_u16(), body);
            return Err(RefreshError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let data: RefreshResponse = resp.json().await?;
        let token = data.into_token()?;
        tracing::info!("[KIRO_AUTH] Token 刷新成功，有效期至 {}", token.expires_at);
        Ok(token)
    }
}
