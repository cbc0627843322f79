//! Kiro Token 生命周期管理
//!
//! 所有刷新都在同一把异步锁内完成：并发请求遇到过期 token 时只会触发一次刷新，
//! 其余请求等待锁释放后直接拿到新 token。
//!
//! SSO OIDC 的 refresh token 只能使用一次。刷新先用内存中的 refresh token，
//! 只有 SSO OIDC 刷新返回 400 且来源是 SQLite 时才重新读取数据库并再刷新一次，
//! 避免磁盘上的旧 token 覆盖刚刷新成功的内存 token。桌面端认证不走这条路径。

use super::credentials::{AuthType, CredentialSource, KiroCredentials};
use super::oauth::TokenRefresher;
use crate::config::GatewayConfig;
use crate::error::GatewayError;
use crate::providers::traits::AccessTokenProvider;
use async_trait::async_trait;
use chrono::Duration;
use reqwest::Client;
use tokio::sync::Mutex;

pub struct KiroTokenManager {
    source: CredentialSource,
    default_region: String,
    state: Mutex<KiroCredentials>,
    refresher: TokenRefresher,
    threshold: Duration,
    /// 配置中的 profile ARN，凭证中没有时使用
    fallback_profile_arn: Option<String>,
}

impl KiroTokenManager {
    /// 构造时立即读取凭证，缺失或损坏的凭证是配置错误
    pub fn new(config: &GatewayConfig, client: Client) -> Result<Self, GatewayError> {
        let source = CredentialSource::from_config(&config.credentials)?;
        let creds = source.load(&config.credentials.region)?;
        let refresher = TokenRefresher::new(client, config.endpoints.clone());
        Ok(Self::with_parts(
            source,
            creds,
            refresher,
            Duration::seconds(config.credentials.refresh_threshold_secs),
        )
        .with_fallback_profile_arn(config.credentials.profile_arn.clone()))
    }

    pub fn with_parts(
        source: CredentialSource,
        creds: KiroCredentials,
        refresher: TokenRefresher,
        threshold: Duration,
    ) -> Self {
        Self {
            source,
            default_region: creds.region.clone(),
            state: Mutex::new(creds),
            refresher,
            threshold,
            fallback_profile_arn: None,
        }
    }

    pub fn with_fallback_profile_arn(mut self, profile_arn: Option<String>) -> Self {
        self.fallback_profile_arn = profile_arn;
        self
    }

    /// 当前凭证快照
    pub async fn credentials(&self) -> KiroCredentials {
        self.state.lock().await.clone()
    }

    async fn refresh_locked(&self, creds: &mut KiroCredentials) -> Result<(), GatewayError> {
        match self.refresher.refresh(creds).await {
            Ok(token) => {
                token.apply_to(creds);
                self.persist(creds);
                Ok(())
            }
            Err(err)
                if err.status() == Some(400)
                    && creds.auth_type() == AuthType::AwsSsoOidc
                    && self.source.is_sqlite() =>
            {
                tracing::warn!("[KIRO_AUTH] 刷新返回 400，重新读取 SQLite 凭证后重试");
                self.reload_and_retry(creds).await
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn reload_and_retry(&self, creds: &mut KiroCredentials) -> Result<(), GatewayError> {
        *creds = self.source.load(&self.default_region)?;

        let token = self
            .refresher
            .refresh(creds)
            .await
            .map_err(GatewayError::from)?;
        token.apply_to(creds);
        self.persist(creds);
        Ok(())
    }

    fn persist(&self, creds: &KiroCredentials) {
        if let Err(e) = self.source.save(creds) {
            tracing::warn!("[KIRO_AUTH] 凭证回写失败: {}", e);
        }
    }

    fn degrade(&self, creds: &KiroCredentials, err: GatewayError) -> Result<String, GatewayError> {
        if creds.is_expired() {
            return Err(err);
        }
        tracing::warn!("[KIRO_AUTH] Token 刷新失败，继续使用尚未过期的 token: {}", err);
        Ok(creds.access_token.clone())
    }
}

#[async_trait]
impl AccessTokenProvider for KiroTokenManager {
    async fn get_access_token(&self) -> Result<String, GatewayError> {
        let mut creds = self.state.lock().await;
        if !creds.needs_refresh(self.threshold) {
            return Ok(creds.access_token.clone());
        }

        tracing::debug!("[KIRO_AUTH] Token 即将过期，开始刷新");
        match self.refresh_locked(&mut creds).await {
            Ok(()) => Ok(creds.access_token.clone()),
            Err(err) => self.degrade(&creds, err),
        }
    }

    async fn force_refresh(&self) -> Result<String, GatewayError> {
        let mut creds = self.state.lock().await;
        self.refresh_locked(&mut creds).await?;
        Ok(creds.access_token.clone())
    }

    async fn profile_arn(&self) -> Option<String> {
        let creds = self.state.lock().await;
        creds
            .profile_arn
            .clone()
            .or_else(|| self.fallback_profile_arn.clone())
    }

    fn provider_type(&self) -> &'static str {
        "kiro"
    }
}
