//! Provider Trait 定义
//!
//! 传输层只通过该接口获取 access token，便于在测试中替换凭证管理。

use crate::error::GatewayError;
use async_trait::async_trait;

/// Access token 提供者
#[async_trait]
pub trait AccessTokenProvider: Send + Sync {
    /// 返回在安全余量内有效的 access token，必要时先刷新
    async fn get_access_token(&self) -> Result<String, GatewayError>;

    /// 无条件刷新（上游返回 403 时使用）
    async fn force_refresh(&self) -> Result<String, GatewayError>;

    /// 当前凭证对应的 profile ARN
    async fn profile_arn(&self) -> Option<String>;

    /// 获取 Provider 类型名称
    fn provider_type(&self) -> &'static str;
}
