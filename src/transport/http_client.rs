//! Kiro API HTTP 客户端
//!
//! 状态码处理：
//! - 403：强制刷新 token 后重试
//! - 429 / 5xx / 连接错误 / 超时：指数退避重试
//! - 其他状态码原样返回给调用方
//!
//! 重试耗尽后返回 `GatewayError::Upstream`（502）。流式请求的连接超时耗尽时返回
//! `GatewayError::FirstTokenTimeout`（504，标明超时类型）。

use super::client_factory::ClientFactory;
use crate::config::EndpointsConfig;
use crate::error::GatewayError;
use crate::models::codewhisperer::{AvailableModel, ListAvailableModelsResponse};
use crate::providers::kiro::headers::{kiro_headers, machine_fingerprint};
use crate::providers::AccessTokenProvider;
use crate::resilience::{ByteStream, Retrier, RetryConfig, TimeoutConfig, TimeoutKind};
use bytes::Bytes;
use futures::StreamExt;
use parking_lot::Mutex;
use reqwest::{Client, Method, Response};
use serde_json::Value;
use std::sync::Arc;

const GENERATE_PATH: &str = "/generateAssistantResponse";
const LIST_MODELS_PATH: &str = "/ListAvailableModels";

/// 底层 reqwest 客户端的归属
enum ClientHandle {
    /// 自有客户端：首次使用时创建，`close` 后丢弃，再次使用时重建
    Owned {
        factory: ClientFactory,
        client: Mutex<Option<Client>>,
    },
    /// 外部共享的连接池，永不关闭
    Shared(Client),
}

/// 最后一次失败的原因
enum Failure {
    Status(u16, String),
    Transport { message: String, timeout: bool },
}

pub struct KiroHttpClient {
    handle: ClientHandle,
    auth: Arc<dyn AccessTokenProvider>,
    api_host: String,
    retrier: Retrier,
    timeouts: TimeoutConfig,
    fingerprint: String,
}

impl KiroHttpClient {
    /// 自有客户端
    pub fn new(
        factory: ClientFactory,
        auth: Arc<dyn AccessTokenProvider>,
        endpoints: &EndpointsConfig,
        retry: RetryConfig,
        timeouts: TimeoutConfig,
    ) -> Self {
        Self::with_handle(
            ClientHandle::Owned {
                factory,
                client: Mutex::new(None),
            },
            auth,
            endpoints,
            retry,
            timeouts,
        )
    }

    /// 使用外部共享的客户端
    pub fn with_shared_client(
        client: Client,
        auth: Arc<dyn AccessTokenProvider>,
        endpoints: &EndpointsConfig,
        retry: RetryConfig,
        timeouts: TimeoutConfig,
    ) -> Self {
        Self::with_handle(ClientHandle::Shared(client), auth, endpoints, retry, timeouts)
    }

    fn with_handle(
        handle: ClientHandle,
        auth: Arc<dyn AccessTokenProvider>,
        endpoints: &EndpointsConfig,
        retry: RetryConfig,
        timeouts: TimeoutConfig,
    ) -> Self {
        Self {
            handle,
            auth,
            api_host: endpoints.api_host().trim_end_matches('/').to_string(),
            retrier: Retrier::new(retry),
            timeouts,
            fingerprint: machine_fingerprint().to_string(),
        }
    }

    pub fn is_shared(&self) -> bool {
        matches!(self.handle, ClientHandle::Shared(_))
    }

    pub fn api_host(&self) -> &str {
        &self.api_host
    }

    fn client(&self) -> Result<Client, GatewayError> {
        match &self.handle {
            ClientHandle::Shared(client) => Ok(client.clone()),
            ClientHandle::Owned { factory, client } => {
                let mut guard = client.lock();
                if let Some(existing) = guard.as_ref() {
                    return Ok(existing.clone());
                }
                let created = factory.create_client()?;
                tracing::debug!("[KIRO_HTTP] 创建 HTTP 客户端");
                *guard = Some(created.clone());
                Ok(created)
            }
        }
    }

    /// 释放自有客户端；共享客户端不受影响。不会失败
    pub fn close(&self) {
        match &self.handle {
            ClientHandle::Owned { client, .. } => {
                if client.lock().take().is_some() {
                    tracing::debug!("[KIRO_HTTP] HTTP 客户端已关闭");
                }
            }
            ClientHandle::Shared(_) => {
                tracing::debug!("[KIRO_HTTP] 共享客户端由外部管理，跳过关闭");
            }
        }
    }

    /// 发送请求并按状态码重试
    pub async fn request_with_retry(
        &self,
        method: Method,
        url: &str,
        body: Option<&Value>,
        stream: bool,
    ) -> Result<Response, GatewayError> {
        let client = self.client()?;
        let max_attempts = self.retrier.config().max_attempts();
        let mut last_failure: Option<Failure> = None;

        for attempt in 1..=max_attempts {
            let token = self.auth.get_access_token().await?;
            let mut request = client
                .request(method.clone(), url)
                .headers(kiro_headers(&token, &self.fingerprint, stream));
            if let Some(body) = body {
                request = request.json(body);
            }
            if !stream {
                request = request.timeout(self.timeouts.request_timeout());
            }

            let is_last = attempt == max_attempts;
            match request.send().await {
                Ok(response) => {
                    let status = response.status().as_u16();
                    if status == 403 {
                        let body = response.text().await.unwrap_or_default();
                        tracing::warn!(
                            "[KIRO_HTTP] 收到 403 ({}/{})，强制刷新 token: {}",
                            attempt,
                            max_attempts,
                            body
                        );
                        last_failure = Some(Failure::Status(status, body));
                        if !is_last {
                            self.auth.force_refresh().await?;
                        }
                        continue;
                    }

                    if self.retrier.is_retryable(status) {
                        let body = response.text().await.unwrap_or_default();
                        last_failure = Some(Failure::Status(status, body));
                        if !is_last {
                            let delay = self.retrier.backoff_delay(attempt - 1);
                            tracing::warn!(
                                "[KIRO_HTTP] 收到 {} ({}/{})，{}ms 后重试",
                                status,
                                attempt,
                                max_attempts,
                                delay.as_millis()
                            );
                            tokio::time::sleep(delay).await;
                        }
                        continue;
                    }

                    return Ok(response);
                }
                Err(e) => {
                    let timeout = e.is_timeout();
                    tracing::warn!(
                        "[KIRO_HTTP] 请求失败 ({}/{}): {} (timeout={}, connect={})",
                        attempt,
                        max_attempts,
                        e,
                        timeout,
                        e.is_connect()
                    );
                    last_failure = Some(Failure::Transport {
                        message: e.to_string(),
                        timeout,
                    });
                    if !is_last {
                        tokio::time::sleep(self.retrier.backoff_delay(attempt - 1)).await;
                    }
                }
            }
        }

        Err(self.exhausted(max_attempts, last_failure, stream))
    }

    fn exhausted(&self, attempts: u32, failure: Option<Failure>, stream: bool) -> GatewayError {
        tracing::error!("[KIRO_HTTP] 重试耗尽: {} 次尝试", attempts);
        match failure {
            Some(Failure::Transport { timeout: true, .. }) if stream => {
                GatewayError::FirstTokenTimeout {
                    kind: TimeoutKind::Connect,
                    attempts,
                }
            }
            Some(Failure::Transport { message, .. }) => GatewayError::Upstream {
                attempts,
                last_status: None,
                message,
            },
            Some(Failure::Status(status, body)) => GatewayError::Upstream {
                attempts,
                last_status: Some(status),
                message: body,
            },
            None => GatewayError::Upstream {
                attempts,
                last_status: None,
                message: "no attempt was made".to_string(),
            },
        }
    }

    fn generate_url(&self) -> String {
        format!("{}{}", self.api_host, GENERATE_PATH)
    }

    /// 非流式调用：返回完整的事件流字节
    pub async fn generate_assistant_response(&self, payload: &Value) -> Result<Bytes, GatewayError> {
        let response = self
            .request_with_retry(Method::POST, &self.generate_url(), Some(payload), false)
            .await?;
        let response = ensure_success(response).await?;
        Ok(response.bytes().await?)
    }

    /// 流式调用：返回上游字节流，由首 token 重试编排消费
    pub async fn open_assistant_stream(&self, payload: &Value) -> Result<ByteStream, GatewayError> {
        let response = self
            .request_with_retry(Method::POST, &self.generate_url(), Some(payload), true)
            .await?;
        let response = ensure_success(response).await?;
        let stream = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(GatewayError::from));
        Ok(Box::pin(stream))
    }

    /// 获取可用模型列表
    pub async fn list_available_models(&self) -> Result<Vec<AvailableModel>, GatewayError> {
        let mut query: Vec<(&str, String)> = vec![("origin", "AI_EDITOR".to_string())];
        if let Some(arn) = self.auth.profile_arn().await {
            query.push(("profileArn", arn));
        }
        let query = serde_urlencoded::to_string(&query)
            .map_err(|e| GatewayError::Internal(e.to_string()))?;
        let url = format!("{}{}?{}", self.api_host, LIST_MODELS_PATH, query);

        let response = self.request_with_retry(Method::GET, &url, None, false).await?;
        let response = ensure_success(response).await?;
        let parsed: ListAvailableModelsResponse = response.json().await?;
        tracing::info!("[MODELS] 获取到 {} 个可用模型", parsed.models.len());
        Ok(parsed.models)
    }
}

/// 非成功状态码转为错误，保留上游状态码与响应体
async fn ensure_success(response: Response) -> Result<Response, GatewayError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    tracing::error!("[KIRO_HTTP] 上游返回 {}: {}", status.as_u16(), body);
    Err(GatewayError::UpstreamStatus {
        status: status.as_u16(),
        body,
    })
}
