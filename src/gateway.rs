//! 网关入口
//!
//! ```text
//! 请求 ──> [Translator] ──> UnifiedRequest ──> [build_kiro_payload] ──> KiroHttpClient
//!                                                                          │
//! 响应 <── [ResponseRenderer / SseStreamConsumer] <── KiroStreamProcessor <┘
//! ```
//!
//! 每个请求互相独立；共享状态只有 token 管理器和模型缓存。

use crate::config::GatewayConfig;
use crate::converter::{
    build_kiro_payload, AnthropicResponseRenderer, AnthropicTranslator, OpenAiResponseRenderer,
    OpenAiTranslator, PayloadOptions, RequestTranslator, ResponseRenderer, UsageCalculator,
};
use crate::error::GatewayError;
use crate::logger::{debug_sink_from_config, DebugSink};
use crate::model_cache::{resolve_model, ModelInfoCache};
use crate::models::anthropic::AnthropicMessagesRequest;
use crate::models::openai::ChatCompletionRequest;
use crate::models::UnifiedRequest;
use crate::providers::{AccessTokenProvider, KiroTokenManager};
use crate::resilience::{stream_with_first_token_retry, CancellationToken, FirstTokenPolicy, OutputStream};
use crate::stream::{
    collect_response, AnthropicSseGenerator, KiroStreamProcessor, OpenAiSseGenerator,
    SseGenerator, SseStreamConsumer,
};
use crate::tokenizer::TokenEstimator;
use crate::transport::{ClientFactory, KiroHttpClient};
use serde_json::Value;
use std::sync::Arc;

/// 已渲染好的 SSE 帧
pub type SseStream = OutputStream<String>;

/// 网关响应
pub enum GatewayResponse {
    /// 非流式：`chat.completion` 或 Anthropic `message`
    Complete(Value),
    Stream(SseStream),
}

impl std::fmt::Debug for GatewayResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GatewayResponse::Complete(value) => f.debug_tuple("Complete").field(value).finish(),
            GatewayResponse::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

/// 调用方使用的协议
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Dialect {
    OpenAi,
    Anthropic,
}

/// 单个请求在转换后需要的上下文
struct PreparedRequest {
    request_id: String,
    model: String,
    stream: bool,
    payload: Value,
    usage: UsageCalculator,
    prompt_tokens: u32,
}

pub struct KiroGateway {
    config: GatewayConfig,
    auth: Arc<dyn AccessTokenProvider>,
    http: KiroHttpClient,
    models: Arc<ModelInfoCache>,
    debug: Arc<dyn DebugSink>,
    estimator: TokenEstimator,
}

impl KiroGateway {
    /// 按配置组装：读取凭证、创建 HTTP 客户端与模型缓存
    pub fn new(config: GatewayConfig) -> Result<Self, GatewayError> {
        config.validate()?;
        let factory = ClientFactory::from_config(&config);
        let auth_client = factory.create_client()?;
        let auth: Arc<dyn AccessTokenProvider> = Arc::new(KiroTokenManager::new(&config, auth_client)?);
        let http = KiroHttpClient::new(
            factory,
            auth.clone(),
            &config.endpoints,
            config.retry.clone(),
            config.timeouts.clone(),
        );
        let models = Arc::new(ModelInfoCache::new(config.model_cache_ttl_secs));
        let debug = debug_sink_from_config(&config.logging);

        tracing::info!(
            "[CONFIG] 网关已初始化: api_host={}, thinking={}, proxy={}",
            http.api_host(),
            config.thinking.enabled,
            config.proxy_url.is_some()
        );
        Ok(Self::from_parts(config, auth, http, models, debug))
    }

    /// 使用外部组件组装（共享连接池、测试替身等）
    pub fn from_parts(
        config: GatewayConfig,
        auth: Arc<dyn AccessTokenProvider>,
        http: KiroHttpClient,
        models: Arc<ModelInfoCache>,
        debug: Arc<dyn DebugSink>,
    ) -> Self {
        Self {
            config,
            auth,
            http,
            models,
            debug,
            estimator: TokenEstimator::new(),
        }
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    pub fn model_cache(&self) -> &Arc<ModelInfoCache> {
        &self.models
    }

    /// OpenAI `/v1/chat/completions`
    pub async fn chat_completions(
        &self,
        request: ChatCompletionRequest,
        cancel: CancellationToken,
    ) -> Result<GatewayResponse, GatewayError> {
        let request_id = uuid::Uuid::new_v4().simple().to_string();
        self.record_request(&request_id, &request);
        let unified = OpenAiTranslator.translate_request(request)?;
        self.handle(unified, Dialect::OpenAi, request_id, cancel).await
    }

    /// Anthropic `/v1/messages`
    pub async fn messages(
        &self,
        request: AnthropicMessagesRequest,
        cancel: CancellationToken,
    ) -> Result<GatewayResponse, GatewayError> {
        let request_id = uuid::Uuid::new_v4().simple().to_string();
        self.record_request(&request_id, &request);
        let unified = AnthropicTranslator.translate_request(request)?;
        self.handle(unified, Dialect::Anthropic, request_id, cancel).await
    }

    /// 从上游拉取模型列表并刷新缓存，返回模型数量
    pub async fn refresh_models(&self) -> Result<usize, GatewayError> {
        let models = self.http.list_available_models().await?;
        self.models.update(&models);
        Ok(models.len())
    }

    /// 对外展示的模型 ID
    pub fn available_models(&self) -> Vec<String> {
        self.models.available_models()
    }

    /// 释放自有的 HTTP 客户端
    pub fn close(&self) {
        self.http.close();
    }

    fn record_request<T: serde::Serialize>(&self, request_id: &str, request: &T) {
        match serde_json::to_string(request) {
            Ok(body) => self.debug.record_body(request_id, "request", &body),
            Err(e) => tracing::warn!("[DEBUG_LOG] 序列化请求失败: {}", e),
        }
    }

    /// 缓存过期时尝试刷新；失败只记录日志，使用默认上限继续
    async fn ensure_models(&self) {
        if !self.models.is_stale() {
            return;
        }
        if let Err(e) = self.refresh_models().await {
            tracing::warn!("[MODELS] 刷新模型列表失败，使用默认配置: {}", e);
        }
    }

    async fn prepare(
        &self,
        unified: UnifiedRequest,
        request_id: String,
    ) -> Result<PreparedRequest, GatewayError> {
        self.ensure_models().await;

        let resolved = resolve_model(&unified.model, &self.models);
        let prompt_tokens = self.estimator.estimate_request_tokens(
            &unified.system_prompt,
            &unified.messages,
            &unified.tools,
        );
        let max_input_tokens = self.models.max_input_tokens(&resolved.internal_id);
        let model = unified.model.clone();
        let stream = unified.stream;

        let options = PayloadOptions {
            model_id: resolved.internal_id,
            profile_arn: self.auth.profile_arn().await,
            thinking: self.config.thinking.clone(),
            tool_description_max_length: self.config.tool_description_max_length,
        };
        let payload = serde_json::to_value(build_kiro_payload(unified, &options)?)?;
        self.debug
            .record_body(&request_id, "kiro_request", &payload.to_string());

        tracing::info!(
            "[KIRO_CONVERT] 请求 {}: model={} -> {}, stream={}, prompt≈{} tokens",
            request_id,
            model,
            options.model_id,
            stream,
            prompt_tokens
        );

        Ok(PreparedRequest {
            request_id,
            model,
            stream,
            payload,
            usage: UsageCalculator::new(self.estimator.clone(), max_input_tokens, prompt_tokens),
            prompt_tokens,
        })
    }

    async fn handle(
        &self,
        unified: UnifiedRequest,
        dialect: Dialect,
        request_id: String,
        cancel: CancellationToken,
    ) -> Result<GatewayResponse, GatewayError> {
        let prepared = match self.prepare(unified, request_id.clone()).await {
            Ok(prepared) => prepared,
            Err(e) => {
                self.debug.finish(&request_id, false);
                return Err(e);
            }
        };

        let result = if prepared.stream {
            match dialect {
                Dialect::OpenAi => {
                    let generator = OpenAiSseGenerator::new(&prepared.model);
                    self.stream(prepared, generator, cancel).await
                }
                Dialect::Anthropic => {
                    let generator =
                        AnthropicSseGenerator::new(&prepared.model, prepared.prompt_tokens);
                    self.stream(prepared, generator, cancel).await
                }
            }
            .map(GatewayResponse::Stream)
        } else {
            self.complete(prepared, dialect, cancel)
                .await
                .map(GatewayResponse::Complete)
        };

        if let Err(e) = &result {
            if !e.is_cancelled() {
                tracing::error!("[KIRO_HTTP] 请求 {} 失败: {}", request_id, e);
            }
            self.debug.finish(&request_id, false);
        }
        result
    }

    async fn stream<G>(
        &self,
        prepared: PreparedRequest,
        generator: G,
        cancel: CancellationToken,
    ) -> Result<SseStream, GatewayError>
    where
        G: SseGenerator + 'static,
    {
        let consumer = SseStreamConsumer::new(
            KiroStreamProcessor::new(&self.config.thinking),
            generator,
            prepared.usage,
            self.debug.clone(),
            prepared.request_id,
        );
        let http = &self.http;
        let payload = &prepared.payload;

        stream_with_first_token_retry(
            FirstTokenPolicy::from(&self.config.timeouts),
            || http.open_assistant_stream(payload),
            consumer,
            cancel,
        )
        .await
    }

    async fn complete(
        &self,
        prepared: PreparedRequest,
        dialect: Dialect,
        cancel: CancellationToken,
    ) -> Result<Value, GatewayError> {
        let body = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(GatewayError::Cancelled),
            body = self.http.generate_assistant_response(&prepared.payload) => body?,
        };
        self.debug.record_chunk(&prepared.request_id, &body);

        let mut processor = KiroStreamProcessor::new(&self.config.thinking);
        let result = collect_response(&body, &mut processor);
        let usage = prepared.usage.calculate(&result);

        let response = match dialect {
            Dialect::OpenAi => OpenAiResponseRenderer {
                model: prepared.model,
            }
            .render(&result, &usage),
            Dialect::Anthropic => AnthropicResponseRenderer {
                model: prepared.model,
            }
            .render(&result, &usage),
        };

        self.debug
            .record_body(&prepared.request_id, "response", &response.to_string());
        self.debug.finish(&prepared.request_id, true);
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{EndpointsConfig, ThinkingConfig};
    use crate::logger::NoopDebugSink;
    use crate::models::openai::ChatMessage;
    use crate::providers::traits::mock::StaticTokenProvider;
    use crate::resilience::{RetryConfig, TimeoutConfig};
    use futures::StreamExt;
    use serde_json::json;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn frame(payload: &Value) -> Vec<u8> {
        let mut bytes = vec![0x00, 0x00, 0x01, 0x0b, 0x0d, b':', b'e', b'v'];
        bytes.extend_from_slice(payload.to_string().as_bytes());
        bytes.extend_from_slice(&[0xab, 0xcd, 0xef, 0x01]);
        bytes
    }

    fn upstream_body() -> Vec<u8> {
        let mut body = frame(&json!({"content": "<thinking>plan</thinking>"}));
        body.extend(frame(&json!({"content": "Hello there"})));
        body.extend(frame(&json!({"contextUsagePercentage": 1.0})));
        body
    }

    async fn gateway(server: &MockServer) -> KiroGateway {
        let mut config = GatewayConfig::default();
        config.endpoints = EndpointsConfig {
            api_host: server.uri(),
            ..Default::default()
        };
        config.retry = RetryConfig::new(1, 1, 5);
        config.timeouts = TimeoutConfig {
            first_token_timeout_ms: 2_000,
            ..Default::default()
        };
        config.thinking = ThinkingConfig::default();

        Mock::given(method("GET"))
            .and(path("/ListAvailableModels"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "models": [{"modelId": "claude-sonnet-4.5", "tokenLimits": {"maxInputTokens": 100000}}]
            })))
            .mount(server)
            .await;

        let auth: Arc<dyn AccessTokenProvider> = Arc::new(StaticTokenProvider::default());
        let http = KiroHttpClient::new(
            ClientFactory::new(),
            auth.clone(),
            &config.endpoints,
            config.retry.clone(),
            config.timeouts.clone(),
        );
        KiroGateway::from_parts(
            config.clone(),
            auth,
            http,
            Arc::new(ModelInfoCache::new(config.model_cache_ttl_secs)),
            Arc::new(NoopDebugSink),
        )
    }

    fn openai_request(stream: bool) -> ChatCompletionRequest {
        ChatCompletionRequest {
            model: "claude-sonnet-4-5-20250929".into(),
            messages: vec![
                ChatMessage::text("system", "Be brief."),
                ChatMessage::text("user", "Hi"),
            ],
            stream,
            tools: None,
            tool_choice: None,
            temperature: None,
            max_tokens: None,
            max_completion_tokens: None,
            stream_options: None,
        }
    }

    #[tokio::test]
    async fn test_chat_completions_non_streaming() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/generateAssistantResponse"))
            .and(body_string_contains("\"modelId\":\"claude-sonnet-4.5\""))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(upstream_body()))
            .expect(1)
            .mount(&server)
            .await;

        let gateway = gateway(&server).await;
        let response = gateway
            .chat_completions(openai_request(false), CancellationToken::new())
            .await
            .unwrap();
        let GatewayResponse::Complete(value) = response else {
            panic!("expected a complete response");
        };

        assert_eq!(value["object"], "chat.completion");
        assert_eq!(value["model"], "claude-sonnet-4-5-20250929");
        assert_eq!(value["choices"][0]["message"]["content"], "Hello there");
        assert_eq!(value["choices"][0]["message"]["reasoning_content"], "plan");
        assert_eq!(value["choices"][0]["finish_reason"], "stop");
        // 1% * 100000
        assert_eq!(value["usage"]["total_tokens"], 1000);
        assert!(gateway.model_cache().contains("claude-sonnet-4.5"));
    }

    #[tokio::test]
    async fn test_messages_streaming() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/generateAssistantResponse"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(upstream_body()))
            .mount(&server)
            .await;

        let gateway = gateway(&server).await;
        let request: AnthropicMessagesRequest = serde_json::from_value(json!({
            "model": "claude-sonnet-4-5",
            "max_tokens": 1024,
            "stream": true,
            "system": [{"type": "text", "text": "Be brief.", "cache_control": {"type": "ephemeral"}}],
            "messages": [{"role": "user", "content": "Hi"}]
        }))
        .unwrap();

        let response = gateway
            .messages(request, CancellationToken::new())
            .await
            .unwrap();
        let GatewayResponse::Stream(stream) = response else {
            panic!("expected a stream");
        };
        let frames: Vec<String> = stream.collect().await;
        let all = frames.concat();

        assert!(frames[0].starts_with("event: message_start"));
        assert!(all.contains("\"thinking\":\"plan\""));
        assert!(all.contains("\"text\":\"Hello there\""));
        assert!(all.contains("\"stop_reason\":\"end_turn\""));
        assert!(frames.last().unwrap().starts_with("event: message_stop"));
    }

    #[tokio::test]
    async fn test_upstream_status_is_returned_as_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_string("Improperly formed request"))
            .mount(&server)
            .await;

        let gateway = gateway(&server).await;
        let err = gateway
            .chat_completions(openai_request(true), CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), 400);
    }

    #[tokio::test]
    async fn test_empty_messages_is_validation_error() {
        let server = MockServer::start().await;
        let gateway = gateway(&server).await;
        let mut request = openai_request(false);
        request.messages.clear();

        let err = gateway
            .chat_completions(request, CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::Validation(_)));
    }

    #[tokio::test]
    async fn test_cancelled_before_response() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_bytes(upstream_body())
                    .set_delay(std::time::Duration::from_secs(5)),
            )
            .mount(&server)
            .await;

        let gateway = gateway(&server).await;
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let err = gateway
            .chat_completions(openai_request(false), cancel)
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
    }

    #[tokio::test]
    async fn test_available_models_after_refresh() {
        let server = MockServer::start().await;
        let gateway = gateway(&server).await;
        assert!(gateway.available_models().contains(&"auto".to_string()));

        assert_eq!(gateway.refresh_models().await.unwrap(), 1);
        let models = gateway.available_models();
        assert_eq!(models[0], "claude-sonnet-4.5");
        assert!(models.contains(&"auto-kiro".to_string()));
        gateway.close();
    }
}
