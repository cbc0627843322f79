//! Kiro Gateway
//!
//! 让使用 OpenAI Chat Completions 或 Anthropic Messages 协议的客户端透明地调用
//! Kiro (CodeWhisperer) 后端。
//!
//! ```no_run
//! use kiro_gateway::{CancellationToken, GatewayConfig, GatewayResponse, KiroGateway};
//!
//! # async fn run(request: kiro_gateway::models::openai::ChatCompletionRequest) -> anyhow::Result<()> {
//! let config = GatewayConfig::load(None)?;
//! kiro_gateway::logger::init_tracing(&config.logging)?;
//! let gateway = KiroGateway::new(config)?;
//! match gateway.chat_completions(request, CancellationToken::new()).await? {
//!     GatewayResponse::Complete(body) => println!("{body}"),
//!     GatewayResponse::Stream(_frames) => {}
//! }
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod converter;
pub mod error;
pub mod gateway;
pub mod logger;
pub mod model_cache;
pub mod models;
pub mod providers;
pub mod resilience;
pub mod stream;
pub mod tokenizer;
pub mod transport;

pub use config::GatewayConfig;
pub use error::GatewayError;
pub use gateway::{GatewayResponse, KiroGateway, SseStream};
pub use model_cache::ModelInfoCache;
pub use providers::{AccessTokenProvider, KiroTokenManager};
pub use resilience::CancellationToken;
