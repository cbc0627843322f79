//! 发往 Kiro 后端的 HTTP 传输层

pub mod client_factory;
pub mod http_client;

pub use client_factory::{ClientFactory, ProxyError, ProxyProtocol};
pub use http_client::KiroHttpClient;
