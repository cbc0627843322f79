//! Kiro (CodeWhisperer) 凭证与认证

pub mod credentials;
pub mod headers;
pub mod oauth;
pub mod token_manager;

pub use credentials::{AuthType, CredentialError, CredentialSource, KiroCredentials};
pub use headers::{kiro_headers, machine_fingerprint};
pub use oauth::{RefreshError, RefreshedToken, TokenRefresher};
pub use token_manager::KiroTokenManager;
