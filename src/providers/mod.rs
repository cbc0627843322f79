//! 上游凭证 Provider
//!
//! 目前只有 Kiro 一种实现，传输层通过 `AccessTokenProvider` 使用它。

pub mod kiro;
pub mod traits;

pub use kiro::KiroTokenManager;
pub use traits::AccessTokenProvider;
