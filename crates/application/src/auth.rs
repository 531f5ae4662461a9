use async_trait::async_trait;
use domain::UserId;
use thiserror::Error;

/// 握手认证失败，只影响当前连接
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthenticationFailure {
    #[error("missing credential")]
    MissingCredential,
    #[error("invalid credential: {0}")]
    InvalidCredential(String),
    #[error("unknown identity {0}")]
    UnknownIdentity(UserId),
    #[error("identity lookup failed: {0}")]
    DirectoryUnavailable(String),
}

/// 会话凭证校验
#[async_trait]
pub trait AuthVerifier: Send + Sync {
    async fn verify(&self, credential: &str) -> Result<UserId, AuthenticationFailure>;
}
