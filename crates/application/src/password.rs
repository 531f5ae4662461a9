//! 账户密码的哈希接口与注册时的口令规则

use async_trait::async_trait;
use domain::{DomainError, PasswordHash};
use thiserror::Error;

/// bcrypt 只使用口令的前 72 个字节，更长的口令会被静默截断
pub const MAX_PASSWORD_BYTES: usize = 72;

#[derive(Debug, Error)]
pub enum PasswordHasherError {
    #[error("hash error: {0}")]
    Hash(String),
    #[error("verify error: {0}")]
    Verify(String),
}

impl PasswordHasherError {
    pub fn hash_error(message: impl Into<String>) -> Self {
        Self::Hash(message.into())
    }

    pub fn verify_error(message: impl Into<String>) -> Self {
        Self::Verify(message.into())
    }
}

/// 注册时校验新口令：非空，且不超过哈希算法实际使用的长度
pub fn check_new_password(plaintext: &str) -> Result<(), DomainError> {
    if plaintext.is_empty() {
        return Err(DomainError::invalid_argument("password", "must not be empty"));
    }
    if plaintext.len() > MAX_PASSWORD_BYTES {
        return Err(DomainError::invalid_argument(
            "password",
            format!("must be at most {MAX_PASSWORD_BYTES} bytes"),
        ));
    }
    Ok(())
}

/// 注册时生成哈希，登录时校验；实现可以是 CPU 密集型的，由适配器自行决定执行位置
#[async_trait]
pub trait PasswordHasher: Send + Sync {
    async fn hash(&self, plaintext: &str) -> Result<PasswordHash, PasswordHasherError>;
    async fn verify(
        &self,
        plaintext: &str,
        hashed: &PasswordHash,
    ) -> Result<bool, PasswordHasherError>;
}
