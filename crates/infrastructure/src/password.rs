use application::{PasswordHasher, PasswordHasherError, MAX_PASSWORD_BYTES};
use async_trait::async_trait;
use bcrypt::{hash, verify, DEFAULT_COST};
use config::SecurityConfig;
use domain::PasswordHash;

/// 账户口令的 bcrypt 适配器，哈希在阻塞线程池中计算
#[derive(Clone)]
pub struct BcryptPasswordHasher {
    cost: u32,
}

impl BcryptPasswordHasher {
    pub fn new(cost: Option<u32>) -> Self {
        Self {
            cost: cost.unwrap_or(DEFAULT_COST),
        }
    }

    /// 按 `security.bcrypt_cost` 构建，未配置时使用 bcrypt 默认强度
    pub fn from_config(config: &SecurityConfig) -> Self {
        Self::new(config.bcrypt_cost)
    }

    pub fn cost(&self) -> u32 {
        self.cost
    }
}

#[async_trait]
impl PasswordHasher for BcryptPasswordHasher {
    async fn hash(&self, plaintext: &str) -> Result<PasswordHash, PasswordHasherError> {
        // 超长口令会被截断，不能生成哈希
        if plaintext.len() > MAX_PASSWORD_BYTES {
            return Err(PasswordHasherError::hash_error(format!(
                "password longer than {MAX_PASSWORD_BYTES} bytes"
            )));
        }
        let cost = self.cost;
        let plaintext = plaintext.to_owned();
        let hashed = tokio::task::spawn_blocking(move || hash(plaintext, cost))
            .await
            .map_err(|err| PasswordHasherError::hash_error(err.to_string()))?
            .map_err(|err| PasswordHasherError::hash_error(err.to_string()))?;

        PasswordHash::new(hashed).map_err(|err| PasswordHasherError::hash_error(err.to_string()))
    }

    async fn verify(
        &self,
        plaintext: &str,
        hashed: &PasswordHash,
    ) -> Result<bool, PasswordHasherError> {
        let plaintext = plaintext.to_owned();
        let hashed = hashed.as_str().to_owned();
        tokio::task::spawn_blocking(move || verify(plaintext, &hashed))
            .await
            .map_err(|err| PasswordHasherError::verify_error(err.to_string()))?
            .map_err(|err| PasswordHasherError::verify_error(err.to_string()))
    }
}

impl Default for BcryptPasswordHasher {
    fn default() -> Self {
        Self::new(None)
    }
}
