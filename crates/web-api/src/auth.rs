//! JWT 认证模块
//!
//! 提供 JWT token 生成、验证，以及从 Cookie / Authorization 头 / 查询参数中提取凭证

use application::{AuthVerifier, AuthenticationFailure};
use async_trait::async_trait;
use axum::http::{header, HeaderMap};
use config::JwtConfig;
use domain::UserId;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ApiError;

/// JWT Claims 结构
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub user_id: Uuid,
    pub username: String,
    pub exp: i64, // 过期时间 (Unix timestamp)
}

/// JWT Token 服务
#[derive(Clone)]
pub struct JwtService {
    config: JwtConfig,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
}

impl JwtService {
    pub fn new(config: JwtConfig) -> Self {
        let encoding_key = EncodingKey::from_secret(config.secret.as_ref());
        let decoding_key = DecodingKey::from_secret(config.secret.as_ref());

        Self {
            config,
            encoding_key,
            decoding_key,
        }
    }

    pub fn cookie_name(&self) -> &str {
        &self.config.cookie_name
    }

    /// 生成 JWT token
    pub fn generate_token(&self, user_id: UserId, username: &str) -> Result<String, ApiError> {
        let now = chrono::Utc::now();
        let exp = now + chrono::Duration::hours(self.config.expiration_hours);

        let claims = Claims {
            user_id: user_id.into(),
            username: username.to_owned(),
            exp: exp.timestamp(),
        };

        encode(&Header::default(), &claims, &self.encoding_key)
            .map_err(|err| ApiError::internal_server_error(format!("Token generation failed: {err}")))
    }

    /// 验证并解析 JWT token
    pub fn verify_token(&self, token: &str) -> Result<Claims, ApiError> {
        decode::<Claims>(token, &self.decoding_key, &Validation::default())
            .map(|token_data| token_data.claims)
            .map_err(|err| ApiError::unauthorized(format!("Invalid token: {err}")))
    }

    /// 从请求中提取并验证凭证，用于需要登录的 HTTP 接口
    pub fn authenticate_request(
        &self,
        headers: &HeaderMap,
        query_token: Option<&str>,
    ) -> Result<UserId, ApiError> {
        let token = extract_credential(headers, query_token, self.cookie_name())
            .ok_or_else(|| ApiError::unauthorized("Missing credential"))?;
        let claims = self.verify_token(&token)?;
        Ok(UserId::from(claims.user_id))
    }

    /// 登录成功后写入的会话 Cookie
    pub fn session_cookie(&self, token: &str) -> String {
        format!(
            "{}={}; Path=/; Max-Age={}; SameSite=None; Secure",
            self.config.cookie_name,
            token,
            self.config.expiration_hours * 3600
        )
    }

    /// 清除会话 Cookie
    pub fn expired_cookie(&self) -> String {
        format!(
            "{}=; Path=/; Max-Age=0; SameSite=None; Secure",
            self.config.cookie_name
        )
    }
}

#[async_trait]
impl AuthVerifier for JwtService {
    async fn verify(&self, credential: &str) -> Result<UserId, AuthenticationFailure> {
        decode::<Claims>(credential, &self.decoding_key, &Validation::default())
            .map(|token_data| UserId::from(token_data.claims.user_id))
            .map_err(|err| AuthenticationFailure::InvalidCredential(err.to_string()))
    }
}

/// 按 Cookie、`Authorization: Bearer`、`?token=` 的顺序查找凭证
pub fn extract_credential(
    headers: &HeaderMap,
    query_token: Option<&str>,
    cookie_name: &str,
) -> Option<String> {
    cookie_value(headers, cookie_name)
        .or_else(|| bearer_token(headers))
        .or_else(|| query_token.map(str::to_owned))
        .filter(|token| !token.is_empty())
}

fn cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, value)| *key == name && !value.is_empty())
        .map(|(_, value)| value.to_owned())
}

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(|token| token.trim().to_owned())
}
