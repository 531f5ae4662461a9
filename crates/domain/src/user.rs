use serde::{Deserialize, Serialize};

use crate::value_objects::{PasswordHash, Timestamp, UserId, Username};

/// 注册用户，用于凭证签发与校验。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub username: Username,
    #[serde(skip_serializing)] // 密码字段不暴露给客户端
    pub password: PasswordHash,
    pub created_at: Timestamp,
}

impl User {
    pub fn profile(&self) -> UserProfile {
        UserProfile {
            id: self.id,
            username: self.username.clone(),
        }
    }
}

/// 新注册用户，ID 由仓储分配。
#[derive(Debug, Clone)]
pub struct NewUser {
    pub username: Username,
    pub password: PasswordHash,
    pub created_at: Timestamp,
}

/// 通讯录条目：标识和显示名。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: UserId,
    pub username: Username,
}
