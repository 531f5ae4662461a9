use std::fmt;

use serde::{Deserialize, Serialize};

use crate::errors::DomainError;
use crate::value_objects::{MessageId, Timestamp, UserId};

/// 附件存储名，形如 `<毫秒时间戳>.<扩展名>`。
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AttachmentRef(String);

impl AttachmentRef {
    /// 由时间令牌和原始扩展名构造存储名。
    ///
    /// 扩展名只保留 ASCII 字母和数字，避免存储名中出现路径分隔符。
    pub fn from_token(token: i64, extension: Option<&str>) -> Self {
        let extension: String = extension
            .unwrap_or_default()
            .chars()
            .filter(char::is_ascii_alphanumeric)
            .collect();
        if extension.is_empty() {
            Self(token.to_string())
        } else {
            Self(format!("{token}.{extension}"))
        }
    }

    /// 从已经存储的名字恢复（例如数据库读出）。
    pub fn from_stored(name: impl Into<String>) -> Result<Self, DomainError> {
        let name = name.into();
        if name.is_empty() || name.contains(['/', '\\']) || name.starts_with('.') {
            return Err(DomainError::invalid_argument("file", "invalid stored name"));
        }
        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AttachmentRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// 待持久化的消息，尚未分配 ID。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMessage {
    pub sender: UserId,
    pub recipient: UserId,
    pub text: Option<String>,
    pub file: Option<AttachmentRef>,
    pub created_at: Timestamp,
}

impl NewMessage {
    /// 只有存在非空正文或附件时才允许创建消息。
    pub fn new(
        sender: UserId,
        recipient: UserId,
        text: Option<String>,
        file: Option<AttachmentRef>,
        created_at: Timestamp,
    ) -> Result<Self, DomainError> {
        let text = text.filter(|text| !text.is_empty());
        if text.is_none() && file.is_none() {
            return Err(DomainError::EmptyMessage);
        }
        Ok(Self {
            sender,
            recipient,
            text,
            file,
            created_at,
        })
    }

    pub fn into_message(self, id: MessageId) -> Message {
        Message {
            id,
            sender: self.sender,
            recipient: self.recipient,
            text: self.text,
            file: self.file,
            created_at: self.created_at,
        }
    }
}

/// 已持久化的聊天消息，创建后不可变。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub sender: UserId,
    pub recipient: UserId,
    pub text: Option<String>,
    pub file: Option<AttachmentRef>,
    pub created_at: Timestamp,
}

impl Message {
    /// 判断消息是否属于两个用户之间的会话（不区分方向）。
    pub fn is_between(&self, a: UserId, b: UserId) -> bool {
        (self.sender == a && self.recipient == b) || (self.sender == b && self.recipient == a)
    }
}
