use domain::{Message, MessageId, Timestamp, User, UserId, UserProfile};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserDto {
    #[serde(rename = "_id")]
    pub id: UserId,
    pub username: String,
}

impl From<&User> for UserDto {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            username: user.username.to_string(),
        }
    }
}

impl From<UserProfile> for UserDto {
    fn from(profile: UserProfile) -> Self {
        Self {
            id: profile.id,
            username: profile.username.to_string(),
        }
    }
}

/// 历史消息
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MessageDto {
    #[serde(rename = "_id")]
    pub id: MessageId,
    pub sender: UserId,
    pub recipient: UserId,
    pub text: Option<String>,
    pub file: Option<String>,
    #[serde(rename = "createdAt")]
    pub created_at: Timestamp,
}

impl From<&Message> for MessageDto {
    fn from(message: &Message) -> Self {
        Self {
            id: message.id,
            sender: message.sender,
            recipient: message.recipient,
            text: message.text.clone(),
            file: message.file.as_ref().map(|file| file.to_string()),
            created_at: message.created_at,
        }
    }
}

/// 推送给收件人连接的投递帧
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeliveryFrame {
    pub text: Option<String>,
    pub sender: UserId,
    pub recipient: UserId,
    pub file: Option<String>,
    #[serde(rename = "_id")]
    pub id: MessageId,
}

impl From<&Message> for DeliveryFrame {
    fn from(message: &Message) -> Self {
        Self {
            text: message.text.clone(),
            sender: message.sender,
            recipient: message.recipient,
            file: message.file.as_ref().map(|file| file.to_string()),
            id: message.id,
        }
    }
}
