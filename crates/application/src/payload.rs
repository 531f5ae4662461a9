//! 客户端消息解析
//!
//! 入站帧在边界处解析成带标签的变体，`Invalid` 在任何副作用之前被丢弃。

use data_encoding::BASE64;
use domain::UserId;
use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Deserialize)]
struct WireMessage {
    #[serde(default)]
    recipient: Option<String>,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    file: Option<WireFile>,
}

#[derive(Debug, Deserialize)]
struct WireFile {
    name: String,
    data: String,
}

/// 解码后的附件
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub name: String,
    pub bytes: Vec<u8>,
}

impl Attachment {
    /// 原始文件名最后一个 `.` 之后的部分
    pub fn extension(&self) -> Option<&str> {
        self.name
            .rsplit_once('.')
            .map(|(_, ext)| ext)
            .filter(|ext| !ext.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundPayload {
    TextOnly {
        recipient: UserId,
        text: String,
    },
    AttachmentOnly {
        recipient: UserId,
        attachment: Attachment,
    },
    Both {
        recipient: UserId,
        text: String,
        attachment: Attachment,
    },
    /// 缺少收件人，或者既没有正文也没有附件
    Invalid,
}

#[derive(Debug, Error)]
pub enum PayloadError {
    #[error("payload is not valid json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("recipient is not a valid identity: {0}")]
    Recipient(String),
    #[error("attachment data is not valid base64: {0}")]
    Attachment(#[from] data_encoding::DecodeError),
}

impl InboundPayload {
    pub fn parse(raw: &str) -> Result<Self, PayloadError> {
        let wire: WireMessage = serde_json::from_str(raw)?;

        let recipient = match wire.recipient.as_deref().map(str::trim) {
            Some(value) if !value.is_empty() => Some(
                value
                    .parse::<UserId>()
                    .map_err(|err| PayloadError::Recipient(err.to_string()))?,
            ),
            _ => None,
        };
        let text = wire.text.filter(|text| !text.is_empty());

        let Some(recipient) = recipient else {
            return Ok(Self::Invalid);
        };

        let attachment = wire.file.map(decode_attachment).transpose()?;
        Ok(match (text, attachment) {
            (Some(text), None) => Self::TextOnly { recipient, text },
            (None, Some(attachment)) => Self::AttachmentOnly {
                recipient,
                attachment,
            },
            (Some(text), Some(attachment)) => Self::Both {
                recipient,
                text,
                attachment,
            },
            (None, None) => Self::Invalid,
        })
    }
}

fn decode_attachment(file: WireFile) -> Result<Attachment, PayloadError> {
    let bytes = decode_data_url(&file.data)?;
    Ok(Attachment {
        name: file.name,
        bytes,
    })
}

/// 解码 `data:<mime>;base64,<payload>` 或纯 base64 字符串
pub fn decode_data_url(data: &str) -> Result<Vec<u8>, data_encoding::DecodeError> {
    let encoded = match data.split_once(',') {
        Some((_, encoded)) => encoded,
        None => data,
    };
    BASE64.decode(encoded.trim().as_bytes())
}
