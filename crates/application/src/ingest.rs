//! 消息接收管道
//!
//! 解析 -> （附件写入）-> 持久化 -> 扇出到收件人的所有连接。

use std::sync::Arc;

use domain::{AttachmentRef, DomainError, Message, MessageId, NewMessage, RepositoryError};
use thiserror::Error;

use crate::attachment::{AttachmentError, AttachmentNamer, AttachmentStore};
use crate::clock::Clock;
use crate::connection::Connection;
use crate::dto::DeliveryFrame;
use crate::payload::{Attachment, InboundPayload, PayloadError};
use crate::registry::ConnectionRegistry;
use crate::repository::MessageRepository;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestOutcome {
    Delivered {
        message_id: MessageId,
        recipients: usize,
    },
    /// 负载不满足建消息条件，静默丢弃
    Dropped,
}

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("malformed payload: {0}")]
    MalformedPayload(#[from] PayloadError),
    #[error("failed to persist message: {0}")]
    Persistence(#[from] RepositoryError),
    #[error("attachment error: {0}")]
    Attachment(#[from] AttachmentError),
    #[error("domain error: {0}")]
    Domain(#[from] DomainError),
}

pub struct MessageIngesterDependencies {
    pub registry: Arc<ConnectionRegistry>,
    pub message_repository: Arc<dyn MessageRepository>,
    pub attachment_store: Arc<dyn AttachmentStore>,
    pub clock: Arc<dyn Clock>,
    /// 为 false 时附件异步写入，投递不等待写入完成
    pub await_attachment_writes: bool,
}

pub struct MessageIngester {
    registry: Arc<ConnectionRegistry>,
    messages: Arc<dyn MessageRepository>,
    attachments: Arc<dyn AttachmentStore>,
    namer: AttachmentNamer,
    clock: Arc<dyn Clock>,
    await_attachment_writes: bool,
}

impl MessageIngester {
    pub fn new(deps: MessageIngesterDependencies) -> Self {
        Self {
            registry: deps.registry,
            messages: deps.message_repository,
            attachments: deps.attachment_store,
            namer: AttachmentNamer::new(deps.clock.clone()),
            clock: deps.clock,
            await_attachment_writes: deps.await_attachment_writes,
        }
    }

    pub async fn ingest(
        &self,
        sender: &Connection,
        raw: &str,
    ) -> Result<IngestOutcome, IngestError> {
        let (recipient, text, attachment) = match InboundPayload::parse(raw)? {
            InboundPayload::Invalid => {
                tracing::debug!(connection_id = %sender.id(), "消息缺少收件人或内容，已丢弃");
                return Ok(IngestOutcome::Dropped);
            }
            InboundPayload::TextOnly { recipient, text } => (recipient, Some(text), None),
            InboundPayload::AttachmentOnly {
                recipient,
                attachment,
            } => (recipient, None, Some(attachment)),
            InboundPayload::Both {
                recipient,
                text,
                attachment,
            } => (recipient, Some(text), Some(attachment)),
        };

        let file = match attachment {
            Some(attachment) => Some(self.store_attachment(attachment).await?),
            None => None,
        };

        let draft = NewMessage::new(sender.user_id(), recipient, text, file, self.clock.now())?;
        let message = self.messages.save(draft).await?;
        let recipients = self.fan_out(&message).await;

        tracing::info!(
            message_id = %message.id,
            sender = %message.sender,
            recipient = %message.recipient,
            recipients,
            "消息已投递"
        );

        Ok(IngestOutcome::Delivered {
            message_id: message.id,
            recipients,
        })
    }

    async fn store_attachment(&self, attachment: Attachment) -> Result<AttachmentRef, AttachmentError> {
        let name = self.namer.next(attachment.extension());
        let size = attachment.bytes.len();

        if self.await_attachment_writes {
            self.attachments.write(&name, attachment.bytes).await?;
            tracing::info!(file = %name, size, "附件已保存");
            return Ok(name);
        }

        // 不等待写入完成：收件人可能先于文件落盘收到附件名
        let store = self.attachments.clone();
        let stored = name.clone();
        tokio::spawn(async move {
            match store.write(&stored, attachment.bytes).await {
                Ok(()) => tracing::info!(file = %stored, size, "附件已保存"),
                Err(err) => tracing::error!(file = %stored, error = %err, "附件保存失败"),
            }
        });
        Ok(name)
    }

    async fn fan_out(&self, message: &Message) -> usize {
        let payload = match serde_json::to_string(&DeliveryFrame::from(message)) {
            Ok(json) => json,
            Err(err) => {
                tracing::warn!(error = %err, "failed to serialize delivery payload");
                return 0;
            }
        };

        self.registry
            .find_by_identity(message.recipient)
            .await
            .iter()
            .filter(|connection| connection.send_text(payload.clone()))
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::memory::{InMemoryAttachmentStore, InMemoryMessageRepository};
    use crate::repository::MockMessageRepository;
    use crate::test_support::{connection, connection_for, drain_texts};
    use chrono::TimeZone;
    use std::time::Duration;

    struct Fixture {
        registry: Arc<ConnectionRegistry>,
        messages: Arc<InMemoryMessageRepository>,
        attachments: Arc<InMemoryAttachmentStore>,
        ingester: MessageIngester,
    }

    fn fixture(await_attachment_writes: bool) -> Fixture {
        let registry = Arc::new(ConnectionRegistry::new());
        let messages = Arc::new(InMemoryMessageRepository::new());
        let attachments = Arc::new(InMemoryAttachmentStore::new());
        let clock = FixedClock(chrono::Utc.timestamp_millis_opt(1_700_000_000_000).unwrap());
        let ingester = MessageIngester::new(MessageIngesterDependencies {
            registry: registry.clone(),
            message_repository: messages.clone(),
            attachment_store: attachments.clone(),
            clock: Arc::new(clock),
            await_attachment_writes,
        });
        Fixture {
            registry,
            messages,
            attachments,
            ingester,
        }
    }

    #[tokio::test]
    async fn text_message_is_persisted_and_delivered() {
        let fx = fixture(false);
        let (alice, mut alice_rx) = connection("alice");
        let (bob, mut bob_rx) = connection("bob");
        fx.registry.add(alice.clone()).await;
        fx.registry.add(bob.clone()).await;

        let raw = format!(r#"{{"recipient":"{}","text":"hi"}}"#, bob.user_id());
        let outcome = fx.ingester.ingest(&alice, &raw).await.unwrap();

        let stored = fx.messages.all().await;
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].sender, alice.user_id());
        assert_eq!(stored[0].recipient, bob.user_id());
        assert_eq!(stored[0].text.as_deref(), Some("hi"));
        assert_eq!(
            outcome,
            IngestOutcome::Delivered {
                message_id: stored[0].id,
                recipients: 1
            }
        );

        let frames = drain_texts(&mut bob_rx);
        assert_eq!(frames.len(), 1);
        let frame: serde_json::Value = serde_json::from_str(&frames[0]).unwrap();
        assert_eq!(frame["text"], "hi");
        assert_eq!(frame["sender"], alice.user_id().to_string());
        assert_eq!(frame["recipient"], bob.user_id().to_string());
        assert!(frame["file"].is_null());
        assert_eq!(frame["_id"], stored[0].id.to_string());

        // 发送方不会收到回显
        assert!(drain_texts(&mut alice_rx).is_empty());
    }

    #[tokio::test]
    async fn attachment_name_follows_timestamp_pattern() {
        let fx = fixture(true);
        let (alice, _alice_rx) = connection("alice");
        let (bob, mut bob_rx) = connection("bob");
        fx.registry.add(bob.clone()).await;

        let raw = format!(
            r#"{{"recipient":"{}","file":{{"name":"photo.png","data":"data:image/png;base64,aGVsbG8="}}}}"#,
            bob.user_id()
        );
        fx.ingester.ingest(&alice, &raw).await.unwrap();

        let frame: DeliveryFrame = serde_json::from_str(&drain_texts(&mut bob_rx)[0]).unwrap();
        assert_eq!(frame.file.as_deref(), Some("1700000000000.png"));
        assert!(frame.text.is_none());
        assert_eq!(
            fx.attachments.get("1700000000000.png").await,
            Some(b"hello".to_vec())
        );
        let stored = fx.messages.all().await;
        assert_eq!(stored[0].file.as_ref().map(|f| f.as_str()), Some("1700000000000.png"));
    }

    #[tokio::test]
    async fn attachment_write_is_not_awaited_by_default() {
        let fx = fixture(false);
        let (alice, _alice_rx) = connection("alice");
        let (bob, mut bob_rx) = connection("bob");
        fx.registry.add(bob.clone()).await;

        let raw = format!(
            r#"{{"recipient":"{}","text":"see file","file":{{"name":"notes.txt","data":"aGk="}}}}"#,
            bob.user_id()
        );
        fx.ingester.ingest(&alice, &raw).await.unwrap();
        let frame: DeliveryFrame = serde_json::from_str(&drain_texts(&mut bob_rx)[0]).unwrap();
        let name = frame.file.unwrap();
        assert_eq!(name, "1700000000000.txt");

        tokio::time::timeout(Duration::from_secs(1), async {
            while fx.attachments.get(&name).await.is_none() {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("attachment eventually written");
    }

    #[tokio::test]
    async fn payload_without_content_creates_nothing() {
        let fx = fixture(true);
        let (alice, _alice_rx) = connection("alice");
        let (bob, mut bob_rx) = connection("bob");
        fx.registry.add(bob.clone()).await;

        let raw = format!(r#"{{"recipient":"{}"}}"#, bob.user_id());
        assert_eq!(
            fx.ingester.ingest(&alice, &raw).await.unwrap(),
            IngestOutcome::Dropped
        );
        let raw = r#"{"file":{"name":"a.png","data":"aGk="}}"#;
        assert_eq!(
            fx.ingester.ingest(&alice, raw).await.unwrap(),
            IngestOutcome::Dropped
        );

        assert!(fx.messages.all().await.is_empty());
        assert!(fx.attachments.is_empty().await);
        assert!(drain_texts(&mut bob_rx).is_empty());
    }

    #[tokio::test]
    async fn malformed_payload_is_reported_without_side_effects() {
        let fx = fixture(true);
        let (alice, _alice_rx) = connection("alice");

        let result = fx.ingester.ingest(&alice, "{not json").await;
        assert!(matches!(result, Err(IngestError::MalformedPayload(_))));
        assert!(fx.messages.all().await.is_empty());
    }

    #[tokio::test]
    async fn fan_out_reaches_every_recipient_device_only() {
        let fx = fixture(false);
        let (alice, mut alice_rx) = connection("alice");
        let (phone, mut phone_rx) = connection("bob");
        let (laptop, mut laptop_rx) = connection_for(phone.identity().clone());
        let (carol, mut carol_rx) = connection("carol");
        for conn in [&alice, &phone, &laptop, &carol] {
            fx.registry.add(conn.clone()).await;
        }

        let raw = format!(r#"{{"recipient":"{}","text":"both devices"}}"#, phone.user_id());
        let outcome = fx.ingester.ingest(&alice, &raw).await.unwrap();

        assert!(matches!(
            outcome,
            IngestOutcome::Delivered { recipients: 2, .. }
        ));
        assert_eq!(drain_texts(&mut phone_rx).len(), 1);
        assert_eq!(drain_texts(&mut laptop_rx).len(), 1);
        assert!(drain_texts(&mut carol_rx).is_empty());
        assert!(drain_texts(&mut alice_rx).is_empty());
    }

    #[tokio::test]
    async fn offline_recipient_still_gets_persisted_message() {
        let fx = fixture(false);
        let (alice, _alice_rx) = connection("alice");
        let (bob, bob_rx) = connection("bob");
        drop(bob_rx);

        let raw = format!(r#"{{"recipient":"{}","text":"later"}}"#, bob.user_id());
        let outcome = fx.ingester.ingest(&alice, &raw).await.unwrap();
        assert!(matches!(
            outcome,
            IngestOutcome::Delivered { recipients: 0, .. }
        ));
        assert_eq!(fx.messages.all().await.len(), 1);
    }

    #[tokio::test]
    async fn persistence_failure_skips_fan_out() {
        let registry = Arc::new(ConnectionRegistry::new());
        let mut repository = MockMessageRepository::new();
        repository
            .expect_save()
            .times(1)
            .returning(|_| Err(RepositoryError::storage("database unavailable")));
        let ingester = MessageIngester::new(MessageIngesterDependencies {
            registry: registry.clone(),
            message_repository: Arc::new(repository),
            attachment_store: Arc::new(InMemoryAttachmentStore::new()),
            clock: Arc::new(FixedClock(chrono::Utc::now())),
            await_attachment_writes: false,
        });
        let (alice, _alice_rx) = connection("alice");
        let (bob, mut bob_rx) = connection("bob");
        registry.add(bob.clone()).await;

        let raw = format!(r#"{{"recipient":"{}","text":"hi"}}"#, bob.user_id());
        let result = ingester.ingest(&alice, &raw).await;

        assert!(matches!(result, Err(IngestError::Persistence(_))));
        assert!(drain_texts(&mut bob_rx).is_empty());
    }
}
