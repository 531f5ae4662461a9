//! 两个用户之间的历史消息查询

use std::sync::Arc;

use domain::UserId;

use crate::{dto::MessageDto, error::ApplicationError, repository::MessageRepository};

pub struct MessageHistoryService {
    messages: Arc<dyn MessageRepository>,
}

impl MessageHistoryService {
    pub fn new(messages: Arc<dyn MessageRepository>) -> Self {
        Self { messages }
    }

    /// 双向会话，按创建时间升序
    pub async fn conversation(
        &self,
        viewer: UserId,
        peer: UserId,
    ) -> Result<Vec<MessageDto>, ApplicationError> {
        let messages = self.messages.find_conversation(viewer, peer).await?;
        tracing::debug!(viewer = %viewer, peer = %peer, count = messages.len(), "查询历史消息");
        Ok(messages.iter().map(MessageDto::from).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryMessageRepository;
    use crate::repository::MockMessageRepository;
    use chrono::{Duration, TimeZone, Utc};
    use domain::{NewMessage, RepositoryError};
    use uuid::Uuid;

    fn user() -> UserId {
        UserId::from(Uuid::new_v4())
    }

    #[tokio::test]
    async fn conversation_includes_both_directions_in_order() {
        let repository = Arc::new(InMemoryMessageRepository::new());
        let (alice, bob, carol) = (user(), user(), user());
        let start = Utc.timestamp_millis_opt(1_700_000_000_000).unwrap();

        // 故意乱序写入
        let drafts = [
            (bob, alice, "second", 2),
            (alice, bob, "first", 1),
            (alice, carol, "elsewhere", 0),
            (alice, bob, "third", 3),
        ];
        for (sender, recipient, text, offset) in drafts {
            let draft = NewMessage::new(
                sender,
                recipient,
                Some(text.to_string()),
                None,
                start + Duration::seconds(offset),
            )
            .unwrap();
            repository.save(draft).await.unwrap();
        }

        let service = MessageHistoryService::new(repository);
        let texts: Vec<String> = service
            .conversation(bob, alice)
            .await
            .unwrap()
            .into_iter()
            .filter_map(|message| message.text)
            .collect();
        assert_eq!(texts, vec!["first", "second", "third"]);
    }

    #[tokio::test]
    async fn storage_failure_is_reported() {
        let mut repository = MockMessageRepository::new();
        repository
            .expect_find_conversation()
            .returning(|_, _| Err(RepositoryError::storage("connection reset")));

        let service = MessageHistoryService::new(Arc::new(repository));
        let err = service.conversation(user(), user()).await.unwrap_err();
        assert!(matches!(err, ApplicationError::Repository(_)));
    }
}
