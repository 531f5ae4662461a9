//! 内存实现的仓储和附件存储（用于测试和本地开发）

use std::collections::HashMap;

use async_trait::async_trait;
use domain::{
    AttachmentRef, Message, MessageId, NewMessage, NewUser, RepositoryError, User, UserId,
    UserProfile, Username,
};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::attachment::{AttachmentError, AttachmentStore};
use crate::repository::{MessageRepository, UserRepository};

#[derive(Default)]
pub struct InMemoryMessageRepository {
    messages: RwLock<Vec<Message>>,
}

impl InMemoryMessageRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn all(&self) -> Vec<Message> {
        self.messages.read().await.clone()
    }
}

#[async_trait]
impl MessageRepository for InMemoryMessageRepository {
    async fn save(&self, message: NewMessage) -> Result<Message, RepositoryError> {
        let message = message.into_message(MessageId::from(Uuid::new_v4()));
        self.messages.write().await.push(message.clone());
        Ok(message)
    }

    async fn find_conversation(
        &self,
        a: UserId,
        b: UserId,
    ) -> Result<Vec<Message>, RepositoryError> {
        let messages = self.messages.read().await;
        let mut conversation: Vec<Message> = messages
            .iter()
            .filter(|message| message.is_between(a, b))
            .cloned()
            .collect();
        conversation.sort_by_key(|message| message.created_at);
        Ok(conversation)
    }
}

#[derive(Default)]
pub struct InMemoryUserRepository {
    users: RwLock<Vec<User>>,
}

impl InMemoryUserRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UserRepository for InMemoryUserRepository {
    async fn create(&self, user: NewUser) -> Result<User, RepositoryError> {
        let mut users = self.users.write().await;
        if users.iter().any(|existing| existing.username == user.username) {
            return Err(RepositoryError::Conflict);
        }
        let user = User {
            id: UserId::from(Uuid::new_v4()),
            username: user.username,
            password: user.password,
            created_at: user.created_at,
        };
        users.push(user.clone());
        Ok(user)
    }

    async fn find_by_id(&self, id: UserId) -> Result<Option<User>, RepositoryError> {
        let users = self.users.read().await;
        Ok(users.iter().find(|user| user.id == id).cloned())
    }

    async fn find_by_username(&self, username: &Username) -> Result<Option<User>, RepositoryError> {
        let users = self.users.read().await;
        Ok(users.iter().find(|user| &user.username == username).cloned())
    }

    async fn list_profiles(&self) -> Result<Vec<UserProfile>, RepositoryError> {
        let users = self.users.read().await;
        Ok(users.iter().map(User::profile).collect())
    }
}

#[derive(Default)]
pub struct InMemoryAttachmentStore {
    files: RwLock<HashMap<String, Vec<u8>>>,
}

impl InMemoryAttachmentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, name: &str) -> Option<Vec<u8>> {
        self.files.read().await.get(name).cloned()
    }

    pub async fn is_empty(&self) -> bool {
        self.files.read().await.is_empty()
    }
}

#[async_trait]
impl AttachmentStore for InMemoryAttachmentStore {
    async fn write(&self, name: &AttachmentRef, bytes: Vec<u8>) -> Result<(), AttachmentError> {
        self.files
            .write()
            .await
            .insert(name.as_str().to_owned(), bytes);
        Ok(())
    }
}
