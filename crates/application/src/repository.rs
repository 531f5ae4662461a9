use async_trait::async_trait;
use domain::{Message, NewMessage, NewUser, RepositoryError, User, UserId, UserProfile, Username};

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MessageRepository: Send + Sync {
    // 保存消息并返回分配了 ID 的记录
    async fn save(&self, message: NewMessage) -> Result<Message, RepositoryError>;

    // 两个用户之间的会话，按创建时间升序
    async fn find_conversation(
        &self,
        a: UserId,
        b: UserId,
    ) -> Result<Vec<Message>, RepositoryError>;
}

#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn create(&self, user: NewUser) -> Result<User, RepositoryError>;
    async fn find_by_id(&self, id: UserId) -> Result<Option<User>, RepositoryError>;
    async fn find_by_username(&self, username: &Username) -> Result<Option<User>, RepositoryError>;
    // 通讯录：所有用户的标识和显示名
    async fn list_profiles(&self) -> Result<Vec<UserProfile>, RepositoryError>;
}
