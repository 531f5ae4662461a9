//! 应用层实现。
//!
//! 连接注册、心跳检测、在线列表广播和消息接收都在这里完成，
//! 对外部适配器（密码哈希、凭证校验、存储）只依赖抽象接口。

pub mod attachment;
pub mod auth;
pub mod clock;
pub mod connection;
pub mod dto;
pub mod error;
pub mod hub;
pub mod ingest;
pub mod liveness;
pub mod memory;
pub mod password;
pub mod payload;
pub mod presence;
pub mod registry;
pub mod repository;
pub mod services;

pub use attachment::{AttachmentError, AttachmentNamer, AttachmentStore};
pub use auth::{AuthVerifier, AuthenticationFailure};
pub use clock::{Clock, FixedClock, SystemClock};
pub use connection::{AuthenticatedIdentity, Connection, LivenessState, WsCommand};
pub use dto::{DeliveryFrame, MessageDto, UserDto};
pub use error::ApplicationError;
pub use hub::{ConnectionHub, ConnectionHubDependencies};
pub use ingest::{IngestError, IngestOutcome, MessageIngester, MessageIngesterDependencies};
pub use liveness::{HeartbeatResult, LivenessMonitor};
pub use password::{check_new_password, PasswordHasher, PasswordHasherError, MAX_PASSWORD_BYTES};
pub use payload::{Attachment, InboundPayload, PayloadError};
pub use presence::{PresenceBroadcaster, PresenceEntry, PresenceSnapshot};
pub use registry::ConnectionRegistry;
pub use repository::{MessageRepository, UserRepository};
pub use services::{
    AuthenticateUserRequest, MessageHistoryService, RegisterUserRequest, UserService,
    UserServiceDependencies,
};
