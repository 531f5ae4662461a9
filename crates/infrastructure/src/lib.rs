//! 基础设施层实现。
//!
//! 提供数据库仓储、密码哈希、附件文件存储等适配器，实现应用层定义的接口。

pub mod attachment;
pub mod password;
pub mod repository;

pub use attachment::FsAttachmentStore;
pub use password::BcryptPasswordHasher;
pub use repository::{create_pg_pool, PgMessageRepository, PgUserRepository};
