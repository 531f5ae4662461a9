//! 消息中心核心领域模型
//!
//! 包含用户、消息、附件引用等实体，以及相关的校验规则和错误类型。

pub mod errors;
pub mod message;
pub mod user;
pub mod value_objects;

// 重新导出常用类型
pub use errors::*;
pub use message::*;
pub use user::*;
pub use value_objects::*;
