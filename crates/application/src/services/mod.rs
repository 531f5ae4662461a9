mod message_history_service;
mod user_service;

pub use message_history_service::MessageHistoryService;
pub use user_service::{
    AuthenticateUserRequest, RegisterUserRequest, UserService, UserServiceDependencies,
};
