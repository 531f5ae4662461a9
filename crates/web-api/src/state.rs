use std::path::PathBuf;
use std::sync::Arc;

use application::{ConnectionHub, MessageHistoryService, UserService};

use crate::JwtService;

/// HTTP 层自身的设置
#[derive(Debug, Clone)]
pub struct HttpSettings {
    pub uploads_dir: PathBuf,
    pub cors_origins: Vec<String>,
}

#[derive(Clone)]
pub struct AppState {
    pub hub: Arc<ConnectionHub>,
    pub user_service: Arc<UserService>,
    pub history_service: Arc<MessageHistoryService>,
    pub jwt_service: Arc<JwtService>,
    pub settings: Arc<HttpSettings>,
}

impl AppState {
    pub fn new(
        hub: Arc<ConnectionHub>,
        user_service: Arc<UserService>,
        history_service: Arc<MessageHistoryService>,
        jwt_service: Arc<JwtService>,
        settings: HttpSettings,
    ) -> Self {
        Self {
            hub,
            user_service,
            history_service,
            jwt_service,
            settings: Arc::new(settings),
        }
    }
}
