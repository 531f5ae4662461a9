//! Web API 层。
//!
//! 提供 Axum 路由，将 HTTP / WebSocket 请求委托给应用层。

mod auth;
mod error;
mod routes;
mod state;
mod ws_connection;

pub use auth::{extract_credential, Claims, JwtService};
pub use config::JwtConfig;
pub use error::ApiError;
pub use routes::{router, SessionResponse};
pub use state::{AppState, HttpSettings};
