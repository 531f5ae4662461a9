use std::sync::Arc;

use domain::UserId;
use serde::{Deserialize, Serialize};

use crate::connection::Connection;
use crate::registry::ConnectionRegistry;

/// 在线列表中的一项，每个连接一项
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceEntry {
    #[serde(rename = "userId")]
    pub user_id: UserId,
    pub username: String,
}

/// 推送给所有连接的在线列表帧
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceSnapshot {
    pub online: Vec<PresenceEntry>,
}

impl PresenceSnapshot {
    pub fn from_connections(connections: &[Arc<Connection>]) -> Self {
        Self {
            online: connections
                .iter()
                .map(|connection| PresenceEntry {
                    user_id: connection.user_id(),
                    username: connection.username().to_string(),
                })
                .collect(),
        }
    }
}

/// 在线状态广播器
///
/// 每次成员变化后对注册表取快照，并把同一份快照推送给快照内的每个连接。
/// 各连接的发送互相独立，发送失败只影响该连接。
pub struct PresenceBroadcaster {
    registry: Arc<ConnectionRegistry>,
}

impl PresenceBroadcaster {
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self { registry }
    }

    /// 广播当前在线列表，返回成功入队的连接数
    pub async fn notify_all(&self) -> usize {
        let connections = self.registry.snapshot().await;
        let snapshot = PresenceSnapshot::from_connections(&connections);
        let payload = match serde_json::to_string(&snapshot) {
            Ok(json) => json,
            Err(err) => {
                tracing::warn!(error = %err, "failed to serialize presence payload");
                return 0;
            }
        };

        let delivered = connections
            .iter()
            .filter(|connection| connection.send_text(payload.clone()))
            .count();

        tracing::debug!(online = connections.len(), delivered, "在线列表已广播");
        delivered
    }
}
