//! 进程内连接注册表
//!
//! 主表和按用户的索引放在同一把读写锁下，快照永远看不到半注册或半注销的连接。

use std::collections::HashMap;
use std::sync::Arc;

use domain::{ConnectionId, UserId};
use tokio::sync::RwLock;

use crate::connection::Connection;

struct Entry {
    seq: u64,
    connection: Arc<Connection>,
}

#[derive(Default)]
struct RegistryInner {
    next_seq: u64,
    connections: HashMap<ConnectionId, Entry>,
    user_connections: HashMap<UserId, Vec<ConnectionId>>,
}

impl RegistryInner {
    fn ordered(&self, ids: impl Iterator<Item = ConnectionId>) -> Vec<Arc<Connection>> {
        let mut entries: Vec<&Entry> = ids.filter_map(|id| self.connections.get(&id)).collect();
        entries.sort_by_key(|entry| entry.seq);
        entries
            .into_iter()
            .map(|entry| entry.connection.clone())
            .collect()
    }
}

/// 当前打开的连接集合
#[derive(Default)]
pub struct ConnectionRegistry {
    inner: RwLock<RegistryInner>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册连接。同一个连接重复注册时保持原有顺序。
    pub async fn add(&self, connection: Arc<Connection>) {
        let mut inner = self.inner.write().await;
        let connection_id = connection.id();
        let user_id = connection.user_id();
        if inner.connections.contains_key(&connection_id) {
            return;
        }

        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner
            .connections
            .insert(connection_id, Entry { seq, connection });
        inner
            .user_connections
            .entry(user_id)
            .or_default()
            .push(connection_id);

        tracing::debug!(connection_id = %connection_id, user_id = %user_id, "连接已注册");
    }

    /// 注销连接，返回被移除的连接；不存在时返回 `None`
    pub async fn remove(&self, connection_id: ConnectionId) -> Option<Arc<Connection>> {
        let mut inner = self.inner.write().await;
        let entry = inner.connections.remove(&connection_id)?;
        let user_id = entry.connection.user_id();

        if let Some(ids) = inner.user_connections.get_mut(&user_id) {
            ids.retain(|&id| id != connection_id);
            if ids.is_empty() {
                inner.user_connections.remove(&user_id);
            }
        }

        tracing::debug!(connection_id = %connection_id, user_id = %user_id, "连接已注销");
        Some(entry.connection)
    }

    /// 按注册顺序返回此刻所有连接
    pub async fn snapshot(&self) -> Vec<Arc<Connection>> {
        let inner = self.inner.read().await;
        inner.ordered(inner.connections.keys().copied())
    }

    /// 同一用户可能有多个设备同时在线
    pub async fn find_by_identity(&self, user_id: UserId) -> Vec<Arc<Connection>> {
        let inner = self.inner.read().await;
        match inner.user_connections.get(&user_id) {
            Some(ids) => inner.ordered(ids.iter().copied()),
            None => Vec::new(),
        }
    }

    pub async fn contains(&self, connection_id: ConnectionId) -> bool {
        self.inner.read().await.connections.contains_key(&connection_id)
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.connections.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{connection, connection_for};

    #[tokio::test]
    async fn snapshot_preserves_registration_order() {
        let registry = ConnectionRegistry::new();
        let (a, _ra) = connection("alice");
        let (b, _rb) = connection("bob");
        let (c, _rc) = connection("carol");
        for conn in [&a, &b, &c] {
            registry.add(conn.clone()).await;
        }

        let ids: Vec<_> = registry.snapshot().await.iter().map(|c| c.id()).collect();
        assert_eq!(ids, vec![a.id(), b.id(), c.id()]);
    }

    #[tokio::test]
    async fn remove_is_reported_once() {
        let registry = ConnectionRegistry::new();
        let (a, _ra) = connection("alice");
        registry.add(a.clone()).await;

        assert!(registry.remove(a.id()).await.is_some());
        assert!(registry.remove(a.id()).await.is_none());
        assert!(registry.is_empty().await);
        assert!(registry.find_by_identity(a.user_id()).await.is_empty());
    }

    #[tokio::test]
    async fn identity_lookup_returns_every_device() {
        let registry = ConnectionRegistry::new();
        let (phone, _rp) = connection("alice");
        let (laptop, _rl) = connection_for(phone.identity().clone());
        let (bob, _rb) = connection("bob");
        for conn in [&phone, &bob, &laptop] {
            registry.add(conn.clone()).await;
        }

        let devices: Vec<_> = registry
            .find_by_identity(phone.user_id())
            .await
            .iter()
            .map(|c| c.id())
            .collect();
        assert_eq!(devices, vec![phone.id(), laptop.id()]);

        registry.remove(phone.id()).await;
        let devices = registry.find_by_identity(phone.user_id()).await;
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].id(), laptop.id());
    }

    #[tokio::test]
    async fn duplicate_add_is_ignored() {
        let registry = ConnectionRegistry::new();
        let (a, _ra) = connection("alice");
        registry.add(a.clone()).await;
        registry.add(a.clone()).await;
        assert_eq!(registry.len().await, 1);
        assert_eq!(registry.find_by_identity(a.user_id()).await.len(), 1);
    }
}
