//! 连接生命周期编排
//!
//! 握手认证 -> 注册 -> 启动心跳 -> 广播在线列表；断开时注销并再次广播。
//! 所有失败都转换成当前连接范围内的结果，不会影响监听进程或其他连接。

use std::sync::Arc;

use config::LivenessConfig;
use tokio::sync::mpsc;

use crate::attachment::AttachmentStore;
use crate::auth::{AuthVerifier, AuthenticationFailure};
use crate::clock::Clock;
use crate::connection::{AuthenticatedIdentity, Connection, WsCommand};
use crate::ingest::{IngestError, IngestOutcome, MessageIngester, MessageIngesterDependencies};
use crate::liveness::LivenessMonitor;
use crate::presence::PresenceBroadcaster;
use crate::registry::ConnectionRegistry;
use crate::repository::{MessageRepository, UserRepository};

pub struct ConnectionHubDependencies {
    pub verifier: Arc<dyn AuthVerifier>,
    pub user_repository: Arc<dyn UserRepository>,
    pub message_repository: Arc<dyn MessageRepository>,
    pub attachment_store: Arc<dyn AttachmentStore>,
    pub clock: Arc<dyn Clock>,
    pub liveness: LivenessConfig,
    pub outbound_buffer: usize,
    pub await_attachment_writes: bool,
}

pub struct ConnectionHub {
    verifier: Arc<dyn AuthVerifier>,
    users: Arc<dyn UserRepository>,
    registry: Arc<ConnectionRegistry>,
    presence: Arc<PresenceBroadcaster>,
    liveness: Arc<LivenessMonitor>,
    ingester: MessageIngester,
    outbound_buffer: usize,
}

impl ConnectionHub {
    pub fn new(deps: ConnectionHubDependencies) -> Self {
        let registry = Arc::new(ConnectionRegistry::new());
        let presence = Arc::new(PresenceBroadcaster::new(registry.clone()));
        let liveness = Arc::new(LivenessMonitor::new(
            &deps.liveness,
            registry.clone(),
            presence.clone(),
        ));
        let ingester = MessageIngester::new(MessageIngesterDependencies {
            registry: registry.clone(),
            message_repository: deps.message_repository,
            attachment_store: deps.attachment_store,
            clock: deps.clock,
            await_attachment_writes: deps.await_attachment_writes,
        });

        Self {
            verifier: deps.verifier,
            users: deps.user_repository,
            registry,
            presence,
            liveness,
            ingester,
            outbound_buffer: deps.outbound_buffer,
        }
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// 校验握手凭证并解析显示名
    pub async fn authenticate(
        &self,
        credential: Option<&str>,
    ) -> Result<AuthenticatedIdentity, AuthenticationFailure> {
        let credential = credential
            .map(str::trim)
            .filter(|credential| !credential.is_empty())
            .ok_or(AuthenticationFailure::MissingCredential)?;

        let user_id = self.verifier.verify(credential).await?;
        match self.users.find_by_id(user_id).await {
            Ok(Some(user)) => Ok(AuthenticatedIdentity {
                user_id,
                username: user.username,
            }),
            Ok(None) => Err(AuthenticationFailure::UnknownIdentity(user_id)),
            Err(err) => Err(AuthenticationFailure::DirectoryUnavailable(err.to_string())),
        }
    }

    /// 注册已认证的连接，启动心跳并广播在线列表。
    ///
    /// 广播发生在注册之后，新连接自己也会收到当前列表。
    pub async fn open(
        &self,
        identity: AuthenticatedIdentity,
    ) -> (Arc<Connection>, mpsc::Receiver<WsCommand>) {
        let (connection, outbound) = Connection::new(identity, self.outbound_buffer);
        let connection = Arc::new(connection);

        self.registry.add(connection.clone()).await;
        self.liveness.watch(connection.clone());
        self.presence.notify_all().await;

        tracing::info!(
            connection_id = %connection.id(),
            user_id = %connection.user_id(),
            username = %connection.username(),
            "WebSocket 连接已建立"
        );
        (connection, outbound)
    }

    /// 处理客户端文本帧，错误只记录日志，不回复发送方
    pub async fn handle_text(&self, connection: &Connection, raw: &str) -> Option<IngestOutcome> {
        match self.ingester.ingest(connection, raw).await {
            Ok(outcome) => Some(outcome),
            Err(IngestError::MalformedPayload(err)) => {
                tracing::warn!(connection_id = %connection.id(), error = %err, "丢弃无法解析的消息");
                None
            }
            Err(err) => {
                tracing::error!(
                    connection_id = %connection.id(),
                    user_id = %connection.user_id(),
                    error = %err,
                    "消息处理失败"
                );
                None
            }
        }
    }

    /// 连接关闭：停止心跳、注销并广播。心跳超时已经清理过的连接不会重复广播。
    pub async fn close(&self, connection: &Connection) {
        connection.close();
        if self.registry.remove(connection.id()).await.is_some() {
            self.presence.notify_all().await;
            tracing::info!(
                connection_id = %connection.id(),
                user_id = %connection.user_id(),
                "WebSocket连接已断开，在线状态已清理"
            );
        }
    }
}
