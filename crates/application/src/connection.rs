//! 单个已认证连接的状态
//!
//! `Connection` 只在认证成功后创建，因此身份永远存在。出站帧通过有界队列
//! 交给连接自己的发送任务，心跳状态用原子变量做比较交换，保证超时终止和
//! 迟到的 pong 之间没有竞争。

use std::sync::atomic::{AtomicU8, Ordering};

use domain::{ConnectionId, UserId, Username};
use tokio::sync::{mpsc, Notify};
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

/// WebSocket 写操作命令
///
/// 在线列表、消息投递和心跳 ping 都经由发送任务写出；
/// 收到客户端 ping 时由 WebSocket 协议层自动回复 pong。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WsCommand {
    SendText(String),
    SendPing(Vec<u8>),
}

/// 心跳状态机
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LivenessState {
    Alive = 0,
    AwaitingPong = 1,
    Terminated = 2,
}

impl LivenessState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Alive,
            1 => Self::AwaitingPong,
            _ => Self::Terminated,
        }
    }
}

/// 已认证身份：用户 ID 加显示名
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedIdentity {
    pub user_id: UserId,
    pub username: Username,
}

pub struct Connection {
    id: ConnectionId,
    identity: AuthenticatedIdentity,
    outbound: mpsc::Sender<WsCommand>,
    liveness: AtomicU8,
    pong: Notify,
    shutdown: CancellationToken,
}

impl Connection {
    /// 创建连接以及与之配对的出站队列接收端
    pub fn new(identity: AuthenticatedIdentity, buffer: usize) -> (Self, mpsc::Receiver<WsCommand>) {
        let (outbound, receiver) = mpsc::channel(buffer.max(1));
        let connection = Self {
            id: ConnectionId::generate(),
            identity,
            outbound,
            liveness: AtomicU8::new(LivenessState::Alive as u8),
            pong: Notify::new(),
            shutdown: CancellationToken::new(),
        };
        (connection, receiver)
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn user_id(&self) -> UserId {
        self.identity.user_id
    }

    pub fn username(&self) -> &Username {
        &self.identity.username
    }

    pub fn identity(&self) -> &AuthenticatedIdentity {
        &self.identity
    }

    /// 非阻塞地把命令放入出站队列。
    ///
    /// 队列已满或已关闭时丢弃该帧并返回 `false`，不会影响其他连接。
    pub fn send(&self, command: WsCommand) -> bool {
        match self.outbound.try_send(command) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!(connection_id = %self.id, user_id = %self.identity.user_id, "出站队列已满，丢弃帧");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::debug!(connection_id = %self.id, "出站队列已关闭");
                false
            }
        }
    }

    pub fn send_text(&self, text: impl Into<String>) -> bool {
        self.send(WsCommand::SendText(text.into()))
    }

    pub fn liveness(&self) -> LivenessState {
        LivenessState::from_u8(self.liveness.load(Ordering::Acquire))
    }

    fn transition(&self, from: LivenessState, to: LivenessState) -> bool {
        self.liveness
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Alive -> AwaitingPong
    pub(crate) fn begin_probe(&self) -> bool {
        self.transition(LivenessState::Alive, LivenessState::AwaitingPong)
    }

    /// AwaitingPong -> Terminated，只有一个调用方能成功
    pub(crate) fn expire(&self) -> bool {
        self.transition(LivenessState::AwaitingPong, LivenessState::Terminated)
    }

    /// 收到 pong：AwaitingPong -> Alive。
    ///
    /// 终止已经开始时返回 `false`，迟到的 pong 被忽略。
    pub fn acknowledge_pong(&self) -> bool {
        let acknowledged = self.transition(LivenessState::AwaitingPong, LivenessState::Alive);
        if acknowledged {
            self.pong.notify_one();
        }
        acknowledged
    }

    pub(crate) async fn pong_received(&self) {
        self.pong.notified().await
    }

    /// 标记连接终止并取消它拥有的所有任务。
    ///
    /// 返回本次调用是否完成了向 `Terminated` 的转换。
    pub fn close(&self) -> bool {
        let previous = self
            .liveness
            .swap(LivenessState::Terminated as u8, Ordering::AcqRel);
        self.shutdown.cancel();
        LivenessState::from_u8(previous) != LivenessState::Terminated
    }

    pub(crate) fn cancel(&self) {
        self.shutdown.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    pub fn closed(&self) -> WaitForCancellationFuture<'_> {
        self.shutdown.cancelled()
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("user_id", &self.identity.user_id)
            .field("liveness", &self.liveness())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::identity;

    #[test]
    fn late_pong_after_expiry_is_ignored() {
        let (connection, _rx) = Connection::new(identity("alice"), 4);
        assert!(connection.begin_probe());
        assert!(connection.expire());
        assert!(!connection.acknowledge_pong());
        assert_eq!(connection.liveness(), LivenessState::Terminated);
    }

    #[test]
    fn pong_before_expiry_wins() {
        let (connection, _rx) = Connection::new(identity("alice"), 4);
        assert!(connection.begin_probe());
        assert!(connection.acknowledge_pong());
        assert!(!connection.expire());
        assert_eq!(connection.liveness(), LivenessState::Alive);
    }

    #[test]
    fn close_reports_first_termination_only() {
        let (connection, _rx) = Connection::new(identity("alice"), 4);
        assert!(connection.close());
        assert!(!connection.close());
        assert!(connection.is_closed());
    }

    #[test]
    fn full_queue_drops_frame() {
        let (connection, mut rx) = Connection::new(identity("alice"), 1);
        assert!(connection.send_text("first"));
        assert!(!connection.send_text("second"));
        assert_eq!(rx.try_recv().unwrap(), WsCommand::SendText("first".into()));
    }
}
