//! 心跳检测
//!
//! 每个连接一个监控任务：周期性发送 ping，进入 `AwaitingPong`，在限定时间内
//! 收到 pong 则回到 `Alive`，否则转入 `Terminated`，强制断开连接、注销并
//! 广播新的在线列表。半开的 TCP 连接只能靠这种探测发现。

use std::sync::Arc;
use std::time::Duration;

use config::LivenessConfig;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};

use crate::connection::{Connection, LivenessState, WsCommand};
use crate::presence::PresenceBroadcaster;
use crate::registry::ConnectionRegistry;

/// 监控任务的结束原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatResult {
    /// 对端在等待窗口内没有回应 pong
    TimedOut,
    /// 连接已正常关闭
    Cancelled,
}

enum PongWait {
    Acknowledged,
    Expired,
    Cancelled,
}

pub struct LivenessMonitor {
    heartbeat_interval: Duration,
    pong_timeout: Duration,
    registry: Arc<ConnectionRegistry>,
    presence: Arc<PresenceBroadcaster>,
}

impl LivenessMonitor {
    pub fn new(
        config: &LivenessConfig,
        registry: Arc<ConnectionRegistry>,
        presence: Arc<PresenceBroadcaster>,
    ) -> Self {
        Self {
            heartbeat_interval: config.heartbeat_interval(),
            pong_timeout: config.pong_timeout(),
            registry,
            presence,
        }
    }

    /// 为连接启动监控任务
    pub fn watch(self: &Arc<Self>, connection: Arc<Connection>) -> JoinHandle<HeartbeatResult> {
        let monitor = Arc::clone(self);
        tokio::spawn(async move { monitor.run(connection).await })
    }

    pub async fn run(&self, connection: Arc<Connection>) -> HeartbeatResult {
        let mut ticker = time::interval_at(
            Instant::now() + self.heartbeat_interval,
            self.heartbeat_interval,
        );
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                () = connection.closed() => return HeartbeatResult::Cancelled,
            }

            // 只有连接已经终止时才会失败
            if !connection.begin_probe() {
                return HeartbeatResult::Cancelled;
            }
            connection.send(WsCommand::SendPing(Vec::new()));

            match self.await_pong(&connection).await {
                PongWait::Acknowledged => continue,
                PongWait::Cancelled => return HeartbeatResult::Cancelled,
                PongWait::Expired => {
                    self.terminate(&connection).await;
                    return HeartbeatResult::TimedOut;
                }
            }
        }
    }

    async fn await_pong(&self, connection: &Connection) -> PongWait {
        let deadline = Instant::now() + self.pong_timeout;
        loop {
            tokio::select! {
                () = connection.closed() => return PongWait::Cancelled,
                () = connection.pong_received() => match connection.liveness() {
                    LivenessState::Alive => return PongWait::Acknowledged,
                    LivenessState::Terminated => return PongWait::Cancelled,
                    // 上一轮残留的通知
                    LivenessState::AwaitingPong => continue,
                },
                () = time::sleep_until(deadline) => {
                    if connection.expire() {
                        return PongWait::Expired;
                    }
                    // pong 与超时同时到达时由状态交换决定胜负
                    return match connection.liveness() {
                        LivenessState::Alive => PongWait::Acknowledged,
                        _ => PongWait::Cancelled,
                    };
                }
            }
        }
    }

    async fn terminate(&self, connection: &Connection) {
        tracing::info!(
            connection_id = %connection.id(),
            user_id = %connection.user_id(),
            "心跳超时，强制断开连接"
        );
        connection.cancel();
        if self.registry.remove(connection.id()).await.is_some() {
            self.presence.notify_all().await;
        }
    }
}
