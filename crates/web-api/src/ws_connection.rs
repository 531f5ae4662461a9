use std::ops::ControlFlow;
use std::sync::Arc;

use application::{AuthenticationFailure, Connection, ConnectionHub, WsCommand};
use axum::extract::ws::{close_code, CloseFrame, Message as WsMessage, Utf8Bytes, WebSocket};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use crate::state::AppState;

/// 升级后的 WebSocket 入口：认证失败直接关闭，成功后注册并进入主循环
pub async fn handle_socket(socket: WebSocket, state: AppState, credential: Option<String>) {
    let identity = match state.hub.authenticate(credential.as_deref()).await {
        Ok(identity) => identity,
        Err(failure) => {
            reject(socket, failure).await;
            return;
        }
    };

    let (connection, outbound) = state.hub.open(identity).await;
    WebSocketConnection::new(state.hub.clone(), connection, outbound)
        .run(socket)
        .await;
}

async fn reject(mut socket: WebSocket, failure: AuthenticationFailure) {
    match &failure {
        AuthenticationFailure::DirectoryUnavailable(_) => {
            tracing::error!(error = %failure, "握手认证失败")
        }
        _ => tracing::warn!(error = %failure, "握手认证失败，关闭连接"),
    }

    let frame = CloseFrame {
        code: close_code::POLICY,
        reason: "unauthorized".into(),
    };
    if socket.send(WsMessage::Close(Some(frame))).await.is_err() {
        tracing::debug!("关闭帧发送失败");
    }
}

/// 单个连接排队等待处理的文本帧上限
const INBOUND_QUEUE_CAPACITY: usize = 64;

/// WebSocket 连接
///
/// 已认证的连接拆成三个任务：
/// - 发送任务消费连接的出站队列（在线列表、消息投递、心跳 ping）
/// - 接收任务只读帧：pong 立即确认，文本帧转交入站队列
/// - 入站任务按到达顺序处理文本帧（解析、附件、持久化、投递）
///
/// 持久化再慢也不会阻塞帧读取，心跳只取决于客户端是否按时回复。
/// 连接的取消令牌被触发（心跳超时或关闭）时发送和接收任务退出；
/// 入站任务处理完已排队的帧后随队列关闭而结束。
pub struct WebSocketConnection {
    hub: Arc<ConnectionHub>,
    connection: Arc<Connection>,
    outbound: mpsc::Receiver<WsCommand>,
}

impl WebSocketConnection {
    pub fn new(
        hub: Arc<ConnectionHub>,
        connection: Arc<Connection>,
        outbound: mpsc::Receiver<WsCommand>,
    ) -> Self {
        Self {
            hub,
            connection,
            outbound,
        }
    }

    pub async fn run(self, socket: WebSocket) {
        let Self {
            hub,
            connection,
            mut outbound,
        } = self;
        let (mut sender, mut incoming) = socket.split();
        let (inbound_tx, mut inbound_rx) = mpsc::channel::<Utf8Bytes>(INBOUND_QUEUE_CAPACITY);

        // 发送任务：统一处理所有对 WebSocket sender 的写操作
        let send_task = {
            let connection = connection.clone();
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = connection.closed() => break,
                        command = outbound.recv() => {
                            let Some(command) = command else { break };
                            let frame = match command {
                                WsCommand::SendText(text) => WsMessage::Text(text.into()),
                                WsCommand::SendPing(data) => WsMessage::Ping(data.into()),
                            };
                            if sender.send(frame).await.is_err() {
                                tracing::warn!(connection_id = %connection.id(), "Failed to send websocket frame");
                                break;
                            }
                        }
                    }
                }
                tracing::debug!(connection_id = %connection.id(), "WebSocket发送任务结束");
            })
        };

        // 入站任务：逐条处理文本帧，保持同一连接内的消息顺序
        {
            let connection = connection.clone();
            let hub = hub.clone();
            tokio::spawn(async move {
                while let Some(text) = inbound_rx.recv().await {
                    hub.handle_text(&connection, text.as_str()).await;
                }
                tracing::debug!(connection_id = %connection.id(), "WebSocket入站任务结束");
            });
        }

        // 接收任务：处理来自WebSocket客户端的消息
        let recv_task = {
            let connection = connection.clone();
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = connection.closed() => break,
                        message = incoming.next() => match message {
                            Some(Ok(message)) => {
                                if handle_incoming(&connection, &inbound_tx, message).is_break() {
                                    break;
                                }
                            }
                            Some(Err(err)) => {
                                tracing::debug!(connection_id = %connection.id(), error = %err, "WebSocket读取失败");
                                break;
                            }
                            None => break,
                        }
                    }
                }
                tracing::debug!(connection_id = %connection.id(), "WebSocket接收任务结束");
            })
        };

        // 等待任意一个任务完成（连接断开或被心跳终止）
        tokio::select! {
            _ = send_task => {}
            _ = recv_task => {}
        }

        hub.close(&connection).await;
    }
}

/// 处理来自客户端的帧，不等待任何业务处理
fn handle_incoming(
    connection: &Connection,
    inbound: &mpsc::Sender<Utf8Bytes>,
    message: WsMessage,
) -> ControlFlow<()> {
    match message {
        WsMessage::Close(_) => {
            tracing::debug!(connection_id = %connection.id(), "WebSocket收到关闭消息");
            return ControlFlow::Break(());
        }
        // 协议层已自动回复 pong
        WsMessage::Ping(_) => {}
        WsMessage::Pong(_) => {
            if !connection.acknowledge_pong() {
                tracing::trace!(connection_id = %connection.id(), "忽略未请求的pong");
            }
        }
        WsMessage::Text(text) => {
            if inbound.try_send(text).is_err() {
                tracing::warn!(connection_id = %connection.id(), "入站队列已满，丢弃消息");
            }
        }
        WsMessage::Binary(_) => {
            tracing::debug!(connection_id = %connection.id(), "忽略二进制消息");
        }
    }
    ControlFlow::Continue(())
}
