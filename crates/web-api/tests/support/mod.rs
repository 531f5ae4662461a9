#![allow(dead_code)]

use std::{net::SocketAddr, path::PathBuf, sync::Arc, time::Duration};

use application::{
    memory::{InMemoryMessageRepository, InMemoryUserRepository},
    Clock, ConnectionHub, ConnectionHubDependencies, MessageHistoryService, MessageRepository,
    SystemClock, UserService, UserServiceDependencies,
};
use config::LivenessConfig;
use futures_util::{SinkExt, StreamExt};
use infrastructure::{BcryptPasswordHasher, FsAttachmentStore};
use reqwest::Client;
use serde_json::{json, Value};
use tokio::{net::TcpListener, net::TcpStream, sync::oneshot, time::timeout};
use tokio_tungstenite::{
    connect_async,
    tungstenite::{client::IntoClientRequest, http::HeaderName, Message as TungsteniteMessage},
    MaybeTlsStream, WebSocketStream,
};
use uuid::Uuid;
use web_api::{router, AppState, HttpSettings, JwtConfig, JwtService};

pub type WsClient = WebSocketStream<MaybeTlsStream<TcpStream>>;

const FRAME_TIMEOUT: Duration = Duration::from_secs(5);

pub struct TestUser {
    pub id: String,
    pub username: String,
    pub token: String,
}

pub struct TestApp {
    pub addr: SocketAddr,
    pub client: Client,
    pub uploads_dir: PathBuf,
    shutdown: Option<oneshot::Sender<()>>,
}

impl TestApp {
    pub async fn spawn() -> Self {
        Self::spawn_with(LivenessConfig::default()).await
    }

    pub async fn spawn_with(liveness: LivenessConfig) -> Self {
        Self::spawn_with_messages(liveness, Arc::new(InMemoryMessageRepository::new())).await
    }

    /// 内存仓储 + 临时上传目录，附件写入完成后才投递
    pub async fn spawn_with_messages(
        liveness: LivenessConfig,
        messages: Arc<dyn MessageRepository>,
    ) -> Self {
        let uploads_dir =
            std::env::temp_dir().join(format!("presence-hub-test-{}", Uuid::new_v4()));
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let users = Arc::new(InMemoryUserRepository::new());

        let jwt_service = Arc::new(JwtService::new(JwtConfig {
            secret: "test-secret-key-with-at-least-32-characters".to_string(),
            expiration_hours: 1,
            cookie_name: "token".to_string(),
        }));

        let hub = Arc::new(ConnectionHub::new(ConnectionHubDependencies {
            verifier: jwt_service.clone(),
            user_repository: users.clone(),
            message_repository: messages.clone(),
            attachment_store: Arc::new(FsAttachmentStore::new(&uploads_dir)),
            clock: clock.clone(),
            liveness,
            outbound_buffer: 64,
            await_attachment_writes: true,
        }));

        let user_service = Arc::new(UserService::new(UserServiceDependencies {
            user_repository: users,
            password_hasher: Arc::new(BcryptPasswordHasher::new(Some(4))),
            clock,
        }));
        let history_service = Arc::new(MessageHistoryService::new(messages));

        let state = AppState::new(
            hub,
            user_service,
            history_service,
            jwt_service,
            HttpSettings {
                uploads_dir: uploads_dir.clone(),
                cors_origins: vec!["http://localhost:5173".to_string()],
            },
        );

        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let app = router(state);

        tokio::spawn(async move {
            axum::serve(listener, app.into_make_service())
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await
                .ok();
        });

        Self {
            addr,
            client: Client::new(),
            uploads_dir,
            shutdown: Some(shutdown_tx),
        }
    }

    pub fn http(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub fn ws_url(&self, token: Option<&str>) -> String {
        match token {
            Some(token) => format!("ws://{}/ws?token={}", self.addr, token),
            None => format!("ws://{}/ws", self.addr),
        }
    }

    pub async fn register(&self, username: &str) -> TestUser {
        let response = self
            .client
            .post(self.http("/auth/register"))
            .json(&json!({ "username": username, "password": "secret" }))
            .send()
            .await
            .expect("register");
        assert_eq!(response.status(), reqwest::StatusCode::CREATED);

        let body: Value = response.json().await.expect("register json");
        TestUser {
            id: body["user"]["_id"].as_str().expect("user id").to_string(),
            username: username.to_string(),
            token: body["token"].as_str().expect("token").to_string(),
        }
    }

    /// 建立连接并等待包含自己的在线列表，保证连接已注册
    pub async fn connect(&self, user: &TestUser) -> WsClient {
        let (mut ws, _) = connect_async(self.ws_url(Some(&user.token)))
            .await
            .expect("websocket connect");
        next_matching(&mut ws, |frame| online_ids(frame).contains(&user.id)).await;
        ws
    }

    /// 使用 Authorization 头而不是查询参数携带凭证
    pub async fn connect_with_header(&self, name: &str, value: &str) -> WsClient {
        let mut request = self.ws_url(None).into_client_request().expect("request");
        let name = HeaderName::from_bytes(name.as_bytes()).expect("header name");
        request
            .headers_mut()
            .insert(name, value.parse().expect("header value"));
        let (ws, _) = connect_async(request).await.expect("websocket connect");
        ws
    }
}

impl Drop for TestApp {
    fn drop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        let _ = std::fs::remove_dir_all(&self.uploads_dir);
    }
}

/// 读取下一个文本帧并解析为 JSON，跳过控制帧
pub async fn next_json(ws: &mut WsClient) -> Value {
    loop {
        let message = timeout(FRAME_TIMEOUT, ws.next())
            .await
            .expect("timed out waiting for frame")
            .expect("stream ended")
            .expect("websocket error");
        match message {
            TungsteniteMessage::Text(text) => {
                return serde_json::from_str(text.as_str()).expect("frame is json")
            }
            TungsteniteMessage::Close(frame) => panic!("unexpected close: {frame:?}"),
            _ => continue,
        }
    }
}

pub async fn next_matching(ws: &mut WsClient, predicate: impl Fn(&Value) -> bool) -> Value {
    loop {
        let frame = next_json(ws).await;
        if predicate(&frame) {
            return frame;
        }
    }
}

/// 下一条投递帧（带 `_id`），跳过在线列表
pub async fn next_delivery(ws: &mut WsClient) -> Value {
    next_matching(ws, |frame| frame.get("_id").is_some()).await
}

/// 在 `window` 内没有收到任何投递帧
pub async fn no_delivery_within(ws: &mut WsClient, window: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + window;
    loop {
        match tokio::time::timeout_at(deadline, ws.next()).await {
            Err(_) => return true,
            Ok(Some(Ok(TungsteniteMessage::Text(text)))) => {
                let frame: Value = serde_json::from_str(text.as_str()).expect("frame is json");
                if frame.get("_id").is_some() {
                    return false;
                }
            }
            Ok(Some(Ok(_))) => continue,
            Ok(_) => return true,
        }
    }
}

pub fn online_ids(frame: &Value) -> Vec<String> {
    frame["online"]
        .as_array()
        .map(|entries| {
            entries
                .iter()
                .filter_map(|entry| entry["userId"].as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}

pub fn online_names(frame: &Value) -> Vec<String> {
    frame["online"]
        .as_array()
        .map(|entries| {
            entries
                .iter()
                .filter_map(|entry| entry["username"].as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}

pub async fn send_json(ws: &mut WsClient, value: Value) {
    send_raw(ws, &value.to_string()).await;
}

pub async fn send_raw(ws: &mut WsClient, raw: &str) {
    ws.send(TungsteniteMessage::Text(raw.to_string().into()))
        .await
        .expect("send frame");
}
