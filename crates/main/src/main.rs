//! 主应用程序入口
//!
//! 加载配置，连接数据库并启动 HTTP / WebSocket 服务。

use std::sync::Arc;

use application::{
    Clock, ConnectionHub, ConnectionHubDependencies, MessageHistoryService, MessageRepository,
    SystemClock, UserRepository, UserService, UserServiceDependencies,
};
use config::AppConfig;
use infrastructure::{
    create_pg_pool, BcryptPasswordHasher, FsAttachmentStore, PgMessageRepository,
    PgUserRepository,
};
use tracing_subscriber::EnvFilter;
use web_api::{router, AppState, HttpSettings, JwtService};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 初始化日志
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let config = AppConfig::load()?;
    if config.uses_dev_secret() {
        tracing::warn!("正在使用开发环境 JWT 密钥，生产环境请设置 APP_JWT__SECRET");
    }

    tracing::info!(
        "连接数据库: {}",
        config.database.url.split('@').last().unwrap_or("unknown")
    );
    let pg_pool = create_pg_pool(&config.database.url, config.database.max_connections).await?;

    // 运行迁移
    sqlx::migrate!("../../migrations").run(&pg_pool).await?;

    let user_repository: Arc<dyn UserRepository> = Arc::new(PgUserRepository::new(pg_pool.clone()));
    let message_repository: Arc<dyn MessageRepository> =
        Arc::new(PgMessageRepository::new(pg_pool));
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let jwt_service = Arc::new(JwtService::new(config.jwt.clone()));

    let hub = ConnectionHub::new(ConnectionHubDependencies {
        verifier: jwt_service.clone(),
        user_repository: user_repository.clone(),
        message_repository: message_repository.clone(),
        attachment_store: Arc::new(FsAttachmentStore::new(&config.uploads.dir)),
        clock: clock.clone(),
        liveness: config.liveness.clone(),
        outbound_buffer: config.server.outbound_buffer,
        await_attachment_writes: config.uploads.await_writes,
    });

    let user_service = UserService::new(UserServiceDependencies {
        user_repository,
        password_hasher: Arc::new(BcryptPasswordHasher::from_config(&config.security)),
        clock,
    });
    let history_service = MessageHistoryService::new(message_repository);

    let state = AppState::new(
        Arc::new(hub),
        Arc::new(user_service),
        Arc::new(history_service),
        jwt_service,
        HttpSettings {
            uploads_dir: config.uploads.dir.clone().into(),
            cors_origins: config.server.cors_origins.clone(),
        },
    );

    // 启动 Web 服务器
    let app = router(state);
    let address = config.bind_address();
    let listener = tokio::net::TcpListener::bind(&address).await?;

    tracing::info!("消息中心启动在 http://{}", address);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "无法监听退出信号");
        std::future::pending::<()>().await;
    }
    tracing::info!("收到退出信号，停止服务");
}
