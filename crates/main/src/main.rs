//! 主应用程序入口
//!
//! 加载配置、连接数据库、装配聊天服务和连接注册表，启动 Axum Web API 服务。

use std::sync::Arc;

use application::{
    services::{ChatService, ChatServiceDependencies},
    ConnectionHub, HubSettings, SystemClock,
};
use axum::http::HeaderValue;
use config::AppConfig;
use infrastructure::{Infrastructure, InfrastructureConfig};
use tower::ServiceBuilder;
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
};
use tracing_subscriber::EnvFilter;
use web_api::{router, AppState, JwtService};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 初始化日志
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = AppConfig::load()?;
    tracing::info!(config = %config.sanitize(), "配置已加载");

    let infrastructure = Infrastructure::connect(InfrastructureConfig {
        database_url: config.database.url.clone(),
        max_connections: config.database.max_connections,
        run_migrations: config.database.run_migrations,
    })
    .await?;
    let storage = infrastructure.storage;

    let hub = Arc::new(ConnectionHub::new(HubSettings {
        outbound_buffer: config.hub.outbound_buffer,
        delivery_timeout: config.hub.delivery_timeout(),
    }));

    let chat_service = ChatService::new(ChatServiceDependencies {
        conversation_repository: storage.conversation_repository.clone(),
        message_repository: storage.message_repository.clone(),
        dealer_repository: storage.dealer_repository.clone(),
        car_repository: storage.car_repository.clone(),
        clock: Arc::new(SystemClock),
        broadcaster: hub.clone(),
    });

    let jwt_service = Arc::new(JwtService::new(config.jwt.clone()));

    let state = AppState::new(
        Arc::new(chat_service),
        hub,
        jwt_service,
        config.hub.write_timeout(),
    );

    let app = router(state).layer(
        ServiceBuilder::new()
            .layer(cors_layer(&config.server.cors_origins))
            .layer(CompressionLayer::new()),
    );

    let listener = tokio::net::TcpListener::bind(config.bind_address()).await?;
    tracing::info!("聊天服务启动在 http://{}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("服务已停止");
    Ok(())
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if origins.is_empty() || origins.iter().any(|origin| origin == "*") {
        return layer.allow_origin(Any);
    }

    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match origin.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(origin = %origin, "ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    layer.allow_origin(origins)
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("收到退出信号，开始优雅停机");
}
