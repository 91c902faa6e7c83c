use axum::{
    routing::{get, post},
    Router,
};
use sqlx::sqlite::SqlitePoolOptions;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod api;
mod state;

use postsearch_backend::config;
use postsearch_backend::db;
use postsearch_backend::migration::ChannelTypeBackfill;
use postsearch_backend::platform::PlatformService;
use postsearch_backend::search::{EmbeddedIndex, EngineKind, SearchBroker};
use postsearch_backend::store::SqlStore;
use state::AppState;

/// Resolves on Ctrl-C / 等待退出信号
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        return;
    }
    tracing::info!("Shutdown signal received");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "postsearch_backend=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration / 加载配置
    let app_config = config::init_config()
        .map_err(|e| anyhow::anyhow!("Failed to load configuration: {}", e))?
        .read()
        .clone();
    tracing::info!("Server will listen on {}:{}", app_config.server.host, app_config.server.port);

    // Create data directory if not exists / 创建数据目录
    let data_dir = app_config.get_data_dir();
    if !data_dir.exists() {
        std::fs::create_dir_all(&data_dir)?;
        tracing::info!("Created data directory: {:?}", data_dir);
    }

    let database_url = std::env::var("DATABASE_URL")
        .unwrap_or_else(|_| app_config.get_database_url());

    let pool = SqlitePoolOptions::new().connect(&database_url).await?;
    db::run_migrations(&pool).await?;

    let store = Arc::new(SqlStore::new(pool.clone()));
    let search_config = Arc::new(app_config.search.clone());

    // Register engines with the broker / 注册搜索引擎
    let broker = Arc::new(SearchBroker::new(search_config.clone()));
    let index_path = app_config.get_search_index_path();
    tracing::info!("Embedded search index at {:?}", index_path);
    broker.register_engine(
        EngineKind::Embedded,
        Arc::new(EmbeddedIndex::at_path(&index_path, search_config.clone())),
    );

    let backfill = Arc::new(ChannelTypeBackfill::new(
        store.clone(),
        store.clone(),
        search_config.page_size(),
    ));
    let platform = Arc::new(PlatformService::new(broker, backfill));

    // Engines start in the background, the backfill waits for one to come up
    // 后台启动引擎，回填等待引擎就绪后执行
    platform.start_search_engine();
    platform.spawn_startup_migrations();

    let state = Arc::new(AppState {
        db: pool.clone(),
        platform: platform.clone(),
    });

    let app = Router::new()
        .route("/api/health", get(api::server::health_check))
        .route("/api/search/engine", get(api::search::get_search_engine))
        // 搜索管理API
        .route("/api/admin/search/backfill", get(api::search::get_backfill_status))
        .route("/api/admin/search/backfill", post(api::search::start_backfill))
        .route("/api/admin/search/backfill/cancel", post(api::search::cancel_backfill))
        .route("/api/admin/search/config", post(api::search::update_search_config))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state);

    let bind_addr = app_config.get_bind_address();
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;

    tracing::info!("Server running at http://{}", bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    platform.stop_search_engine().await;
    pool.close().await;
    tracing::info!("Server stopped");

    Ok(())
}
