use sqlx::SqlitePool;
use std::sync::Arc;
use postsearch_backend::platform::PlatformService;

pub struct AppState {
    pub db: SqlitePool,
    /// Search lifecycle and migrations / 搜索生命周期与迁移
    pub platform: Arc<PlatformService>,
}
