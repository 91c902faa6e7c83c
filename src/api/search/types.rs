use serde::Serialize;

use postsearch_backend::migration::MigrationSnapshot;
use postsearch_backend::search::EngineKind;

/// Registered engine status / 已注册引擎状态
#[derive(Debug, Serialize)]
pub struct EngineStatus {
    pub kind: EngineKind,
    pub name: String,
    pub enabled: bool,
    pub active: bool,
}

/// Engine overview / 搜索引擎概览
#[derive(Debug, Serialize)]
pub struct SearchEngineStatus {
    /// Engine label, or `database` / `none` / 当前服务搜索的引擎
    pub active_engine: String,
    pub engines: Vec<EngineStatus>,
}

/// Backfill status / 回填状态
#[derive(Debug, Serialize)]
pub struct BackfillStatus {
    /// Marker row reads `true` / 标记已写入
    pub complete: bool,
    #[serde(flatten)]
    pub progress: MigrationSnapshot,
}
