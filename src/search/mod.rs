//! Search module - pluggable search engines and the broker that tracks them / 搜索模块
//!
//! Architecture principles / 架构原则：
//! - Engines only expose primitive operations: start, stop, update_config, bulk patch
//! - The broker decides which engine is live, the platform controls lifecycle
//! - Call direction: Platform → Broker → Engine (unidirectional) / 调用方向
//!
//! When no engine is active, search falls back to the primary database
//! unless the operator disabled database search.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::config::SearchConfig;
use crate::models::ChannelType;

pub mod broker;
pub mod embedded;
pub mod schema;

#[cfg(test)]
pub(crate) mod mock;

pub use broker::SearchBroker;
pub use embedded::EmbeddedIndex;
pub use schema::PostDocument;

/// Backend kind, declared in precedence order / 后端类型（按优先级排列）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineKind {
    /// Remote full-text cluster / 远程集群引擎
    Cluster,
    /// Local on-disk index / 本地内嵌引擎
    Embedded,
}

impl EngineKind {
    /// All kinds, highest precedence first / 所有类型，优先级从高到低
    pub const ALL: [EngineKind; Self::COUNT] = [EngineKind::Cluster, EngineKind::Embedded];

    pub(crate) const COUNT: usize = 2;

    pub(crate) fn slot(self) -> usize {
        match self {
            EngineKind::Cluster => 0,
            EngineKind::Embedded => 1,
        }
    }

    /// Whether the operator turned this kind on in `config` / 配置中是否启用
    pub fn enabled_in(self, config: &SearchConfig) -> bool {
        match self {
            EngineKind::Cluster => config.cluster.enable_indexing,
            EngineKind::Embedded => config.embedded.enable_indexing,
        }
    }
}

impl fmt::Display for EngineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineKind::Cluster => f.write_str("cluster"),
            EngineKind::Embedded => f.write_str("embedded"),
        }
    }
}

/// Search engine errors / 搜索引擎错误
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("engine {0} is not started")]
    NotStarted(String),

    #[error("engine {0} is already started")]
    AlreadyStarted(String),

    #[error("engine {0} is disabled")]
    Disabled(String),

    #[error("engine {name} timed out after {secs}s")]
    Timeout { name: String, secs: u64 },

    #[error("operation cancelled")]
    Cancelled,

    #[error("index error: {0}")]
    Index(#[from] sqlx::Error),

    #[error("{0}")]
    Backend(String),
}

/// Search engine capability / 搜索引擎能力接口
///
/// Implementations own their connection state and synchronise internally;
/// the broker only holds shared handles.
#[async_trait]
pub trait SearchEngine: Send + Sync {
    /// Stable identifier, used in logs and as the active engine label / 引擎名称
    fn name(&self) -> &str;

    /// Operator turned this engine on; pure config read / 是否启用
    fn is_enabled(&self) -> bool;

    /// Enabled and currently running / 是否启用且正在运行
    fn is_active(&self) -> bool;

    /// Apply a config snapshot. Safe while stopped; failures surface later
    /// through `is_active` or `start`. / 应用配置快照
    fn update_config(&self, config: Arc<SearchConfig>);

    /// Connect and initialise / 启动
    async fn start(&self) -> Result<(), EngineError>;

    /// Release resources; fine if never started / 停止
    async fn stop(&self) -> Result<(), EngineError>;

    /// Tag every indexed post of `channel_ids` with `channel_type`.
    /// The whole batch is applied or an error is returned.
    /// 批量回填帖子的频道类型
    async fn backfill_posts_channel_type(
        &self,
        cancel: &CancellationToken,
        channel_ids: &[String],
        channel_type: &ChannelType,
    ) -> Result<(), EngineError>;
}
