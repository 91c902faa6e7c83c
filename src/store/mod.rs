//! Primary store interfaces / 主存储接口
//!
//! The backfill only reads channels and one system key; these traits are the
//! whole surface it needs from the primary store.

use async_trait::async_trait;
use thiserror::Error;

use crate::models::{Channel, ChannelSearchOpts, SystemRecord};

pub mod sqlite;

#[cfg(test)]
pub(crate) mod mock;

pub use sqlite::SqlStore;

/// Primary store errors / 主存储错误
#[derive(Debug, Error)]
pub enum StoreError {
    /// Requested row does not exist / 记录不存在
    #[error("{what} not found: {key}")]
    NotFound { what: &'static str, key: String },

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("invalid argument: {0}")]
    Invalid(String),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }
}

/// Channel listing / 频道列表
#[async_trait]
pub trait ChannelStore: Send + Sync {
    /// Page through channels ordered by id. Public and private channels are
    /// both returned whatever `opts` says.
    /// 分页列出频道（始终同时返回公开和私有频道）
    async fn get_all_channels(
        &self,
        offset: i64,
        limit: i64,
        opts: &ChannelSearchOpts,
    ) -> Result<Vec<Channel>, StoreError>;
}

/// System key-value table / 系统键值表
#[async_trait]
pub trait SystemStore: Send + Sync {
    /// Returns `StoreError::NotFound` when the key is absent / 不存在时返回 NotFound
    async fn get_by_name(&self, name: &str) -> Result<SystemRecord, StoreError>;

    async fn save_or_update(&self, record: &SystemRecord) -> Result<(), StoreError>;
}
