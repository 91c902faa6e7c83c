//! Embedded search index - one SQLite file in WAL mode / 内嵌搜索索引
//!
//! Posts are stored with their channel id and a derived `channel_type`
//! column that the channel-type backfill fills in. Query and ranking live
//! elsewhere; this engine only exposes the lifecycle and bulk patch
//! primitives the broker needs.

use async_trait::async_trait;
use parking_lot::RwLock;
use sqlx::{sqlite::SqlitePoolOptions, Row, SqlitePool};
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use super::schema::PostDocument;
use super::{EngineError, SearchEngine};
use crate::config::SearchConfig;
use crate::models::ChannelType;

/// SQLite bound-parameter budget per statement / 每条语句的绑定参数上限
const BACKFILL_CHUNK: usize = 500;
/// Retries when the index file is locked / 数据库锁定时的重试次数
const MAX_RETRIES: u32 = 3;

pub const EMBEDDED_ENGINE_NAME: &str = "embedded";

/// Embedded search engine / 内嵌搜索引擎
pub struct EmbeddedIndex {
    db_url: String,
    config: RwLock<Arc<SearchConfig>>,
    /// Open pool while started / 启动后的连接池
    db: RwLock<Option<SqlitePool>>,
}

impl EmbeddedIndex {
    pub fn new(db_url: impl Into<String>, config: Arc<SearchConfig>) -> Self {
        Self {
            db_url: db_url.into(),
            config: RwLock::new(config),
            db: RwLock::new(None),
        }
    }

    /// Build the index URL from a file path, creating its directory / 根据路径创建索引
    pub fn at_path(path: &Path, config: Arc<SearchConfig>) -> Self {
        if let Some(parent) = path.parent() {
            if let Err(e) = std::fs::create_dir_all(parent) {
                tracing::warn!("Failed to create search index directory {:?}: {}", parent, e);
            }
        }
        Self::new(format!("sqlite:{}?mode=rwc", path.to_string_lossy()), config)
    }

    fn pool(&self) -> Result<SqlitePool, EngineError> {
        self.db
            .read()
            .clone()
            .ok_or_else(|| EngineError::NotStarted(EMBEDDED_ENGINE_NAME.to_string()))
    }

    async fn open(&self) -> Result<SqlitePool, sqlx::Error> {
        // Single writer; keeps `sqlite::memory:` indexes on one connection
        let db = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect(&self.db_url)
            .await?;

        // 启用WAL模式，提高并发性能
        sqlx::query("PRAGMA journal_mode=WAL").execute(&db).await?;
        // 设置busy_timeout，避免锁超时
        sqlx::query("PRAGMA busy_timeout=5000").execute(&db).await?;
        sqlx::query("PRAGMA synchronous=NORMAL").execute(&db).await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS posts (
                id TEXT PRIMARY KEY,
                channel_id TEXT NOT NULL,
                channel_type TEXT,
                message TEXT NOT NULL,
                create_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&db)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_posts_channel_id ON posts(channel_id)")
            .execute(&db)
            .await?;

        Ok(db)
    }

    /// Bulk load posts into the index / 批量写入帖子
    pub async fn index_posts(&self, posts: &[PostDocument]) -> Result<(), EngineError> {
        if posts.is_empty() {
            return Ok(());
        }
        let db = self.pool()?;
        let mut tx = db.begin().await?;
        for post in posts {
            sqlx::query(
                "INSERT OR REPLACE INTO posts (id, channel_id, channel_type, message, create_at) VALUES (?, ?, ?, ?, ?)",
            )
            .bind(&post.id)
            .bind(&post.channel_id)
            .bind(post.channel_type.as_ref().map(|t| t.as_str().to_string()))
            .bind(&post.message)
            .bind(post.create_at)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// Read back the channel type tag of one post / 读取帖子的频道类型
    pub async fn channel_type_of(&self, post_id: &str) -> Result<Option<ChannelType>, EngineError> {
        let db = self.pool()?;
        let row = sqlx::query("SELECT channel_type FROM posts WHERE id = ?")
            .bind(post_id)
            .fetch_optional(&db)
            .await?;
        Ok(row
            .and_then(|r| r.get::<Option<String>, _>("channel_type"))
            .map(ChannelType::from))
    }

    /// Number of indexed posts / 已索引帖子数
    pub async fn post_count(&self) -> Result<i64, EngineError> {
        let db = self.pool()?;
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM posts")
            .fetch_one(&db)
            .await?;
        Ok(count)
    }

    /// One transaction over all chunks / 单事务批量更新
    async fn do_backfill(
        &self,
        db: &SqlitePool,
        cancel: &CancellationToken,
        channel_ids: &[String],
        channel_type: &ChannelType,
    ) -> Result<u64, EngineError> {
        let mut tx = db.begin().await?;
        let mut updated = 0;

        for chunk in channel_ids.chunks(BACKFILL_CHUNK) {
            // Dropping the transaction rolls it back
            if cancel.is_cancelled() {
                return Err(EngineError::Cancelled);
            }

            let placeholders = vec!["?"; chunk.len()].join(", ");
            let sql = format!(
                "UPDATE posts SET channel_type = ? WHERE channel_id IN ({})",
                placeholders
            );
            let mut query = sqlx::query(&sql).bind(channel_type.as_str());
            for id in chunk {
                query = query.bind(id);
            }
            updated += query.execute(&mut *tx).await?.rows_affected();
        }

        tx.commit().await?;
        Ok(updated)
    }
}

#[async_trait]
impl SearchEngine for EmbeddedIndex {
    fn name(&self) -> &str {
        EMBEDDED_ENGINE_NAME
    }

    fn is_enabled(&self) -> bool {
        self.config.read().embedded.enable_indexing
    }

    fn is_active(&self) -> bool {
        self.is_enabled() && self.db.read().is_some()
    }

    fn update_config(&self, config: Arc<SearchConfig>) {
        *self.config.write() = config;
    }

    async fn start(&self) -> Result<(), EngineError> {
        if !self.is_enabled() {
            return Err(EngineError::Disabled(EMBEDDED_ENGINE_NAME.to_string()));
        }
        if self.db.read().is_some() {
            return Err(EngineError::AlreadyStarted(EMBEDDED_ENGINE_NAME.to_string()));
        }

        let timeout = self.config.read().embedded.request_timeout();
        let db = tokio::time::timeout(timeout, self.open())
            .await
            .map_err(|_| EngineError::Timeout {
                name: EMBEDDED_ENGINE_NAME.to_string(),
                secs: timeout.as_secs(),
            })??;

        let raced = {
            let mut guard = self.db.write();
            if guard.is_some() {
                Some(db)
            } else {
                *guard = Some(db);
                None
            }
        };
        // Lost a race with a concurrent start
        if let Some(db) = raced {
            db.close().await;
            return Err(EngineError::AlreadyStarted(EMBEDDED_ENGINE_NAME.to_string()));
        }
        tracing::info!("Embedded search index started: {}", self.db_url);
        Ok(())
    }

    async fn stop(&self) -> Result<(), EngineError> {
        let db = self.db.write().take();
        if let Some(db) = db {
            db.close().await;
            tracing::info!("Embedded search index stopped");
        }
        Ok(())
    }

    async fn backfill_posts_channel_type(
        &self,
        cancel: &CancellationToken,
        channel_ids: &[String],
        channel_type: &ChannelType,
    ) -> Result<(), EngineError> {
        if channel_ids.is_empty() {
            return Ok(());
        }
        let db = self.pool()?;

        // 重试机制：数据库锁定时最多重试3次
        let mut attempt = 0;
        loop {
            match self.do_backfill(&db, cancel, channel_ids, channel_type).await {
                Ok(updated) => {
                    tracing::debug!(
                        "Backfilled channel type {} on {} posts across {} channels",
                        channel_type,
                        updated,
                        channel_ids.len()
                    );
                    return Ok(());
                }
                Err(EngineError::Index(e)) if attempt + 1 < MAX_RETRIES && is_locked(&e) => {
                    attempt += 1;
                    let delay = 100 * attempt as u64;
                    tracing::debug!("Index locked, retrying in {}ms (attempt {}/{})", delay, attempt, MAX_RETRIES);
                    tokio::time::sleep(std::time::Duration::from_millis(delay)).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

fn is_locked(e: &sqlx::Error) -> bool {
    let msg = e.to_string();
    msg.contains("database is locked") || msg.contains("SQLITE_BUSY")
}
