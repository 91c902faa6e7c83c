//! SQLite primary store / SQLite 主存储

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{Row, SqlitePool};

use super::{ChannelStore, StoreError, SystemStore};
use crate::models::{Channel, ChannelSearchOpts, ChannelType, SystemRecord};

/// Primary store backed by the main SQLite pool / 主数据库存储
#[derive(Clone)]
pub struct SqlStore {
    db: SqlitePool,
}

impl SqlStore {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    /// Insert or replace a channel row / 保存频道
    pub async fn save_channel(&self, channel: &Channel) -> Result<(), StoreError> {
        let now = Utc::now().timestamp_millis();
        sqlx::query(
            r#"
            INSERT INTO channels (id, team_id, type, name, display_name, create_at, update_at, delete_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                team_id = excluded.team_id,
                type = excluded.type,
                name = excluded.name,
                display_name = excluded.display_name,
                update_at = excluded.update_at,
                delete_at = excluded.delete_at
            "#,
        )
        .bind(&channel.id)
        .bind(&channel.team_id)
        .bind(channel.channel_type.as_str())
        .bind(&channel.name)
        .bind(&channel.display_name)
        .bind(now)
        .bind(now)
        .bind(channel.delete_at)
        .execute(&self.db)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl ChannelStore for SqlStore {
    async fn get_all_channels(
        &self,
        offset: i64,
        limit: i64,
        opts: &ChannelSearchOpts,
    ) -> Result<Vec<Channel>, StoreError> {
        if offset < 0 || limit <= 0 {
            return Err(StoreError::Invalid(format!("offset={} limit={}", offset, limit)));
        }

        // Direct and group messages are not team channels
        let mut sql = String::from(
            "SELECT id, type, team_id, name, display_name, delete_at FROM channels WHERE type NOT IN ('D', 'G')",
        );
        if !opts.include_deleted {
            sql.push_str(" AND delete_at = 0");
        }
        if opts.team_id.is_some() {
            sql.push_str(" AND team_id = ?");
        }
        sql.push_str(" ORDER BY id LIMIT ? OFFSET ?");

        let mut query = sqlx::query(&sql);
        if let Some(ref team_id) = opts.team_id {
            query = query.bind(team_id);
        }
        let rows = query.bind(limit).bind(offset).fetch_all(&self.db).await?;

        let channels = rows
            .into_iter()
            .map(|row| Channel {
                id: row.get("id"),
                channel_type: ChannelType::from(row.get::<String, _>("type")),
                team_id: row.get("team_id"),
                name: row.get("name"),
                display_name: row.get("display_name"),
                delete_at: row.get("delete_at"),
            })
            .collect();

        Ok(channels)
    }
}

#[async_trait]
impl SystemStore for SqlStore {
    async fn get_by_name(&self, name: &str) -> Result<SystemRecord, StoreError> {
        sqlx::query_as::<_, SystemRecord>("SELECT name, value FROM systems WHERE name = ?")
            .bind(name)
            .fetch_optional(&self.db)
            .await?
            .ok_or_else(|| StoreError::NotFound {
                what: "system",
                key: name.to_string(),
            })
    }

    async fn save_or_update(&self, record: &SystemRecord) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO systems (name, value) VALUES (?, ?)
            ON CONFLICT(name) DO UPDATE SET value = excluded.value
            "#,
        )
        .bind(&record.name)
        .bind(&record.value)
        .execute(&self.db)
        .await?;
        Ok(())
    }
}

#[cfg(test)]
pub(crate) async fn memory_pool() -> SqlitePool {
    sqlx::sqlite::SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect("sqlite::memory:")
        .await
        .unwrap()
}
