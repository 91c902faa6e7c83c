//! In-memory store for tests / 测试用内存存储

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;

use super::{ChannelStore, StoreError, SystemStore};
use crate::models::{Channel, ChannelSearchOpts, SystemRecord};

#[derive(Default)]
pub(crate) struct MockStore {
    pub channels: Mutex<Vec<Channel>>,
    pub systems: Mutex<HashMap<String, String>>,
    /// Offsets whose listing call fails
    pub fail_at_offsets: Mutex<Vec<i64>>,
    pub fail_marker_read: Mutex<bool>,
    pub list_calls: Mutex<Vec<(i64, i64)>>,
    pub saves: Mutex<Vec<SystemRecord>>,
}

impl MockStore {
    pub fn with_channels(channels: Vec<Channel>) -> Self {
        let store = Self::default();
        *store.channels.lock() = channels;
        store
    }
}

#[async_trait]
impl ChannelStore for MockStore {
    async fn get_all_channels(
        &self,
        offset: i64,
        limit: i64,
        _opts: &ChannelSearchOpts,
    ) -> Result<Vec<Channel>, StoreError> {
        self.list_calls.lock().push((offset, limit));
        if self.fail_at_offsets.lock().contains(&offset) {
            return Err(StoreError::Database(sqlx::Error::PoolTimedOut));
        }
        let channels = self.channels.lock();
        Ok(channels
            .iter()
            .skip(offset as usize)
            .take(limit as usize)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl SystemStore for MockStore {
    async fn get_by_name(&self, name: &str) -> Result<SystemRecord, StoreError> {
        if *self.fail_marker_read.lock() {
            return Err(StoreError::Database(sqlx::Error::PoolClosed));
        }
        self.systems
            .lock()
            .get(name)
            .map(|value| SystemRecord::new(name, value))
            .ok_or_else(|| StoreError::NotFound {
                what: "system",
                key: name.to_string(),
            })
    }

    async fn save_or_update(&self, record: &SystemRecord) -> Result<(), StoreError> {
        self.saves.lock().push(record.clone());
        self.systems.lock().insert(record.name.clone(), record.value.clone());
        Ok(())
    }
}
