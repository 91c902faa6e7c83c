//! One-off data migrations / 一次性数据迁移
//!
//! A migration is complete when its marker row in the `systems` table reads
//! `"true"`. Nothing else is persisted: an aborted run leaves no trace and
//! the next run starts from the beginning.

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;

use crate::search::EngineError;
use crate::store::StoreError;

pub mod channel_type;

pub use channel_type::{
    partition_by_type, BackfillOutcome, ChannelTypeBackfill, ChannelTypePartition,
    CHANNEL_TYPE_BACKFILL_KEY,
};

/// Marker value of a completed migration / 迁移完成标记值
pub const MIGRATION_DONE_VALUE: &str = "true";

/// Migration errors / 迁移错误
#[derive(Debug, Error)]
pub enum MigrationError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("search engine error: {0}")]
    Engine(#[from] EngineError),

    #[error("migration cancelled")]
    Cancelled,

    #[error("migration {0} is already running")]
    AlreadyRunning(String),
}

/// Migration run state / 迁移运行状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MigrationState {
    NotStarted,
    Running,
    /// Terminal success / 已完成
    Completed,
    /// Terminal failure for this run, not persisted / 本次运行失败
    Aborted,
}

/// Progress snapshot / 进度快照
#[derive(Debug, Clone, Serialize)]
pub struct MigrationSnapshot {
    pub state: MigrationState,
    pub is_running: bool,
    pub pages_scanned: u64,
    pub channels_patched: u64,
    pub error: Option<String>,
    pub last_done_time: Option<i64>,
}

impl Default for MigrationSnapshot {
    fn default() -> Self {
        Self {
            state: MigrationState::NotStarted,
            is_running: false,
            pages_scanned: 0,
            channels_patched: 0,
            error: None,
            last_done_time: None,
        }
    }
}

/// Migration progress tracking / 迁移进度管理
pub struct MigrationProgress {
    running: AtomicBool,
    pages_scanned: AtomicU64,
    channels_patched: AtomicU64,
    progress: RwLock<MigrationSnapshot>,
}

impl MigrationProgress {
    pub fn new() -> Self {
        Self {
            running: AtomicBool::new(false),
            pages_scanned: AtomicU64::new(0),
            channels_patched: AtomicU64::new(0),
            progress: RwLock::new(MigrationSnapshot::default()),
        }
    }

    pub fn start(&self) {
        self.running.store(true, Ordering::SeqCst);
        self.pages_scanned.store(0, Ordering::SeqCst);
        self.channels_patched.store(0, Ordering::SeqCst);
        let mut progress = self.progress.write();
        progress.state = MigrationState::Running;
        progress.is_running = true;
        progress.pages_scanned = 0;
        progress.channels_patched = 0;
        progress.error = None;
    }

    pub fn record_page(&self) {
        let pages = self.pages_scanned.fetch_add(1, Ordering::SeqCst) + 1;
        self.progress.write().pages_scanned = pages;
    }

    pub fn record_patched(&self, channels: u64) {
        let total = self.channels_patched.fetch_add(channels, Ordering::SeqCst) + channels;
        self.progress.write().channels_patched = total;
    }

    /// Mark completed without running, marker already set / 已完成
    pub fn already_completed(&self) {
        self.running.store(false, Ordering::SeqCst);
        let mut progress = self.progress.write();
        progress.state = MigrationState::Completed;
        progress.is_running = false;
    }

    pub fn finish(&self, error: Option<String>) {
        self.running.store(false, Ordering::SeqCst);
        let mut progress = self.progress.write();
        progress.is_running = false;
        progress.state = if error.is_none() {
            MigrationState::Completed
        } else {
            MigrationState::Aborted
        };
        progress.error = error;
        progress.last_done_time = Some(chrono::Utc::now().timestamp());
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn snapshot(&self) -> MigrationSnapshot {
        self.progress.read().clone()
    }
}

impl Default for MigrationProgress {
    fn default() -> Self {
        Self::new()
    }
}

/// Single-flight gate keyed by migration name / 迁移单飞锁
#[derive(Default)]
pub struct MigrationGate {
    running: Mutex<HashSet<String>>,
}

impl MigrationGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `name`; `None` while another run holds it / 获取运行权
    pub fn try_acquire(self: &Arc<Self>, name: &str) -> Option<MigrationGuard> {
        if self.running.lock().insert(name.to_string()) {
            Some(MigrationGuard {
                gate: self.clone(),
                name: name.to_string(),
            })
        } else {
            None
        }
    }

    pub fn is_held(&self, name: &str) -> bool {
        self.running.lock().contains(name)
    }
}

/// Releases the gate on drop / 离开作用域时释放
pub struct MigrationGuard {
    gate: Arc<MigrationGate>,
    name: String,
}

impl Drop for MigrationGuard {
    fn drop(&mut self) {
        self.gate.running.lock().remove(&self.name);
    }
}
