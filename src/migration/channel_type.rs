//! Post channel-type backfill / 帖子频道类型回填
//!
//! Walks every channel of the primary store page by page and tags the posts
//! already in the search index with their channel's visibility type. The
//! bulk patch overwrites a field, so re-running after a failure is safe and
//! there is no resume cursor: a failed run starts over from offset 0.

use std::collections::HashSet;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use super::{MigrationError, MigrationProgress, MIGRATION_DONE_VALUE};
use crate::models::{Channel, ChannelSearchOpts, ChannelType, SystemRecord};
use crate::search::{EngineError, SearchEngine};
use crate::store::{ChannelStore, StoreError, SystemStore};

/// Completion marker key in the `systems` table / 完成标记键名
pub const CHANNEL_TYPE_BACKFILL_KEY: &str = "post channel-type backfill complete";

/// Channel ids of one page grouped by type / 按类型分组的频道ID
#[derive(Debug, Default, PartialEq)]
pub struct ChannelTypePartition {
    pub open: Vec<String>,
    pub private: Vec<String>,
    /// Channels of other types left out / 跳过的其他类型频道数
    pub skipped: usize,
}

impl ChannelTypePartition {
    /// Non-empty groups, public before private / 非空分组（公开在前）
    pub fn groups(&self) -> impl Iterator<Item = (ChannelType, &[String])> {
        [
            (ChannelType::Open, self.open.as_slice()),
            (ChannelType::Private, self.private.as_slice()),
        ]
        .into_iter()
        .filter(|(_, ids)| !ids.is_empty())
    }
}

/// Split a page into open and private ids, dropping repeats / 分组并去重
pub fn partition_by_type(channels: &[Channel]) -> ChannelTypePartition {
    let mut partition = ChannelTypePartition::default();
    let mut seen = HashSet::with_capacity(channels.len());

    for channel in channels {
        if !seen.insert(channel.id.as_str()) {
            continue;
        }
        match channel.channel_type {
            ChannelType::Open => partition.open.push(channel.id.clone()),
            ChannelType::Private => partition.private.push(channel.id.clone()),
            _ => partition.skipped += 1,
        }
    }
    partition
}

/// Result of a successful invocation / 成功结果
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum BackfillOutcome {
    /// Marker was already set, nothing done / 已完成过，无操作
    AlreadyComplete,
    /// Full scan finished and marker written / 扫描完成并写入标记
    Completed { pages: u64, channels: u64 },
    /// No engine to patch; marker left unset / 无活跃引擎，跳过
    NoActiveEngine,
}

/// Channel-type backfill migration / 频道类型回填迁移
pub struct ChannelTypeBackfill {
    channels: Arc<dyn ChannelStore>,
    systems: Arc<dyn SystemStore>,
    /// Read once per run / 每次运行时读取
    page_size: AtomicI64,
    progress: Arc<MigrationProgress>,
}

impl ChannelTypeBackfill {
    pub fn new(channels: Arc<dyn ChannelStore>, systems: Arc<dyn SystemStore>, page_size: i64) -> Self {
        Self {
            channels,
            systems,
            page_size: AtomicI64::new(page_size.max(1)),
            progress: Arc::new(MigrationProgress::new()),
        }
    }

    pub fn progress(&self) -> Arc<MigrationProgress> {
        self.progress.clone()
    }

    pub fn page_size(&self) -> i64 {
        self.page_size.load(Ordering::SeqCst)
    }

    /// Page size for later runs; a run in flight keeps its own / 设置分页大小
    pub fn set_page_size(&self, page_size: i64) {
        self.page_size.store(page_size.max(1), Ordering::SeqCst);
    }

    /// Whether the completion marker is set / 是否已完成
    pub async fn is_complete(&self) -> Result<bool, StoreError> {
        match self.systems.get_by_name(CHANNEL_TYPE_BACKFILL_KEY).await {
            Ok(record) => Ok(record.value == MIGRATION_DONE_VALUE),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Run the backfill against `engine`. Callers serialise invocations.
    /// 执行回填（调用方保证不并发）
    pub async fn run(
        &self,
        engine: &dyn SearchEngine,
        cancel: &CancellationToken,
    ) -> Result<BackfillOutcome, MigrationError> {
        self.progress.start();

        match self.is_complete().await {
            Ok(true) => {
                tracing::debug!("Channel type backfill already complete, skipping");
                self.progress.already_completed();
                return Ok(BackfillOutcome::AlreadyComplete);
            }
            Ok(false) => {}
            Err(e) => {
                tracing::error!("Failed to read channel type backfill marker: {}", e);
                self.progress.finish(Some(e.to_string()));
                return Err(e.into());
            }
        }

        let page_size = self.page_size();
        tracing::info!("Channel type backfill started on {} (page size {})", engine.name(), page_size);
        let result = self.scan(engine, page_size, cancel).await;

        match &result {
            Ok(BackfillOutcome::Completed { pages, channels }) => {
                tracing::info!("Channel type backfill completed: {} pages, {} channels", pages, channels);
                self.progress.finish(None);
            }
            Ok(_) => self.progress.finish(None),
            Err(e) => {
                tracing::error!("Channel type backfill aborted: {}", e);
                self.progress.finish(Some(e.to_string()));
            }
        }
        result
    }

    async fn scan(
        &self,
        engine: &dyn SearchEngine,
        page_size: i64,
        cancel: &CancellationToken,
    ) -> Result<BackfillOutcome, MigrationError> {
        // Archived channels still have indexed posts
        let opts = ChannelSearchOpts {
            include_deleted: true,
            ..Default::default()
        };
        let mut offset = 0;
        let mut pages = 0;
        let mut patched = 0;

        loop {
            let channels = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(MigrationError::Cancelled),
                res = self.channels.get_all_channels(offset, page_size, &opts) => res?,
            };
            pages += 1;
            self.progress.record_page();

            let partition = partition_by_type(&channels);
            if partition.skipped > 0 {
                tracing::debug!("Skipped {} channels of unsupported type at offset {}", partition.skipped, offset);
            }

            for (channel_type, ids) in partition.groups() {
                let res = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(MigrationError::Cancelled),
                    res = engine.backfill_posts_channel_type(cancel, ids, &channel_type) => res,
                };
                res.map_err(|e| match e {
                    EngineError::Cancelled => MigrationError::Cancelled,
                    e => MigrationError::Engine(e),
                })?;
                patched += ids.len() as u64;
                self.progress.record_patched(ids.len() as u64);
            }

            if (channels.len() as i64) < page_size {
                break;
            }
            offset += page_size;
        }

        self.systems
            .save_or_update(&SystemRecord::new(CHANNEL_TYPE_BACKFILL_KEY, MIGRATION_DONE_VALUE))
            .await?;

        Ok(BackfillOutcome::Completed { pages, channels: patched })
    }
}
