//! Recording engine for tests / 测试用记录引擎

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use super::{EngineError, SearchEngine};
use crate::config::SearchConfig;
use crate::models::ChannelType;

pub(crate) struct MockEngine {
    name: String,
    pub enabled: AtomicBool,
    pub running: AtomicBool,
    pub fail_start: AtomicBool,
    /// Zero-based backfill call index that fails
    pub fail_backfill_at: Mutex<Option<usize>>,
    /// Backfill calls wait for cancellation
    pub hold_backfill: AtomicBool,
    /// Blocks the next `update_config` call
    pub config_delay: Mutex<Option<Duration>>,
    pub configs: Mutex<Vec<Arc<SearchConfig>>>,
    pub backfills: Mutex<Vec<(Vec<String>, ChannelType)>>,
    pub starts: AtomicUsize,
    pub stops: AtomicUsize,
}

impl MockEngine {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            enabled: AtomicBool::new(false),
            running: AtomicBool::new(false),
            fail_start: AtomicBool::new(false),
            fail_backfill_at: Mutex::new(None),
            hold_backfill: AtomicBool::new(false),
            config_delay: Mutex::new(None),
            configs: Mutex::new(Vec::new()),
            backfills: Mutex::new(Vec::new()),
            starts: AtomicUsize::new(0),
            stops: AtomicUsize::new(0),
        }
    }

    /// Enabled and running / 启用并运行
    pub fn active(name: &str) -> Arc<Self> {
        let engine = Self::new(name);
        engine.enabled.store(true, Ordering::SeqCst);
        engine.running.store(true, Ordering::SeqCst);
        Arc::new(engine)
    }

    /// Enabled but not started / 启用但未启动
    pub fn enabled(name: &str) -> Arc<Self> {
        let engine = Self::new(name);
        engine.enabled.store(true, Ordering::SeqCst);
        Arc::new(engine)
    }

    pub fn backfill_calls(&self) -> Vec<(Vec<String>, ChannelType)> {
        self.backfills.lock().clone()
    }
}

#[async_trait]
impl SearchEngine for MockEngine {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    fn is_active(&self) -> bool {
        self.is_enabled() && self.running.load(Ordering::SeqCst)
    }

    fn update_config(&self, config: Arc<SearchConfig>) {
        let delay = self.config_delay.lock().take();
        if let Some(delay) = delay {
            std::thread::sleep(delay);
        }
        self.configs.lock().push(config);
    }

    async fn start(&self) -> Result<(), EngineError> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        if self.fail_start.load(Ordering::SeqCst) {
            return Err(EngineError::Backend("connection refused".to_string()));
        }
        self.running.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn stop(&self) -> Result<(), EngineError> {
        self.stops.fetch_add(1, Ordering::SeqCst);
        self.running.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn backfill_posts_channel_type(
        &self,
        cancel: &CancellationToken,
        channel_ids: &[String],
        channel_type: &ChannelType,
    ) -> Result<(), EngineError> {
        let index = {
            let mut calls = self.backfills.lock();
            calls.push((channel_ids.to_vec(), channel_type.clone()));
            calls.len() - 1
        };
        if self.hold_backfill.load(Ordering::SeqCst) {
            cancel.cancelled().await;
            return Err(EngineError::Cancelled);
        }
        if *self.fail_backfill_at.lock() == Some(index) {
            return Err(EngineError::Backend("bulk update rejected".to_string()));
        }
        Ok(())
    }
}
