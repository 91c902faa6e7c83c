//! Platform service - search engine lifecycle and startup migrations / 平台服务
//!
//! Owns the search broker for the rest of the process. Engine starts run in
//! the background so a slow handshake never holds up startup; a failed
//! start is only visible through `is_active()` afterwards.

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::SearchConfig;
use crate::migration::{
    BackfillOutcome, ChannelTypeBackfill, MigrationError, MigrationGate, MigrationGuard,
    MigrationSnapshot, CHANNEL_TYPE_BACKFILL_KEY,
};
use crate::search::broker::EngineHandle;
use crate::store::StoreError;
use crate::search::{EngineKind, SearchBroker};

/// Poll interval while waiting for an engine to come up / 等待引擎启动的轮询间隔
const ACTIVE_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Platform service / 平台服务
pub struct PlatformService {
    broker: Arc<SearchBroker>,
    backfill: Arc<ChannelTypeBackfill>,
    gate: Arc<MigrationGate>,
    /// Token of the backfill run in flight / 当前回填任务的取消令牌
    backfill_cancel: Mutex<Option<CancellationToken>>,
    /// Serialises config changes, held across the start/stop diff / 配置变更互斥
    config_lock: tokio::sync::Mutex<()>,
}

impl PlatformService {
    pub fn new(broker: Arc<SearchBroker>, backfill: Arc<ChannelTypeBackfill>) -> Self {
        Self {
            broker,
            backfill,
            gate: Arc::new(MigrationGate::new()),
            backfill_cancel: Mutex::new(None),
            config_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn broker(&self) -> &Arc<SearchBroker> {
        &self.broker
    }

    /// Current active engine label / 当前活跃引擎
    pub fn active_engine(&self) -> String {
        self.broker.active_engine()
    }

    /// Start every registered engine that is enabled, in the background.
    /// Absent engines are skipped. Returned handles may be ignored.
    /// 后台启动已启用的搜索引擎
    pub fn start_search_engine(&self) -> Vec<JoinHandle<()>> {
        let config = self.broker.config();
        let timeout = config.start_timeout();
        let mut handles = Vec::new();

        for (kind, engine) in self.broker.registered_engines() {
            if !engine.is_enabled() {
                tracing::debug!("Search engine {} ({}) disabled, not starting", engine.name(), kind);
                continue;
            }
            if engine.is_active() {
                continue;
            }

            engine.update_config(config.clone());
            handles.push(spawn_start(kind, engine, timeout));
        }
        handles
    }

    /// Stop every active engine / 停止活跃的搜索引擎
    pub async fn stop_search_engine(&self) {
        self.cancel_backfill();
        for (kind, engine) in self.broker.registered_engines() {
            if !engine.is_active() {
                continue;
            }
            match engine.stop().await {
                Ok(()) => tracing::info!("Search engine {} ({}) stopped", engine.name(), kind),
                Err(e) => tracing::warn!("Failed to stop search engine {} ({}): {}", engine.name(), kind, e),
            }
        }
    }

    /// Apply a config change: fan out through the broker, then start engines
    /// that were switched on and stop the ones switched off.
    /// 应用配置变更
    pub async fn update_config(&self, config: SearchConfig) -> anyhow::Result<Vec<JoinHandle<()>>> {
        let _changing = self.config_lock.lock().await;
        let previous = self.broker.config();
        let config = Arc::new(config);
        self.broker.update_config(config.clone())?;
        // Picked up by the next backfill run
        self.backfill.set_page_size(config.page_size());

        let timeout = config.start_timeout();
        let mut handles = Vec::new();
        for (kind, engine) in self.broker.registered_engines() {
            let was = kind.enabled_in(&previous);
            let now = kind.enabled_in(&config);
            if !was && now && !engine.is_active() {
                tracing::info!("Search engine {} ({}) enabled, starting", engine.name(), kind);
                handles.push(spawn_start(kind, engine, timeout));
            } else if was && !now {
                tracing::info!("Search engine {} ({}) disabled, stopping", engine.name(), kind);
                if let Err(e) = engine.stop().await {
                    tracing::warn!("Failed to stop search engine {} ({}): {}", engine.name(), kind, e);
                }
            }
        }
        Ok(handles)
    }

    /// Backfill progress / 回填进度
    pub fn backfill_status(&self) -> MigrationSnapshot {
        self.backfill.progress().snapshot()
    }

    /// Whether the completion marker is set / 回填是否已完成
    pub async fn is_backfill_complete(&self) -> Result<bool, StoreError> {
        self.backfill.is_complete().await
    }

    pub fn is_backfill_running(&self) -> bool {
        self.gate.is_held(CHANNEL_TYPE_BACKFILL_KEY)
    }

    /// Run the channel-type backfill against the first active engine.
    /// At most one run at a time; a second caller gets `AlreadyRunning`.
    /// 执行频道类型回填（单飞）
    pub async fn run_channel_type_backfill(&self) -> Result<BackfillOutcome, MigrationError> {
        let guard = self.acquire_backfill()?;
        self.run_backfill_holding(guard).await
    }

    fn acquire_backfill(&self) -> Result<MigrationGuard, MigrationError> {
        self.gate
            .try_acquire(CHANNEL_TYPE_BACKFILL_KEY)
            .ok_or_else(|| MigrationError::AlreadyRunning(CHANNEL_TYPE_BACKFILL_KEY.to_string()))
    }

    /// Gate is released when `_guard` drops / 持有运行权执行回填
    async fn run_backfill_holding(&self, _guard: MigrationGuard) -> Result<BackfillOutcome, MigrationError> {
        let engine = match self.broker.get_active_engines().into_iter().next() {
            Some(engine) => engine,
            None => {
                tracing::info!("No active search engine, channel type backfill skipped");
                return Ok(BackfillOutcome::NoActiveEngine);
            }
        };

        let cancel = CancellationToken::new();
        *self.backfill_cancel.lock() = Some(cancel.clone());
        let result = self.backfill.run(engine.as_ref(), &cancel).await;
        *self.backfill_cancel.lock() = None;
        result
    }

    /// Cancel the run in flight, if any / 取消正在进行的回填
    pub fn cancel_backfill(&self) -> bool {
        match self.backfill_cancel.lock().as_ref() {
            Some(token) => {
                token.cancel();
                tracing::info!("Channel type backfill cancellation requested");
                true
            }
            None => false,
        }
    }

    /// Run the backfill on a background task. The gate is taken before
    /// spawning, so a concurrent run is reported here as `AlreadyRunning`.
    /// 后台执行回填
    pub fn spawn_channel_type_backfill(
        self: &Arc<Self>,
    ) -> Result<JoinHandle<Result<BackfillOutcome, MigrationError>>, MigrationError> {
        let guard = self.acquire_backfill()?;
        let platform = self.clone();
        Ok(tokio::spawn(async move {
            let result = platform.run_backfill_holding(guard).await;
            if let Err(e) = &result {
                tracing::warn!("Channel type backfill did not complete: {}", e);
            }
            result
        }))
    }

    /// Startup sequence for migrations: wait for an engine to come up, then
    /// backfill once. Failures are logged and retried on next start.
    /// 启动时迁移：等待引擎就绪后执行一次回填
    pub fn spawn_startup_migrations(self: &Arc<Self>) -> JoinHandle<()> {
        let platform = self.clone();
        tokio::spawn(async move {
            let wait = platform.broker.config().start_timeout();
            platform.wait_for_active_engine(wait).await;

            match platform.run_channel_type_backfill().await {
                Ok(BackfillOutcome::NoActiveEngine) => {}
                Ok(outcome) => tracing::debug!("Startup backfill finished: {:?}", outcome),
                Err(e) => tracing::warn!("Channel type backfill failed, will retry on next start: {}", e),
            }
        })
    }

    /// Returns once an engine is active, or after `wait` / 等待引擎就绪
    async fn wait_for_active_engine(&self, wait: Duration) -> bool {
        let any_enabled = self
            .broker
            .registered_engines()
            .iter()
            .any(|(_, engine)| engine.is_enabled());
        if !any_enabled {
            return false;
        }

        let deadline = tokio::time::Instant::now() + wait;
        loop {
            if !self.broker.get_active_engines().is_empty() {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                tracing::warn!("No search engine became active within {}s", wait.as_secs());
                return false;
            }
            tokio::time::sleep(ACTIVE_POLL_INTERVAL).await;
        }
    }
}

/// Start one engine in the background, bounded by `timeout` / 后台启动单个引擎
fn spawn_start(kind: EngineKind, engine: EngineHandle, timeout: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        match tokio::time::timeout(timeout, engine.start()).await {
            Ok(Ok(())) => tracing::info!("Search engine {} ({}) started", engine.name(), kind),
            Ok(Err(e)) => tracing::error!("Failed to start search engine {} ({}): {}", engine.name(), kind, e),
            Err(_) => tracing::error!(
                "Search engine {} ({}) start timed out after {}s",
                engine.name(),
                kind,
                timeout.as_secs()
            ),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::run_migrations;
    use crate::migration::MigrationState;
    use crate::models::{Channel, ChannelType};
    use crate::search::mock::MockEngine;
    use crate::search::{EmbeddedIndex, PostDocument, SearchEngine};
    use crate::store::mock::MockStore;
    use crate::store::{SqlStore, SystemStore};
    use std::sync::atomic::Ordering;

    fn platform_with(store: Arc<MockStore>, config: SearchConfig) -> Arc<PlatformService> {
        let broker = Arc::new(SearchBroker::new(Arc::new(config)));
        let backfill = Arc::new(ChannelTypeBackfill::new(store.clone(), store, 100));
        Arc::new(PlatformService::new(broker, backfill))
    }

    #[tokio::test]
    async fn test_start_without_engines_is_noop() {
        let platform = platform_with(Arc::new(MockStore::default()), SearchConfig::default());
        assert!(platform.start_search_engine().is_empty());
        platform.stop_search_engine().await;
        assert_eq!(platform.active_engine(), "database");
    }

    #[tokio::test]
    async fn test_start_only_enabled_engines() {
        let platform = platform_with(Arc::new(MockStore::default()), SearchConfig::default());
        let cluster = Arc::new(MockEngine::new("cluster"));
        let embedded = MockEngine::enabled("embedded");
        platform.broker().register_engine(EngineKind::Cluster, cluster.clone());
        platform.broker().register_engine(EngineKind::Embedded, embedded.clone());

        for handle in platform.start_search_engine() {
            handle.await.unwrap();
        }

        assert_eq!(cluster.starts.load(Ordering::SeqCst), 0);
        assert_eq!(embedded.starts.load(Ordering::SeqCst), 1);
        // Config is pushed before start
        assert_eq!(embedded.configs.lock().len(), 1);
        assert!(embedded.is_active());
        assert_eq!(platform.active_engine(), "embedded");
    }

    #[tokio::test]
    async fn test_failed_start_is_not_an_error() {
        let platform = platform_with(Arc::new(MockStore::default()), SearchConfig::default());
        let engine = MockEngine::enabled("cluster");
        engine.fail_start.store(true, Ordering::SeqCst);
        platform.broker().register_engine(EngineKind::Cluster, engine.clone());

        for handle in platform.start_search_engine() {
            handle.await.unwrap();
        }
        assert!(!engine.is_active());
        assert_eq!(platform.active_engine(), "database");
    }

    #[tokio::test]
    async fn test_stop_only_active_engines() {
        let platform = platform_with(Arc::new(MockStore::default()), SearchConfig::default());
        let cluster = MockEngine::enabled("cluster");
        let embedded = MockEngine::active("embedded");
        platform.broker().register_engine(EngineKind::Cluster, cluster.clone());
        platform.broker().register_engine(EngineKind::Embedded, embedded.clone());

        platform.stop_search_engine().await;
        assert_eq!(cluster.stops.load(Ordering::SeqCst), 0);
        assert_eq!(embedded.stops.load(Ordering::SeqCst), 1);
        assert!(!embedded.is_active());
    }

    #[tokio::test]
    async fn test_update_config_toggles_engines() {
        let platform = platform_with(Arc::new(MockStore::default()), SearchConfig::default());
        let embedded = MockEngine::enabled("embedded");
        platform.broker().register_engine(EngineKind::Embedded, embedded.clone());

        let mut on = SearchConfig::default();
        on.embedded.enable_indexing = true;
        for handle in platform.update_config(on.clone()).await.unwrap() {
            handle.await.unwrap();
        }
        assert_eq!(embedded.starts.load(Ordering::SeqCst), 1);
        assert_eq!(embedded.configs.lock().len(), 1);

        let handles = platform.update_config(SearchConfig::default()).await.unwrap();
        assert!(handles.is_empty());
        assert_eq!(embedded.stops.load(Ordering::SeqCst), 1);
        assert_eq!(embedded.configs.lock().len(), 2);
    }

    #[tokio::test]
    async fn test_backfill_skipped_without_active_engine() {
        let store = Arc::new(MockStore::with_channels(vec![Channel::new("ch1", ChannelType::Open)]));
        let platform = platform_with(store.clone(), SearchConfig::default());
        platform.broker().register_engine(EngineKind::Embedded, MockEngine::enabled("embedded"));

        let outcome = platform.run_channel_type_backfill().await.unwrap();
        assert_eq!(outcome, BackfillOutcome::NoActiveEngine);
        assert!(store.saves.lock().is_empty());
        assert!(store.list_calls.lock().is_empty());
    }

    #[tokio::test]
    async fn test_backfill_uses_first_active_engine() {
        let store = Arc::new(MockStore::with_channels(vec![Channel::new("ch1", ChannelType::Open)]));
        let platform = platform_with(store.clone(), SearchConfig::default());
        let cluster = MockEngine::active("cluster");
        let embedded = MockEngine::active("embedded");
        platform.broker().register_engine(EngineKind::Cluster, cluster.clone());
        platform.broker().register_engine(EngineKind::Embedded, embedded.clone());

        let outcome = platform.spawn_channel_type_backfill().unwrap().await.unwrap().unwrap();
        assert_eq!(outcome, BackfillOutcome::Completed { pages: 1, channels: 1 });
        assert_eq!(cluster.backfill_calls().len(), 1);
        assert!(embedded.backfill_calls().is_empty());
        assert!(!platform.is_backfill_running());
        assert_eq!(platform.backfill_status().state, MigrationState::Completed);
    }

    #[tokio::test]
    async fn test_backfill_single_flight() {
        let store = Arc::new(MockStore::default());
        let platform = platform_with(store, SearchConfig::default());

        let _held = platform.gate.try_acquire(CHANNEL_TYPE_BACKFILL_KEY).unwrap();
        assert!(platform.is_backfill_running());
        let err = platform.run_channel_type_backfill().await.unwrap_err();
        assert!(matches!(err, MigrationError::AlreadyRunning(_)));
        assert!(!platform.cancel_backfill());
    }

    #[tokio::test]
    async fn test_spawned_backfill_holds_gate_before_returning() {
        let store = Arc::new(MockStore::with_channels(vec![Channel::new("ch1", ChannelType::Open)]));
        let platform = platform_with(store, SearchConfig::default());
        let engine = MockEngine::active("embedded");
        platform.broker().register_engine(EngineKind::Embedded, engine.clone());

        let first = platform.spawn_channel_type_backfill().unwrap();
        let second = platform.spawn_channel_type_backfill();
        assert!(matches!(second, Err(MigrationError::AlreadyRunning(_))));

        first.await.unwrap().unwrap();
        assert!(!platform.is_backfill_running());
        assert_eq!(engine.backfill_calls().len(), 1);
    }

    #[tokio::test]
    async fn test_cancel_backfill_in_flight() {
        let store = Arc::new(MockStore::with_channels(vec![
            Channel::new("ch1", ChannelType::Open),
            Channel::new("ch2", ChannelType::Private),
        ]));
        let platform = platform_with(store.clone(), SearchConfig::default());
        let engine = MockEngine::active("embedded");
        engine.hold_backfill.store(true, Ordering::SeqCst);
        platform.broker().register_engine(EngineKind::Embedded, engine.clone());

        let run = platform.spawn_channel_type_backfill().unwrap();
        while engine.backfill_calls().is_empty() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(platform.is_backfill_running());
        assert!(platform.cancel_backfill());

        let err = run.await.unwrap().unwrap_err();
        assert!(matches!(err, MigrationError::Cancelled));
        assert_eq!(engine.backfill_calls().len(), 1);
        assert!(store.saves.lock().is_empty());
        assert!(store.systems.lock().get(CHANNEL_TYPE_BACKFILL_KEY).is_none());
        assert_eq!(platform.backfill_status().state, MigrationState::Aborted);
        assert!(!platform.is_backfill_running());
        assert!(!platform.cancel_backfill());
    }

    #[tokio::test]
    async fn test_update_config_sets_backfill_page_size() {
        let store = Arc::new(MockStore::with_channels(vec![
            Channel::new("ch1", ChannelType::Open),
            Channel::new("ch2", ChannelType::Private),
        ]));
        let platform = platform_with(store.clone(), SearchConfig::default());
        platform.broker().register_engine(EngineKind::Embedded, MockEngine::active("embedded"));

        let config = SearchConfig { backfill_page_size: 1, ..Default::default() };
        platform.update_config(config).await.unwrap();

        let outcome = platform.run_channel_type_backfill().await.unwrap();
        assert_eq!(outcome, BackfillOutcome::Completed { pages: 3, channels: 2 });
        assert_eq!(*store.list_calls.lock(), vec![(0, 1), (1, 1), (2, 1)]);
    }

    #[tokio::test]
    async fn test_concurrent_config_updates_end_consistent() {
        let platform = platform_with(Arc::new(MockStore::default()), SearchConfig::default());
        let embedded = MockEngine::enabled("embedded");
        platform.broker().register_engine(EngineKind::Embedded, embedded.clone());

        let mut on = SearchConfig::default();
        on.embedded.enable_indexing = true;
        let (a, b) = tokio::join!(
            platform.update_config(on),
            platform.update_config(SearchConfig::default())
        );
        for handle in a.unwrap().into_iter().chain(b.unwrap()) {
            handle.await.unwrap();
        }

        let configs = embedded.configs.lock();
        assert_eq!(configs.len(), 2);
        assert!(Arc::ptr_eq(configs.last().unwrap(), &platform.broker().config()));
        assert!(!platform.broker().config().embedded.enable_indexing);
    }

    #[tokio::test]
    async fn test_startup_backfill_against_embedded_index() {
        let pool = crate::store::sqlite::memory_pool().await;
        run_migrations(&pool).await.unwrap();
        let store = Arc::new(SqlStore::new(pool));
        store.save_channel(&Channel::new("ch1", ChannelType::Open)).await.unwrap();
        store.save_channel(&Channel::new("ch2", ChannelType::Private)).await.unwrap();

        let mut config = SearchConfig::default();
        config.embedded.enable_indexing = true;
        let config = Arc::new(config);
        let broker = Arc::new(SearchBroker::new(config.clone()));
        let index = Arc::new(EmbeddedIndex::new("sqlite::memory:", config));
        broker.register_engine(EngineKind::Embedded, index.clone());

        let backfill = Arc::new(ChannelTypeBackfill::new(store.clone(), store.clone(), 1));
        let platform = Arc::new(PlatformService::new(broker, backfill));

        for handle in platform.start_search_engine() {
            handle.await.unwrap();
        }
        assert_eq!(platform.active_engine(), "embedded");
        index
            .index_posts(&[PostDocument::new("p1", "ch1", "hi"), PostDocument::new("p2", "ch2", "yo")])
            .await
            .unwrap();

        platform.spawn_startup_migrations().await.unwrap();

        assert_eq!(index.channel_type_of("p1").await.unwrap(), Some(ChannelType::Open));
        assert_eq!(index.channel_type_of("p2").await.unwrap(), Some(ChannelType::Private));
        let marker = store.get_by_name(CHANNEL_TYPE_BACKFILL_KEY).await.unwrap();
        assert_eq!(marker.value, "true");

        platform.stop_search_engine().await;
        assert_eq!(platform.active_engine(), "database");
    }
}
