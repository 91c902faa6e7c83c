//! Search backend broker / 搜索后端代理
//!
//! Single source of truth for which engine serves search. Holds one slot per
//! `EngineKind`, fans config snapshots out to every registered engine and
//! derives the active engine label.

use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::{EngineKind, SearchEngine};
use crate::config::SearchConfig;

pub type EngineHandle = Arc<dyn SearchEngine>;

/// Label when the primary database serves search / 数据库搜索
pub const DATABASE_ENGINE: &str = "database";
/// Label when nothing serves search / 无可用搜索
pub const NO_ENGINE: &str = "none";

/// Search broker / 搜索代理
pub struct SearchBroker {
    /// Current config snapshot, swapped whole on update / 当前配置快照
    config: RwLock<Arc<SearchConfig>>,
    /// One slot per engine kind, indexed by `EngineKind::slot` / 引擎槽位
    engines: RwLock<[Option<EngineHandle>; EngineKind::COUNT]>,
    /// Serialises config writers across store and fan-out / 配置写入互斥
    update_lock: Mutex<()>,
    /// Set while more than one engine is active / 多引擎同时活跃
    multi_active: AtomicBool,
}

impl SearchBroker {
    pub fn new(config: Arc<SearchConfig>) -> Self {
        Self {
            config: RwLock::new(config),
            engines: RwLock::new(Default::default()),
            update_lock: Mutex::new(()),
            multi_active: AtomicBool::new(false),
        }
    }

    /// Register engine for a kind, replacing any previous one / 注册引擎
    pub fn register_engine(&self, kind: EngineKind, engine: EngineHandle) {
        let name = engine.name().to_string();
        let previous = self.engines.write()[kind.slot()].replace(engine);
        match previous {
            Some(old) => tracing::info!("Search engine {} replaced {} ({})", name, old.name(), kind),
            None => tracing::info!("Search engine registered: {} ({})", name, kind),
        }
    }

    /// Registered engine for a kind / 获取已注册引擎
    pub fn engine(&self, kind: EngineKind) -> Option<EngineHandle> {
        self.engines.read()[kind.slot()].clone()
    }

    /// Registered engines in precedence order / 按优先级列出已注册引擎
    pub fn registered_engines(&self) -> Vec<(EngineKind, EngineHandle)> {
        let engines = self.engines.read();
        EngineKind::ALL
            .iter()
            .filter_map(|kind| engines[kind.slot()].clone().map(|e| (*kind, e)))
            .collect()
    }

    /// Current config snapshot / 当前配置快照
    pub fn config(&self) -> Arc<SearchConfig> {
        self.config.read().clone()
    }

    /// Store the snapshot, then hand it to every registered engine / 更新配置并下发
    pub fn update_config(&self, config: Arc<SearchConfig>) -> anyhow::Result<()> {
        // Every engine ends up with the same snapshot as the broker
        let _writer = self.update_lock.lock();
        *self.config.write() = config.clone();

        // Engines are called without holding the slot lock
        for (kind, engine) in self.registered_engines() {
            tracing::debug!("Propagating search config to {} ({})", engine.name(), kind);
            engine.update_config(config.clone());
        }
        Ok(())
    }

    /// Active engines in precedence order / 按优先级列出活跃引擎
    pub fn get_active_engines(&self) -> Vec<EngineHandle> {
        self.registered_engines()
            .into_iter()
            .map(|(_, engine)| engine)
            .filter(|engine| engine.is_active())
            .collect()
    }

    /// Name of the engine serving search, or the database / none fallback
    /// 当前提供搜索的引擎名称
    pub fn active_engine(&self) -> String {
        let active = self.get_active_engines();
        if active.len() > 1 {
            if !self.multi_active.swap(true, Ordering::SeqCst) {
                let names: Vec<&str> = active.iter().map(|e| e.name()).collect();
                tracing::warn!("Multiple search engines active ({}), using {}", names.join(", "), names[0]);
            }
        } else {
            self.multi_active.store(false, Ordering::SeqCst);
        }

        if let Some(engine) = active.first() {
            return engine.name().to_string();
        }

        if self.config.read().disable_database_search {
            NO_ENGINE.to_string()
        } else {
            DATABASE_ENGINE.to_string()
        }
    }
}
