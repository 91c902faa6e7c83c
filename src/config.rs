//! Application configuration module / 应用配置模块
//!
//! Manages application configuration loaded from config.json
//! Creates default config file on first run / 首次运行时创建默认配置文件
//!
//! The `search` section is handed to search engines as an immutable
//! `Arc<SearchConfig>` snapshot; a config change swaps the whole snapshot.

use once_cell::sync::OnceCell;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Global configuration instance / 全局配置实例
static CONFIG: OnceCell<Arc<RwLock<AppConfig>>> = OnceCell::new();

/// Default page size for the channel-type backfill / 回填分页大小
pub const DEFAULT_BACKFILL_PAGE_SIZE: i64 = 10_000;

/// Application configuration / 应用配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Server configuration / 服务器配置
    #[serde(default)]
    pub server: ServerConfig,
    /// Database configuration / 数据库配置
    #[serde(default)]
    pub database: DatabaseConfig,
    /// Search configuration / 搜索配置
    #[serde(default)]
    pub search: SearchConfig,
}

/// Server configuration / 服务器配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Server host address / 服务器监听地址
    pub host: String,
    /// Server port / 服务器端口
    pub port: u16,
}

/// Database configuration / 数据库配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Data directory path / 数据目录路径
    pub data_dir: String,
    /// Main database file path (relative to data_dir) / 主数据库文件路径
    pub db_file: String,
}

/// Search configuration snapshot / 搜索配置快照
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Turn off the primary store's own search fallback / 禁用数据库搜索
    #[serde(default)]
    pub disable_database_search: bool,
    /// Remote cluster engine / 集群搜索引擎
    #[serde(default)]
    pub cluster: BackendSettings,
    /// Embedded on-disk engine / 内嵌搜索引擎
    #[serde(default)]
    pub embedded: EmbeddedSettings,
    /// Upper bound for a background engine start / 引擎启动超时（秒）
    #[serde(default = "default_start_timeout")]
    pub start_timeout_secs: u64,
    /// Channels read per backfill page / 回填每页频道数
    #[serde(default = "default_page_size")]
    pub backfill_page_size: i64,
}

/// Per-backend switches / 单个后端配置
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BackendSettings {
    /// Operator turned this backend on / 启用索引
    #[serde(default)]
    pub enable_indexing: bool,
}

/// Embedded engine settings / 内嵌引擎配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddedSettings {
    #[serde(default)]
    pub enable_indexing: bool,
    /// Index directory (relative to data_dir) / 索引目录
    #[serde(default = "default_index_dir")]
    pub index_dir: String,
    /// Index file name / 索引文件名
    #[serde(default = "default_index_file")]
    pub index_file: String,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_start_timeout() -> u64 {
    30
}

fn default_page_size() -> i64 {
    DEFAULT_BACKFILL_PAGE_SIZE
}

fn default_request_timeout() -> u64 {
    10
}

fn default_index_dir() -> String {
    "search".to_string()
}

fn default_index_file() -> String {
    "posts.db".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8065,
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            data_dir: "data".to_string(),
            db_file: "postsearch.db".to_string(),
        }
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            disable_database_search: false,
            cluster: BackendSettings::default(),
            embedded: EmbeddedSettings::default(),
            start_timeout_secs: default_start_timeout(),
            backfill_page_size: default_page_size(),
        }
    }
}

impl Default for EmbeddedSettings {
    fn default() -> Self {
        Self {
            enable_indexing: false,
            index_dir: default_index_dir(),
            index_file: default_index_file(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

impl EmbeddedSettings {
    pub fn request_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.request_timeout_secs.max(1))
    }
}

impl SearchConfig {
    pub fn start_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.start_timeout_secs.max(1))
    }

    /// Page size clamped to at least one row / 分页大小（至少为1）
    pub fn page_size(&self) -> i64 {
        self.backfill_page_size.max(1)
    }
}

impl AppConfig {
    /// Get the full database URL / 获取完整的数据库URL
    pub fn get_database_url(&self) -> String {
        let db_path = Path::new(&self.database.data_dir).join(&self.database.db_file);
        format!("sqlite:{}?mode=rwc", db_path.to_string_lossy())
    }

    /// Get the full data directory path / 获取完整的数据目录路径
    pub fn get_data_dir(&self) -> PathBuf {
        PathBuf::from(&self.database.data_dir)
    }

    /// Get the embedded index database path / 获取内嵌索引数据库路径
    pub fn get_search_index_path(&self) -> PathBuf {
        let data_dir = self.get_data_dir();
        let embedded = &self.search.embedded;
        if embedded.index_dir.is_empty() {
            data_dir.join(&embedded.index_file)
        } else {
            data_dir.join(&embedded.index_dir).join(&embedded.index_file)
        }
    }

    /// Get the server bind address / 获取服务器绑定地址
    pub fn get_bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

/// Get the config file path / 获取配置文件路径
fn get_config_path() -> PathBuf {
    std::env::current_dir()
        .unwrap_or_else(|_| PathBuf::from("."))
        .join("config.json")
}

/// Parse configuration text / 解析配置内容
pub fn parse_config(content: &str) -> Result<AppConfig, String> {
    serde_json::from_str(content).map_err(|e| format!("Failed to parse config file: {}", e))
}

/// Load configuration from file, or create default if not exists / 加载配置文件，不存在则创建默认配置
pub fn load_config() -> Result<AppConfig, String> {
    let config_path = get_config_path();

    if config_path.exists() {
        let content = std::fs::read_to_string(&config_path)
            .map_err(|e| format!("Failed to read config file: {}", e))?;

        let config = parse_config(&content)?;

        tracing::info!("Loaded configuration from {:?}", config_path);
        Ok(config)
    } else {
        let config = AppConfig::default();
        save_config(&config)?;
        tracing::info!("Created default configuration at {:?}", config_path);
        Ok(config)
    }
}

/// Save configuration to file / 保存配置到文件
pub fn save_config(config: &AppConfig) -> Result<(), String> {
    save_config_at(&get_config_path(), config)
}

fn save_config_at(config_path: &Path, config: &AppConfig) -> Result<(), String> {
    let content = serde_json::to_string_pretty(config)
        .map_err(|e| format!("Failed to serialize config: {}", e))?;

    std::fs::write(config_path, content)
        .map_err(|e| format!("Failed to write config file: {}", e))?;

    Ok(())
}

/// Initialize global configuration / 初始化全局配置
pub fn init_config() -> Result<Arc<RwLock<AppConfig>>, String> {
    let config = load_config()?;

    let config_arc = Arc::new(RwLock::new(config));

    CONFIG
        .set(config_arc.clone())
        .map_err(|_| "Config already initialized".to_string())?;

    Ok(config_arc)
}

/// Get global configuration instance / 获取全局配置实例
pub fn get_config() -> Arc<RwLock<AppConfig>> {
    CONFIG
        .get_or_init(|| {
            let config = load_config().unwrap_or_default();
            Arc::new(RwLock::new(config))
        })
        .clone()
}

/// Replace the search section and persist it / 替换搜索配置并保存
pub fn update_search_config(search: SearchConfig) -> Result<AppConfig, String> {
    replace_search_config(&get_config(), search, &get_config_path())
}

/// The in-memory config only changes once the file is written / 写入成功后才替换内存配置
fn replace_search_config(
    global: &RwLock<AppConfig>,
    search: SearchConfig,
    config_path: &Path,
) -> Result<AppConfig, String> {
    let mut guard = global.write();
    let mut updated = guard.clone();
    updated.search = search;
    save_config_at(config_path, &updated)?;
    *guard = updated.clone();
    Ok(updated)
}
