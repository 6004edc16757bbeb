// 配置管理模块

pub mod path_validator;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::fs;

pub use path_validator::{PathValidationResult, PathValidator};

/// 默认配置文件路径
pub const DEFAULT_CONFIG_PATH: &str = "config/app.toml";

/// 应用配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// 服务器配置
    pub server: ServerConfig,
    /// 下载配置
    pub download: DownloadConfig,
    /// 持久化配置
    #[serde(default)]
    pub persistence: PersistenceConfig,
    /// 日志配置
    #[serde(default)]
    pub log: LogConfig,
}

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// 是否启用日志文件持久化
    #[serde(default = "default_log_enabled")]
    pub enabled: bool,
    /// 日志文件保存目录
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,
    /// 日志保留天数（默认 7 天）
    #[serde(default = "default_log_retention_days")]
    pub retention_days: u32,
    /// 日志级别（默认 info）
    #[serde(default = "default_log_level")]
    pub level: String,
    /// 单个日志文件最大大小（字节，默认 20MB）
    #[serde(default = "default_log_max_file_size")]
    pub max_file_size: u64,
}

fn default_log_enabled() -> bool {
    true
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("logs")
}

fn default_log_retention_days() -> u32 {
    7
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_max_file_size() -> u64 {
    20 * 1024 * 1024
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            enabled: default_log_enabled(),
            log_dir: default_log_dir(),
            retention_days: default_log_retention_days(),
            level: default_log_level(),
            max_file_size: default_log_max_file_size(),
        }
    }
}

/// 服务器配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// 监听地址
    pub host: String,
    /// 监听端口
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 18889,
        }
    }
}

/// 下载配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadConfig {
    /// 下载根目录（最终文件与 .download 临时文件都放在这里）
    pub download_dir: PathBuf,
    /// 任务总数上限（等待 + 下载中 + 暂停）
    #[serde(default = "default_max_tasks")]
    pub max_tasks: usize,
    /// 最大同时下载数
    #[serde(default = "default_max_active")]
    pub max_active: usize,
    /// 单次读写缓冲区大小（字节）
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
    /// 小于该大小的响应视为错误页面（字节）
    #[serde(default = "default_min_file_size")]
    pub min_file_size: u64,
    /// 读超时：连续多少秒读不到数据判定为连接停滞
    #[serde(default = "default_read_timeout_secs")]
    pub read_timeout_secs: u64,
    /// 删除下载中任务时等待传输停止的最长时间（秒）
    #[serde(default = "default_delete_wait_secs")]
    pub delete_wait_secs: u64,
    /// HTTP User-Agent
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

fn default_max_tasks() -> usize {
    100
}

fn default_max_active() -> usize {
    10
}

fn default_buffer_size() -> usize {
    8 * 1024
}

fn default_min_file_size() -> u64 {
    1024
}

fn default_read_timeout_secs() -> u64 {
    60
}

fn default_delete_wait_secs() -> u64 {
    5
}

fn default_user_agent() -> String {
    format!("bgdl/{}", env!("CARGO_PKG_VERSION"))
}

impl DownloadConfig {
    /// 使用默认参数创建指定目录的下载配置
    pub fn with_dir(download_dir: PathBuf) -> Self {
        Self {
            download_dir,
            max_tasks: default_max_tasks(),
            max_active: default_max_active(),
            buffer_size: default_buffer_size(),
            min_file_size: default_min_file_size(),
            read_timeout_secs: default_read_timeout_secs(),
            delete_wait_secs: default_delete_wait_secs(),
            user_agent: default_user_agent(),
        }
    }

    /// 校验参数组合
    pub fn validate(&self) -> Result<()> {
        if self.max_active == 0 {
            anyhow::bail!("max_active 必须大于 0");
        }
        if self.max_tasks < self.max_active {
            anyhow::bail!(
                "max_tasks ({}) 不能小于 max_active ({})",
                self.max_tasks,
                self.max_active
            );
        }
        if self.buffer_size == 0 {
            anyhow::bail!("buffer_size 必须大于 0");
        }
        Ok(())
    }

    /// 确保下载目录存在（不存在则自动创建）
    pub fn ensure_download_dir_exists(&self) -> Result<()> {
        PathValidator::ensure_directory_exists(&self.download_dir)?;
        tracing::info!("下载目录已准备就绪: {:?}", self.download_dir);
        Ok(())
    }
}

/// 持久化配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// 是否把下载记录写入 SQLite；关闭时仅保存在内存
    #[serde(default = "default_persistence_enabled")]
    pub enabled: bool,
    /// 数据库文件路径
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,
}

fn default_persistence_enabled() -> bool {
    true
}

fn default_db_path() -> PathBuf {
    PathBuf::from("data/downloads.db")
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            enabled: default_persistence_enabled(),
            db_path: default_db_path(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        let download_dir = std::env::current_dir()
            .unwrap_or_else(|_| PathBuf::from("."))
            .join("downloads");

        Self {
            server: ServerConfig::default(),
            download: DownloadConfig::with_dir(download_dir),
            persistence: PersistenceConfig::default(),
            log: LogConfig::default(),
        }
    }
}

impl AppConfig {
    /// 从文件加载配置
    pub async fn load_from_file(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path)
            .await
            .context("Failed to read config file")?;

        let config: AppConfig = toml::from_str(&content).context("Failed to parse config file")?;

        config
            .download
            .validate()
            .context("配置文件中的下载参数无效")?;

        Ok(config)
    }

    /// 保存配置到文件
    pub async fn save_to_file(&self, path: &str) -> Result<()> {
        self.download.validate().context("保存配置失败")?;

        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;

        if let Some(parent) = std::path::Path::new(path).parent() {
            fs::create_dir_all(parent)
                .await
                .context("Failed to create config directory")?;
        }

        fs::write(path, content)
            .await
            .context("Failed to write config file")?;

        tracing::info!("配置已保存: {}", path);
        Ok(())
    }

    /// 加载或创建默认配置
    pub async fn load_or_default(path: &str) -> Self {
        match Self::load_from_file(path).await {
            Ok(config) => {
                tracing::info!("配置文件加载成功: {}", path);
                config
            }
            Err(e) => {
                tracing::warn!("配置文件加载失败，使用默认配置: {:#}", e);
                let default_config = Self::default();

                // 首次启动：自动创建默认下载目录
                if let Err(e) = default_config.download.ensure_download_dir_exists() {
                    tracing::error!(
                        "无法创建默认下载目录 {:?}: {:#}",
                        default_config.download.download_dir,
                        e
                    );
                }

                if let Err(e) = default_config.save_to_file(path).await {
                    tracing::error!("保存默认配置失败: {:#}", e);
                }

                default_config
            }
        }
    }
}
