// Background Download Manager
// 后台下载管理核心库

// 配置管理模块
pub mod config;

// 日志模块
pub mod logging;

// 系统探测（存储 / 网络）
pub mod common;

// 下载记录持久化
pub mod persistence;

// 下载事件
pub mod events;

// 下载引擎模块
pub mod downloader;

// Web服务器模块
pub mod server;

// 导出常用类型
pub use config::AppConfig;
pub use downloader::{
    AddTaskError, DownloadManager, DownloadTask, TaskInfo, TaskLocation, TransferError,
    TransferState,
};
pub use events::{DownloadEvent, EventBus};
pub use persistence::{DownloadRecord, DownloadStatus, MetadataStore};
pub use server::AppState;
