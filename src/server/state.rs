// 应用状态

use crate::config::AppConfig;
use crate::downloader::DownloadManager;
use std::sync::Arc;

/// 应用全局状态
#[derive(Clone)]
pub struct AppState {
    /// 下载管理器
    pub download_manager: Arc<DownloadManager>,
    /// 应用配置（启动后只读）
    pub config: Arc<AppConfig>,
}

impl AppState {
    pub fn new(download_manager: Arc<DownloadManager>, config: AppConfig) -> Self {
        Self {
            download_manager,
            config: Arc::new(config),
        }
    }

    /// 优雅关闭
    pub async fn shutdown(&self) {
        self.download_manager.shutdown().await;
    }
}
