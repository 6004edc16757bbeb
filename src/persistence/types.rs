//! 下载记录类型定义

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 持久化的下载状态
///
/// 整数编码与外部展示层约定一致：0 默认 / 1 下载中 / 2 完成 / 3 暂停
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DownloadStatus {
    /// 未开始（或记录不存在）
    #[default]
    Default,
    /// 下载中
    Downloading,
    /// 下载完成
    Complete,
    /// 已暂停（包括出错后可恢复的状态）
    Paused,
}

impl DownloadStatus {
    pub fn code(&self) -> i64 {
        match self {
            Self::Default => 0,
            Self::Downloading => 1,
            Self::Complete => 2,
            Self::Paused => 3,
        }
    }

    /// 未知编码按默认状态处理
    pub fn from_code(code: i64) -> Self {
        match code {
            1 => Self::Downloading,
            2 => Self::Complete,
            3 => Self::Paused,
            _ => Self::Default,
        }
    }
}

impl std::fmt::Display for DownloadStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Default => write!(f, "default"),
            Self::Downloading => write!(f, "downloading"),
            Self::Complete => write!(f, "complete"),
            Self::Paused => write!(f, "paused"),
        }
    }
}

/// 一条下载记录（以 URL 为主键）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadRecord {
    pub url: String,
    /// 展示名称（URL 最后一段路径）
    pub name: String,
    /// 保存目录
    pub save_path: String,
    pub status: DownloadStatus,
    /// 服务器声明的文件总大小
    pub total_size: u64,
    /// 已下载大小（含之前的断点）
    pub current_size: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DownloadRecord {
    pub fn new(url: &str, name: &str, save_path: &str) -> Self {
        let now = Utc::now();
        Self {
            url: url.to_string(),
            name: name.to_string(),
            save_path: save_path.to_string(),
            status: DownloadStatus::Default,
            total_size: 0,
            current_size: 0,
            created_at: now,
            updated_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        for status in [
            DownloadStatus::Default,
            DownloadStatus::Downloading,
            DownloadStatus::Complete,
            DownloadStatus::Paused,
        ] {
            assert_eq!(DownloadStatus::from_code(status.code()), status);
        }
        assert_eq!(DownloadStatus::from_code(42), DownloadStatus::Default);
    }

    #[test]
    fn test_status_serde() {
        let json = serde_json::to_string(&DownloadStatus::Downloading).unwrap();
        assert_eq!(json, "\"downloading\"");
    }
}
