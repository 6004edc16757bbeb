//! 下载事件类型定义

use serde::{Deserialize, Serialize};

/// 下载任务事件
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum DownloadEvent {
    /// 已加入队列，等待下载
    Wait { url: String },
    /// 进度更新（仅在百分比变化时发送）
    Progress {
        url: String,
        percent: u64,
        downloaded_size: u64,
        total_size: u64,
        /// 字节/秒
        speed: u64,
    },
    /// 下载完成
    Complete { url: String },
    /// 下载出错或被暂停
    ///
    /// 暂停时 code 与 message 都为空，用来区分“主动停止”和“真正失败”
    Error {
        url: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        code: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    /// 任务已删除
    Delete { url: String },
}

impl DownloadEvent {
    pub fn url(&self) -> &str {
        match self {
            Self::Wait { url }
            | Self::Progress { url, .. }
            | Self::Complete { url }
            | Self::Error { url, .. }
            | Self::Delete { url } => url,
        }
    }

    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Wait { .. } => "wait",
            Self::Progress { .. } => "progress",
            Self::Complete { .. } => "complete",
            Self::Error { .. } => "error",
            Self::Delete { .. } => "delete",
        }
    }

    /// 主动停止（暂停）产生的错误事件
    pub fn is_stopped(&self) -> bool {
        matches!(
            self,
            Self::Error {
                code: None,
                message: None,
                ..
            }
        )
    }
}
