//! 下载错误类型

use std::path::PathBuf;
use thiserror::Error;

/// 添加任务时的同步校验失败（任务不会被创建）
#[derive(Debug, Error)]
pub enum AddTaskError {
    #[error("存储设备不存在: {0:?}")]
    StorageUnavailable(PathBuf),

    #[error("存储不可写: {0:?}")]
    StorageReadOnly(PathBuf),

    #[error("任务数已达上限: {0}")]
    TooManyTasks(usize),

    #[error("任务已存在: {0}")]
    AlreadyExists(String),

    #[error("无法从 URL 解析文件名: {0}")]
    MalformedUrl(String),

    #[error("下载管理器已关闭")]
    ShutDown,
}

impl AddTaskError {
    /// 对外接口使用的错误码
    pub fn code(&self) -> i32 {
        match self {
            Self::StorageUnavailable(_) => 1001,
            Self::StorageReadOnly(_) => 1002,
            Self::TooManyTasks(_) => 1003,
            Self::AlreadyExists(_) => 1004,
            Self::MalformedUrl(_) => 1005,
            Self::ShutDown => 1006,
        }
    }
}

/// 传输过程中的失败，通过 Error 事件异步上报
#[derive(Debug, Error)]
pub enum TransferError {
    #[error("文件已存在")]
    FileExists,

    #[error("无效的下载地址: {0}")]
    InvalidUrl(String),

    #[error("存储空间不足: 需要 {required} 字节，剩余 {available} 字节")]
    OutOfStorage { required: u64, available: u64 },

    #[error("传输中断: 期望 {expected} 字节，实际 {actual} 字节")]
    InterruptedTransfer { expected: u64, actual: u64 },

    #[error("网络不可用")]
    NetworkUnavailable,

    #[error("连接停滞: {0} 秒内未收到数据")]
    Stalled(u64),

    #[error("HTTP 请求失败: {0}")]
    Http(#[from] reqwest::Error),

    #[error("文件读写失败: {0}")]
    Io(#[from] std::io::Error),
}

impl TransferError {
    /// 事件中携带的稳定错误码
    pub fn code(&self) -> &'static str {
        match self {
            Self::FileExists => "100",
            Self::InvalidUrl(_) => "101",
            Self::OutOfStorage { .. } => "102",
            Self::InterruptedTransfer { .. } => "103",
            Self::NetworkUnavailable => "104",
            Self::Stalled(_) => "105",
            Self::Http(_) => "106",
            Self::Io(_) => "107",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transfer_error_codes() {
        assert_eq!(TransferError::FileExists.code(), "100");
        assert_eq!(TransferError::InvalidUrl("x".into()).code(), "101");
        assert_eq!(
            TransferError::OutOfStorage {
                required: 10,
                available: 1
            }
            .code(),
            "102"
        );
        assert_eq!(
            TransferError::InterruptedTransfer {
                expected: 10,
                actual: 9
            }
            .code(),
            "103"
        );
        assert_eq!(TransferError::NetworkUnavailable.code(), "104");
        assert_eq!(TransferError::Stalled(60).code(), "105");
    }

    #[test]
    fn test_io_error_conversion() {
        let err: TransferError = std::io::Error::new(std::io::ErrorKind::Other, "disk").into();
        assert_eq!(err.code(), "107");
        assert!(err.to_string().contains("disk"));
    }

    #[test]
    fn test_add_task_error_message() {
        let err = AddTaskError::TooManyTasks(100);
        assert_eq!(err.to_string(), "任务数已达上限: 100");
        assert_eq!(err.code(), 1003);
    }
}
