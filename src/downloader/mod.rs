//! 下载模块
//!
//! - `task.rs`: 任务句柄（进度、停止信号、传输状态）
//! - `queue.rs`: 三个任务集合与准入控制
//! - `engine.rs`: 断点续传引擎
//! - `manager.rs`: 调度器

pub mod engine;
pub mod error;
pub mod manager;
pub mod queue;
pub mod task;

#[cfg(test)]
pub(crate) mod testing;

pub use engine::{TransferEngine, TransferOutcome};
pub use error::{AddTaskError, TransferError};
pub use manager::DownloadManager;
pub use queue::{CollectionsGuard, TaskCollections, TaskQueue};
pub use task::{
    file_name_from_url, percent_of, speed_of, DownloadTask, TaskInfo, TaskLocation,
    TransferState, STAGING_SUFFIX,
};
