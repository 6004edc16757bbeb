//! 公共模块
//!
//! 下载调度依赖的系统探测：存储与网络

mod network;
mod storage;

pub use network::{NetworkMonitor, SystemNetwork};
pub use storage::{StorageProbe, SystemStorage};
