//! 下载记录持久化模块
//!
//! 每个 URL 一条记录：名称、保存目录、状态、总大小、已下载大小。
//! - `store.rs`: 存储接口
//! - `sqlite.rs`: SQLite 实现（默认）
//! - `memory.rs`: 内存实现（关闭持久化 / 测试）

mod memory;
mod sqlite;
mod store;
mod types;

pub use memory::MemoryMetadataStore;
pub use sqlite::SqliteMetadataStore;
pub use store::MetadataStore;
pub use types::{DownloadRecord, DownloadStatus};

use crate::config::PersistenceConfig;
use anyhow::{Context, Result};
use std::sync::Arc;

/// 按配置创建存储
pub fn open_store(config: &PersistenceConfig) -> Result<Arc<dyn MetadataStore>> {
    if config.enabled {
        let store = SqliteMetadataStore::open(&config.db_path)
            .with_context(|| format!("打开下载记录数据库失败: {:?}", config.db_path))?;
        Ok(Arc::new(store))
    } else {
        tracing::info!("持久化已关闭，下载记录仅保存在内存");
        Ok(Arc::new(MemoryMetadataStore::new()))
    }
}
