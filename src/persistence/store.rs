//! 下载记录存储接口

use anyhow::Result;

use super::types::{DownloadRecord, DownloadStatus};

/// 下载记录存储
///
/// 所有更新 / 删除操作在记录不存在时都是空操作，不返回错误。
pub trait MetadataStore: Send + Sync {
    /// 插入记录；同一 URL 已存在时保留原记录
    fn insert(&self, url: &str, name: &str, save_path: &str) -> Result<()>;

    fn update_status(&self, url: &str, status: DownloadStatus) -> Result<()>;

    fn update_current_size(&self, url: &str, size: u64) -> Result<()>;

    fn update_total_size(&self, url: &str, size: u64) -> Result<()>;

    fn delete(&self, url: &str) -> Result<()>;

    /// 查询状态，记录不存在时返回 None
    fn get_status(&self, url: &str) -> Result<Option<DownloadStatus>>;

    fn get(&self, url: &str) -> Result<Option<DownloadRecord>>;

    fn list(&self) -> Result<Vec<DownloadRecord>>;
}
