//! 内存实现（关闭持久化时使用，也用于测试）

use anyhow::Result;
use chrono::Utc;
use dashmap::DashMap;

use super::store::MetadataStore;
use super::types::{DownloadRecord, DownloadStatus};

#[derive(Debug, Default)]
pub struct MemoryMetadataStore {
    records: DashMap<String, DownloadRecord>,
}

impl MemoryMetadataStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn modify(&self, url: &str, f: impl FnOnce(&mut DownloadRecord)) {
        if let Some(mut record) = self.records.get_mut(url) {
            f(&mut record);
            record.updated_at = Utc::now();
        }
    }
}

impl MetadataStore for MemoryMetadataStore {
    fn insert(&self, url: &str, name: &str, save_path: &str) -> Result<()> {
        self.records
            .entry(url.to_string())
            .or_insert_with(|| DownloadRecord::new(url, name, save_path));
        Ok(())
    }

    fn update_status(&self, url: &str, status: DownloadStatus) -> Result<()> {
        self.modify(url, |r| r.status = status);
        Ok(())
    }

    fn update_current_size(&self, url: &str, size: u64) -> Result<()> {
        self.modify(url, |r| r.current_size = size);
        Ok(())
    }

    fn update_total_size(&self, url: &str, size: u64) -> Result<()> {
        self.modify(url, |r| r.total_size = size);
        Ok(())
    }

    fn delete(&self, url: &str) -> Result<()> {
        self.records.remove(url);
        Ok(())
    }

    fn get_status(&self, url: &str) -> Result<Option<DownloadStatus>> {
        Ok(self.records.get(url).map(|r| r.status))
    }

    fn get(&self, url: &str) -> Result<Option<DownloadRecord>> {
        Ok(self.records.get(url).map(|r| r.clone()))
    }

    fn list(&self) -> Result<Vec<DownloadRecord>> {
        let mut records: Vec<_> = self.records.iter().map(|r| r.value().clone()).collect();
        records.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(records)
    }
}
