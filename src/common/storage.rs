//! 存储探测
//!
//! 添加任务前检查存储是否挂载、是否可写；传输开始前检查剩余空间。

use crate::config::PathValidator;
use std::path::{Path, PathBuf};
use sysinfo::Disks;

/// 存储探测接口
pub trait StorageProbe: Send + Sync {
    /// 下载目录所在存储是否存在
    fn is_present(&self, dir: &Path) -> bool;

    /// 下载目录是否可写
    fn is_writable(&self, dir: &Path) -> bool;

    /// 下载目录所在卷的剩余空间（字节），无法确定时返回 None
    fn available_space(&self, dir: &Path) -> Option<u64>;
}

/// 基于本机文件系统的实现
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemStorage;

impl StorageProbe for SystemStorage {
    fn is_present(&self, dir: &Path) -> bool {
        dir.is_dir()
    }

    fn is_writable(&self, dir: &Path) -> bool {
        PathValidator::check_writable(dir)
    }

    fn available_space(&self, dir: &Path) -> Option<u64> {
        let target = nearest_existing(dir);
        let target = std::fs::canonicalize(&target).unwrap_or(target);
        let disks = Disks::new_with_refreshed_list();

        // 取挂载点最长的匹配项
        disks
            .list()
            .iter()
            .filter(|disk| target.starts_with(disk.mount_point()))
            .max_by_key(|disk| disk.mount_point().as_os_str().len())
            .map(|disk| disk.available_space())
    }
}

fn nearest_existing(path: &Path) -> PathBuf {
    let mut candidate = path.to_path_buf();
    while !candidate.exists() {
        if !candidate.pop() {
            return PathBuf::from(".");
        }
    }
    candidate
}
