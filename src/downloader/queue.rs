//! 任务队列与准入控制
//!
//! 等待、下载中、暂停三个集合由同一把锁保护，集合间的移动对并发查询是原子的。
//! 任何通过 [`TaskQueue::lock`] 拿到的守卫在释放时都会唤醒调度循环，
//! 所以“有空位”和“有新任务”两种变化都不会丢失。

use std::collections::VecDeque;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};
use tokio::sync::Notify;

use super::task::{DownloadTask, TaskInfo, TaskLocation};

/// 三个任务集合
#[derive(Debug, Default)]
pub struct TaskCollections {
    pub queued: VecDeque<Arc<DownloadTask>>,
    pub active: Vec<Arc<DownloadTask>>,
    pub paused: Vec<Arc<DownloadTask>>,
    closed: bool,
}

impl TaskCollections {
    /// 等待 + 下载中 + 暂停
    pub fn total(&self) -> usize {
        self.queued.len() + self.active.len() + self.paused.len()
    }

    pub fn contains(&self, url: &str) -> bool {
        self.find(url).is_some()
    }

    /// 按 下载中 → 等待 → 暂停 的顺序查找
    pub fn find(&self, url: &str) -> Option<(TaskLocation, Arc<DownloadTask>)> {
        let matches = |t: &&Arc<DownloadTask>| t.url() == url;
        if let Some(task) = self.active.iter().find(matches) {
            return Some((TaskLocation::Active, task.clone()));
        }
        if let Some(task) = self.queued.iter().find(matches) {
            return Some((TaskLocation::Queued, task.clone()));
        }
        self.paused
            .iter()
            .find(matches)
            .map(|task| (TaskLocation::Paused, task.clone()))
    }

    /// 与 [`find`](Self::find) 顺序相同，只移除第一个匹配项
    pub fn take(&mut self, url: &str) -> Option<(TaskLocation, Arc<DownloadTask>)> {
        if let Some(pos) = self.active.iter().position(|t| t.url() == url) {
            return Some((TaskLocation::Active, self.active.remove(pos)));
        }
        if let Some(pos) = self.queued.iter().position(|t| t.url() == url) {
            return self
                .queued
                .remove(pos)
                .map(|task| (TaskLocation::Queued, task));
        }
        if let Some(pos) = self.paused.iter().position(|t| t.url() == url) {
            return Some((TaskLocation::Paused, self.paused.remove(pos)));
        }
        None
    }

    /// 移除指定的下载中句柄（按指针比较，不会误删同 URL 的新句柄）
    pub fn remove_active(&mut self, task: &Arc<DownloadTask>) -> bool {
        match self.active.iter().position(|t| Arc::ptr_eq(t, task)) {
            Some(pos) => {
                self.active.remove(pos);
                true
            }
            None => false,
        }
    }

    pub fn take_paused(&mut self, url: &str) -> Option<Arc<DownloadTask>> {
        let pos = self.paused.iter().position(|t| t.url() == url)?;
        Some(self.paused.remove(pos))
    }

    pub fn snapshot(&self) -> Vec<TaskInfo> {
        self.active
            .iter()
            .map(|t| t.info(TaskLocation::Active))
            .chain(self.queued.iter().map(|t| t.info(TaskLocation::Queued)))
            .chain(self.paused.iter().map(|t| t.info(TaskLocation::Paused)))
            .collect()
    }
}

/// 集合锁守卫，释放时唤醒调度循环
pub struct CollectionsGuard<'a> {
    guard: MutexGuard<'a, TaskCollections>,
    notify: &'a Notify,
}

impl Deref for CollectionsGuard<'_> {
    type Target = TaskCollections;

    fn deref(&self) -> &Self::Target {
        &self.guard
    }
}

impl DerefMut for CollectionsGuard<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.guard
    }
}

impl Drop for CollectionsGuard<'_> {
    fn drop(&mut self) {
        self.notify.notify_one();
    }
}

/// 任务队列
///
/// `poll` 只允许一个消费者（调度循环）。
#[derive(Debug)]
pub struct TaskQueue {
    collections: Mutex<TaskCollections>,
    notify: Notify,
    max_active: usize,
}

impl TaskQueue {
    pub fn new(max_active: usize) -> Self {
        Self {
            collections: Mutex::new(TaskCollections::default()),
            notify: Notify::new(),
            max_active: max_active.max(1),
        }
    }

    pub fn max_active(&self) -> usize {
        self.max_active
    }

    pub fn lock(&self) -> CollectionsGuard<'_> {
        CollectionsGuard {
            guard: self.collections.lock(),
            notify: &self.notify,
        }
    }

    /// 追加到队尾，从不阻塞
    pub fn offer(&self, task: Arc<DownloadTask>) {
        self.lock().queued.push_back(task);
    }

    /// 等到有空闲下载位且队列非空，取出队首并移入下载中集合
    ///
    /// 队列关闭后返回 None。
    pub async fn poll(&self) -> Option<Arc<DownloadTask>> {
        loop {
            {
                let mut collections = self.collections.lock();
                if collections.closed {
                    return None;
                }
                if collections.active.len() < self.max_active {
                    if let Some(task) = collections.queued.pop_front() {
                        collections.active.push(task.clone());
                        return Some(task);
                    }
                }
            }
            // notify_one 在没有等待者时会保留一个许可，解锁后到这里之间的变化不会丢
            self.notify.notified().await;
        }
    }

    pub fn size(&self) -> usize {
        self.collections.lock().queued.len()
    }

    pub fn peek_at(&self, index: usize) -> Option<Arc<DownloadTask>> {
        self.collections.lock().queued.get(index).cloned()
    }

    /// 从等待队列中移除指定句柄
    pub fn remove(&self, task: &Arc<DownloadTask>) -> bool {
        let mut collections = self.lock();
        match collections.queued.iter().position(|t| Arc::ptr_eq(t, task)) {
            Some(pos) => collections.queued.remove(pos).is_some(),
            None => false,
        }
    }

    pub fn remove_at(&self, index: usize) -> Option<Arc<DownloadTask>> {
        self.lock().queued.remove(index)
    }

    /// 关闭队列，唤醒并结束 `poll`
    pub fn close(&self) {
        self.lock().closed = true;
    }

    pub fn is_closed(&self) -> bool {
        self.collections.lock().closed
    }
}
