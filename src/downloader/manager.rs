//! 下载调度器
//!
//! 持有等待 / 下载中 / 暂停三个集合，负责准入校验、调度循环以及暂停、继续、删除的状态迁移。
//! 调度循环是唯一启动传输的地方。

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::engine::{TransferEngine, TransferOutcome};
use super::error::AddTaskError;
use super::queue::TaskQueue;
use super::task::{DownloadTask, TaskInfo, TaskLocation, STAGING_SUFFIX};
use crate::common::{NetworkMonitor, StorageProbe, SystemNetwork, SystemStorage};
use crate::config::DownloadConfig;
use crate::events::{DownloadEvent, EventBus};
use crate::persistence::{DownloadRecord, DownloadStatus, MetadataStore};

/// 下载管理器
///
/// 由调用方显式创建并持有，退出前调用 [`DownloadManager::shutdown`]。
pub struct DownloadManager {
    config: Arc<DownloadConfig>,
    queue: Arc<TaskQueue>,
    engine: TransferEngine,
    store: Arc<dyn MetadataStore>,
    events: EventBus,
    storage: Arc<dyn StorageProbe>,
    /// 调度循环句柄（重复启动是空操作）
    dispatcher: Mutex<Option<JoinHandle<()>>>,
    shutdown_token: CancellationToken,
    closed: AtomicBool,
}

impl DownloadManager {
    /// 使用本机存储与网络探测创建
    pub fn new(
        config: DownloadConfig,
        store: Arc<dyn MetadataStore>,
        events: EventBus,
    ) -> Result<Self> {
        Self::with_probes(
            config,
            store,
            events,
            Arc::new(SystemStorage),
            Arc::new(SystemNetwork),
        )
    }

    pub fn with_probes(
        config: DownloadConfig,
        store: Arc<dyn MetadataStore>,
        events: EventBus,
        storage: Arc<dyn StorageProbe>,
        network: Arc<dyn NetworkMonitor>,
    ) -> Result<Self> {
        config.validate().context("下载配置无效")?;
        let config = Arc::new(config);

        let engine = TransferEngine::new(
            config.clone(),
            store.clone(),
            events.clone(),
            storage.clone(),
            network,
        )
        .context("创建传输引擎失败")?;

        info!(
            "创建下载管理器: 下载目录={:?}, 最大任务数={}, 最大同时下载数={}",
            config.download_dir, config.max_tasks, config.max_active
        );

        Ok(Self {
            queue: Arc::new(TaskQueue::new(config.max_active)),
            config,
            engine,
            store,
            events,
            storage,
            dispatcher: Mutex::new(None),
            shutdown_token: CancellationToken::new(),
            closed: AtomicBool::new(false),
        })
    }

    pub fn config(&self) -> &DownloadConfig {
        &self.config
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// 添加下载任务
    ///
    /// 依次校验：存储存在 → 存储可写 → 任务数上限 → URL 未重复 → URL 可解析出文件名。
    /// 任一失败都不会创建任务。
    pub async fn add_task(&self, url: &str) -> Result<(), AddTaskError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(AddTaskError::ShutDown);
        }

        let dir = &self.config.download_dir;
        if !self.storage.is_present(dir) {
            warn!("添加任务失败，存储不存在: {:?}", dir);
            return Err(AddTaskError::StorageUnavailable(dir.clone()));
        }
        if !self.storage.is_writable(dir) {
            warn!("添加任务失败，存储不可写: {:?}", dir);
            return Err(AddTaskError::StorageReadOnly(dir.clone()));
        }

        {
            let mut collections = self.queue.lock();
            if collections.total() >= self.config.max_tasks {
                warn!(
                    "添加任务失败，任务数已达上限 {}: {}",
                    self.config.max_tasks, url
                );
                return Err(AddTaskError::TooManyTasks(self.config.max_tasks));
            }
            if collections.contains(url) {
                return Err(AddTaskError::AlreadyExists(url.to_string()));
            }

            let task = DownloadTask::new(url, dir)?;
            self.persist(url, |s| s.insert(url, task.name(), &dir.to_string_lossy()));
            self.events.publish(DownloadEvent::Wait {
                url: url.to_string(),
            });
            collections.queued.push_back(Arc::new(task));
        }

        info!("任务已加入等待队列: {}", url);
        self.start();
        Ok(())
    }

    /// 暂停任务
    ///
    /// 下载中的任务：发出停止信号并换成新的空闲句柄放入暂停集合。
    /// 等待中的任务：直接移入暂停集合。找不到或已在完成收尾时返回 false。
    pub async fn pause_task(&self, url: &str) -> bool {
        let mut collections = self.queue.lock();

        if let Some(pos) = collections.active.iter().position(|t| t.url() == url) {
            // 已进入完成收尾的任务交给调度器正常结束
            if !collections.active[pos].stop() {
                debug!("任务已完成，忽略暂停: {}", url);
                return false;
            }
            let task = collections.active.remove(pos);
            self.persist(url, |s| s.update_status(url, DownloadStatus::Paused));
            collections.paused.push(Arc::new(task.successor()));
            info!("任务已暂停: {} ({}%)", url, task.percent());
            return true;
        }

        if let Some(pos) = collections.queued.iter().position(|t| t.url() == url) {
            if let Some(task) = collections.queued.remove(pos) {
                self.persist(url, |s| s.update_status(url, DownloadStatus::Paused));
                collections.paused.push(task);
                info!("等待中的任务已暂停: {}", url);
                return true;
            }
        }

        debug!("暂停任务时未找到: {}", url);
        false
    }

    /// 继续已暂停的任务，重新进入等待队列
    pub async fn continue_task(&self, url: &str) -> bool {
        if self.closed.load(Ordering::SeqCst) {
            return false;
        }

        {
            let mut collections = self.queue.lock();
            let Some(task) = collections.take_paused(url) else {
                debug!("继续任务时未找到暂停的任务: {}", url);
                return false;
            };
            self.events.publish(DownloadEvent::Wait {
                url: url.to_string(),
            });
            collections.queued.push_back(task);
        }

        info!("任务已继续: {}", url);
        self.start();
        true
    }

    /// 删除任务
    ///
    /// 按 下载中 → 等待 → 暂停 的顺序查找，只处理第一个匹配项；
    /// 不在任何集合中但存在下载记录时（例如已完成）同样清理。
    /// 文件、记录都不存在时返回 false。
    pub async fn delete_task(&self, url: &str) -> bool {
        let found = self.queue.lock().take(url);

        let (staging_path, file_path) = match found {
            Some((location, task)) => {
                task.mark_deleted();
                task.stop();
                let wait = Duration::from_secs(self.config.delete_wait_secs);
                if !task.wait_idle_timeout(wait).await {
                    warn!("等待传输停止超时，继续删除: {}", url);
                }
                info!("删除任务: {} (位于 {:?})", url, location);
                (
                    task.staging_path().to_path_buf(),
                    task.file_path().to_path_buf(),
                )
            }
            None => match self.store.get(url) {
                Ok(Some(record)) => {
                    info!("删除任务（仅存在下载记录）: {}", url);
                    record_paths(&record)
                }
                Ok(None) => {
                    debug!("删除任务时未找到任务或记录: {}", url);
                    return false;
                }
                Err(e) => {
                    warn!("读取下载记录失败: {}, 错误: {:#}", url, e);
                    return false;
                }
            },
        };

        remove_if_exists(&staging_path).await;
        remove_if_exists(&file_path).await;
        self.persist(url, |s| s.delete(url));
        self.events.publish(DownloadEvent::Delete {
            url: url.to_string(),
        });
        true
    }

    /// 查询持久化状态，记录不存在时为 Default
    pub async fn get_status(&self, url: &str) -> DownloadStatus {
        match self.store.get_status(url) {
            Ok(status) => status.unwrap_or_default(),
            Err(e) => {
                warn!("查询下载状态失败: {}, 错误: {:#}", url, e);
                DownloadStatus::Default
            }
        }
    }

    pub fn get_record(&self, url: &str) -> Option<DownloadRecord> {
        match self.store.get(url) {
            Ok(record) => record,
            Err(e) => {
                warn!("查询下载记录失败: {}, 错误: {:#}", url, e);
                None
            }
        }
    }

    pub fn list_records(&self) -> Vec<DownloadRecord> {
        self.store.list().unwrap_or_else(|e| {
            warn!("列出下载记录失败: {:#}", e);
            Vec::new()
        })
    }

    /// 把上次运行留下的未完成记录恢复为暂停任务，返回恢复数量
    pub fn restore_unfinished(&self) -> usize {
        let records = self.list_records();
        let mut collections = self.queue.lock();
        let mut restored = 0;

        for record in records {
            if record.status == DownloadStatus::Complete || collections.contains(&record.url) {
                continue;
            }
            if collections.total() >= self.config.max_tasks {
                warn!("恢复任务时已达任务数上限，剩余记录保持不变");
                break;
            }
            let save_dir = if record.save_path.is_empty() {
                self.config.download_dir.clone()
            } else {
                PathBuf::from(&record.save_path)
            };
            match DownloadTask::new(&record.url, &save_dir) {
                Ok(task) => {
                    task.restore_progress(record.total_size, record.current_size);
                    self.persist(&record.url, |s| {
                        s.update_status(&record.url, DownloadStatus::Paused)
                    });
                    collections.paused.push(Arc::new(task));
                    restored += 1;
                }
                Err(e) => warn!("跳过无法恢复的记录: {}, 错误: {}", record.url, e),
            }
        }

        if restored > 0 {
            info!("已恢复 {} 个未完成任务（暂停状态）", restored);
        }
        restored
    }

    pub fn queued_count(&self) -> usize {
        self.queue.lock().queued.len()
    }

    pub fn active_count(&self) -> usize {
        self.queue.lock().active.len()
    }

    pub fn paused_count(&self) -> usize {
        self.queue.lock().paused.len()
    }

    /// 等待 + 下载中 + 暂停
    pub fn total_task_count(&self) -> usize {
        self.queue.lock().total()
    }

    pub fn find_task(&self, url: &str) -> Option<(TaskLocation, Arc<DownloadTask>)> {
        self.queue.lock().find(url)
    }

    pub fn snapshot(&self) -> Vec<TaskInfo> {
        self.queue.lock().snapshot()
    }

    /// 启动调度循环（已在运行时为空操作）
    pub fn start(&self) {
        if self.closed.load(Ordering::SeqCst) {
            return;
        }

        let mut dispatcher = self.dispatcher.lock();
        if dispatcher.as_ref().is_some_and(|h| !h.is_finished()) {
            return;
        }

        let queue = self.queue.clone();
        let engine = self.engine.clone();
        let events = self.events.clone();
        let shutdown = self.shutdown_token.clone();
        *dispatcher = Some(tokio::spawn(dispatch_loop(queue, engine, events, shutdown)));
        info!("调度循环已启动");
    }

    /// 关闭：关闭队列、结束调度循环、停止所有传输（状态保存为暂停）
    ///
    /// 可重复调用。
    pub async fn shutdown(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("正在关闭下载管理器...");

        self.shutdown_token.cancel();
        self.queue.close();

        let active: Vec<_> = self.queue.lock().active.clone();
        for task in &active {
            task.stop();
        }

        let dispatcher = self.dispatcher.lock().take();
        if let Some(handle) = dispatcher {
            if let Err(e) = handle.await {
                error!("调度循环异常退出: {}", e);
            }
        }

        let wait = Duration::from_secs(self.config.delete_wait_secs);
        for task in active {
            if !task.wait_idle_timeout(wait).await {
                warn!("等待传输停止超时: {}", task.url());
            }
        }

        info!("下载管理器已关闭");
    }

    /// 存储失败只记录日志
    fn persist<F>(&self, url: &str, f: F)
    where
        F: FnOnce(&dyn MetadataStore) -> Result<()>,
    {
        if let Err(e) = f(self.store.as_ref()) {
            warn!("更新下载记录失败: {}, 错误: {:#}", url, e);
        }
    }
}

impl Drop for DownloadManager {
    fn drop(&mut self) {
        // 未调用 shutdown 时也要让调度循环退出
        self.shutdown_token.cancel();
        self.queue.close();
    }
}

/// 调度循环：取出任务并异步启动传输
async fn dispatch_loop(
    queue: Arc<TaskQueue>,
    engine: TransferEngine,
    events: EventBus,
    shutdown: CancellationToken,
) {
    loop {
        let task = tokio::select! {
            _ = shutdown.cancelled() => break,
            task = queue.poll() => match task {
                Some(task) => task,
                None => break,
            },
        };

        debug!("调度任务: {}", task.url());
        let queue = queue.clone();
        let engine = engine.clone();
        let events = events.clone();
        tokio::spawn(async move {
            let outcome = engine.execute(&task).await;
            on_transfer_finished(&queue, &events, &task, outcome);
        });
    }
    info!("调度循环已退出");
}

/// 传输结束后整理集合并发出事件
///
/// 失败的任务以新句柄放入暂停集合，可以继续；被删除的任务不再发事件。
fn on_transfer_finished(
    queue: &TaskQueue,
    events: &EventBus,
    task: &Arc<DownloadTask>,
    outcome: TransferOutcome,
) {
    let mut collections = queue.lock();
    let was_active = collections.remove_active(task);

    if task.is_deleted() {
        return;
    }

    let url = task.url().to_string();
    match outcome {
        TransferOutcome::Completed => events.publish(DownloadEvent::Complete { url }),
        TransferOutcome::Stopped => events.publish(DownloadEvent::Error {
            url,
            code: None,
            message: None,
        }),
        TransferOutcome::Failed(e) => {
            if was_active {
                collections.paused.push(Arc::new(task.successor()));
            }
            events.publish(DownloadEvent::Error {
                url,
                code: Some(e.code().to_string()),
                message: Some(e.to_string()),
            });
        }
    }
}

fn record_paths(record: &DownloadRecord) -> (PathBuf, PathBuf) {
    let dir = Path::new(&record.save_path);
    (
        dir.join(format!("{}{}", record.name, STAGING_SUFFIX)),
        dir.join(&record.name),
    )
}

async fn remove_if_exists(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => info!("已删除文件: {:?}", path),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("删除文件失败: {:?}, 错误: {}", path, e),
    }
}
