//! 下载任务句柄
//!
//! 一个 URL 对应一个句柄。句柄停止后不可重启：暂停时由 [`DownloadTask::successor`]
//! 生成新的空闲句柄，继承磁盘上的临时文件与持久化记录。

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use super::error::AddTaskError;

/// 临时文件后缀
pub const STAGING_SUFFIX: &str = ".download";

/// 传输状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferState {
    Created,
    Running,
    Completed,
    Errored,
    Stopped,
}

impl TransferState {
    pub fn is_finished(&self) -> bool {
        matches!(self, Self::Completed | Self::Errored | Self::Stopped)
    }
}

/// 任务所在集合
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskLocation {
    Queued,
    Active,
    Paused,
}

/// 任务摘要（对外展示）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskInfo {
    pub url: String,
    pub name: String,
    pub location: TaskLocation,
    pub state: TransferState,
    pub percent: u64,
    pub downloaded_size: u64,
    pub total_size: u64,
    /// 字节/秒
    pub speed: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// 下载任务
#[derive(Debug)]
pub struct DownloadTask {
    url: String,
    name: String,
    file_path: PathBuf,
    staging_path: PathBuf,

    total_size: AtomicU64,
    /// 之前已下载的字节（断点）
    previous_size: AtomicU64,
    /// 本次运行传输的字节
    transferred_size: AtomicU64,
    percent: AtomicU64,
    speed: AtomicU64,
    started_at: Mutex<Option<Instant>>,
    last_error: Mutex<Option<String>>,

    cancel: CancellationToken,
    /// 已提交完成（开始重命名）后停止信号不再生效；与 stop 互斥
    committed: Mutex<bool>,
    deleted: AtomicBool,
    state: watch::Sender<TransferState>,
    /// 被暂停的前一个句柄，开始传输前需等它结束
    predecessor: Option<watch::Receiver<TransferState>>,
}

impl DownloadTask {
    /// 创建任务，文件名取自 URL 最后一段路径
    pub fn new(url: &str, download_dir: &Path) -> Result<Self, AddTaskError> {
        let name = file_name_from_url(url)?;
        Ok(Self::with_paths(
            url.to_string(),
            name.clone(),
            download_dir.join(&name),
            download_dir.join(format!("{}{}", name, STAGING_SUFFIX)),
            None,
        ))
    }

    fn with_paths(
        url: String,
        name: String,
        file_path: PathBuf,
        staging_path: PathBuf,
        predecessor: Option<watch::Receiver<TransferState>>,
    ) -> Self {
        let (state, _) = watch::channel(TransferState::Created);
        Self {
            url,
            name,
            file_path,
            staging_path,
            total_size: AtomicU64::new(0),
            previous_size: AtomicU64::new(0),
            transferred_size: AtomicU64::new(0),
            percent: AtomicU64::new(0),
            speed: AtomicU64::new(0),
            started_at: Mutex::new(None),
            last_error: Mutex::new(None),
            cancel: CancellationToken::new(),
            committed: Mutex::new(false),
            deleted: AtomicBool::new(false),
            state,
            predecessor,
        }
    }

    /// 生成同一 URL 的新句柄
    ///
    /// 新句柄保留总大小与进度用于展示，真正的断点在下次执行时从临时文件重新计算。
    pub fn successor(&self) -> Self {
        let next = Self::with_paths(
            self.url.clone(),
            self.name.clone(),
            self.file_path.clone(),
            self.staging_path.clone(),
            Some(self.state.subscribe()),
        );
        next.restore_progress(self.total_size(), self.downloaded_size());
        *next.last_error.lock() = self.last_error();
        next
    }

    /// 用已知的总大小与已下载大小初始化展示用的进度
    pub(crate) fn restore_progress(&self, total_size: u64, downloaded: u64) {
        self.total_size.store(total_size, Ordering::Relaxed);
        self.previous_size.store(downloaded, Ordering::Relaxed);
        self.percent
            .store(percent_of(downloaded, total_size), Ordering::Relaxed);
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn file_path(&self) -> &Path {
        &self.file_path
    }

    pub fn staging_path(&self) -> &Path {
        &self.staging_path
    }

    pub fn total_size(&self) -> u64 {
        self.total_size.load(Ordering::Relaxed)
    }

    pub fn previous_size(&self) -> u64 {
        self.previous_size.load(Ordering::Relaxed)
    }

    pub fn transferred_size(&self) -> u64 {
        self.transferred_size.load(Ordering::Relaxed)
    }

    /// 已下载 = 本次传输 + 之前的断点
    pub fn downloaded_size(&self) -> u64 {
        self.transferred_size() + self.previous_size()
    }

    pub fn percent(&self) -> u64 {
        self.percent.load(Ordering::Relaxed)
    }

    /// 字节/秒
    pub fn speed(&self) -> u64 {
        self.speed.load(Ordering::Relaxed)
    }

    pub fn last_error(&self) -> Option<String> {
        self.last_error.lock().clone()
    }

    pub fn state(&self) -> TransferState {
        *self.state.borrow()
    }

    pub(crate) fn set_state(&self, state: TransferState) {
        self.state.send_replace(state);
    }

    pub(crate) fn set_last_error(&self, message: String) {
        *self.last_error.lock() = Some(message);
    }

    /// 开始一次传输：重置本次计数
    pub(crate) fn begin(&self, total_size: u64, previous_size: u64) {
        self.total_size.store(total_size, Ordering::Relaxed);
        self.previous_size.store(previous_size, Ordering::Relaxed);
        self.transferred_size.store(0, Ordering::Relaxed);
        self.speed.store(0, Ordering::Relaxed);
        self.percent
            .store(percent_of(previous_size, total_size), Ordering::Relaxed);
        *self.started_at.lock() = Some(Instant::now());
    }

    /// 记录写入的字节，返回最新百分比
    pub(crate) fn record_transferred(&self, bytes: u64) -> u64 {
        let transferred = self.transferred_size.fetch_add(bytes, Ordering::Relaxed) + bytes;
        let elapsed = self
            .started_at
            .lock()
            .map(|t| t.elapsed())
            .unwrap_or_default();
        self.speed
            .store(speed_of(transferred, elapsed), Ordering::Relaxed);

        let percent = percent_of(transferred + self.previous_size(), self.total_size());
        self.percent.store(percent, Ordering::Relaxed);
        percent
    }

    /// 发出协作式停止信号
    ///
    /// 传输已提交完成时不再生效，返回 false。
    pub fn stop(&self) -> bool {
        let committed = self.committed.lock();
        if *committed {
            return false;
        }
        self.cancel.cancel();
        true
    }

    /// 提交完成：此后停止信号不再生效。已收到停止信号时返回 false
    pub(crate) fn try_commit(&self) -> bool {
        let mut committed = self.committed.lock();
        if self.cancel.is_cancelled() {
            return false;
        }
        *committed = true;
        true
    }

    pub fn is_stopped(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub(crate) fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub(crate) fn mark_deleted(&self) {
        self.deleted.store(true, Ordering::SeqCst);
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted.load(Ordering::SeqCst)
    }

    /// 等待前一个句柄结束（发送端已释放也视为结束）
    pub(crate) async fn wait_for_predecessor(&self) {
        if let Some(mut rx) = self.predecessor.clone() {
            let _ = rx.wait_for(TransferState::is_finished).await;
        }
    }

    /// 等待本句柄以及前一个句柄都不再访问临时文件
    pub async fn wait_idle(&self) {
        if self.state() == TransferState::Running {
            let mut rx = self.state.subscribe();
            let _ = rx.wait_for(TransferState::is_finished).await;
        }
        self.wait_for_predecessor().await;
    }

    pub fn info(&self, location: TaskLocation) -> TaskInfo {
        TaskInfo {
            url: self.url.clone(),
            name: self.name.clone(),
            location,
            state: self.state(),
            percent: self.percent(),
            downloaded_size: self.downloaded_size(),
            total_size: self.total_size(),
            speed: self.speed(),
            error: self.last_error(),
        }
    }

    /// 限时等待，超时返回 false
    pub async fn wait_idle_timeout(&self, timeout: Duration) -> bool {
        tokio::time::timeout(timeout, self.wait_idle()).await.is_ok()
    }
}

/// 百分比，最大 100；总大小未知时为 0
pub fn percent_of(downloaded: u64, total: u64) -> u64 {
    if total == 0 {
        return 0;
    }
    ((downloaded as u128 * 100 / total as u128) as u64).min(100)
}

/// 字节/秒
pub fn speed_of(transferred: u64, elapsed: Duration) -> u64 {
    let millis = elapsed.as_millis().max(1);
    (transferred as u128 * 1000 / millis) as u64
}

/// 从 URL 最后一段路径解析文件名（百分号解码）
pub fn file_name_from_url(url: &str) -> Result<String, AddTaskError> {
    let malformed = || AddTaskError::MalformedUrl(url.to_string());

    let parsed = Url::parse(url).map_err(|_| malformed())?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(malformed());
    }

    let segment = parsed
        .path_segments()
        .and_then(|mut segments| segments.next_back())
        .ok_or_else(malformed)?;

    let name = urlencoding::decode(segment).map_err(|_| malformed())?;
    let name = name.trim();
    if name.is_empty() || name == "." || name == ".." || name.contains(['/', '\\']) {
        return Err(malformed());
    }

    Ok(name.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn task() -> DownloadTask {
        DownloadTask::new("http://example.com/files/a.bin", Path::new("/downloads")).unwrap()
    }

    #[test]
    fn test_file_name_from_url() {
        assert_eq!(
            file_name_from_url("http://example.com/files/a.zip").unwrap(),
            "a.zip"
        );
        assert_eq!(
            file_name_from_url("https://example.com/x/%E6%96%87%E4%BB%B6.txt?sig=1").unwrap(),
            "文件.txt"
        );
        assert!(file_name_from_url("http://example.com/").is_err());
        assert!(file_name_from_url("http://example.com/dir/").is_err());
        assert!(file_name_from_url("not a url").is_err());
        assert!(file_name_from_url("ftp://example.com/a.zip").is_err());
        assert!(file_name_from_url("http://example.com/a%2F..%2Fb").is_err());
    }

    #[test]
    fn test_task_paths() {
        let task = task();
        assert_eq!(task.name(), "a.bin");
        assert_eq!(task.file_path(), Path::new("/downloads/a.bin"));
        assert_eq!(task.staging_path(), Path::new("/downloads/a.bin.download"));
        assert_eq!(task.state(), TransferState::Created);
    }

    #[test]
    fn test_progress_accounting() {
        let task = task();
        task.begin(10_000, 0);
        assert_eq!(task.percent(), 0);

        assert_eq!(task.record_transferred(2_500), 25);
        assert_eq!(task.downloaded_size(), 2_500);

        task.begin(10_000, 2_499);
        assert_eq!(task.transferred_size(), 0);
        assert_eq!(task.percent(), 24);
        assert_eq!(task.record_transferred(7_501), 100);
        assert_eq!(task.downloaded_size(), 10_000);
    }

    #[test]
    fn test_successor_is_fresh_handle() {
        let task = task();
        task.begin(10_000, 0);
        task.record_transferred(2_500);
        task.stop();

        let next = task.successor();
        assert!(!next.is_stopped());
        assert_eq!(next.state(), TransferState::Created);
        assert_eq!(next.url(), task.url());
        assert_eq!(next.staging_path(), task.staging_path());
        assert_eq!(next.downloaded_size(), 2_500);
        assert_eq!(next.percent(), 25);
    }

    #[test]
    fn test_stop_and_commit_are_exclusive() {
        let committed = task();
        assert!(committed.try_commit());
        assert!(!committed.stop(), "提交完成后停止不应生效");
        assert!(!committed.is_stopped());
        assert!(committed.try_commit());

        let stopped = task();
        assert!(stopped.stop());
        assert!(!stopped.try_commit(), "已停止的任务不能提交完成");
    }

    #[tokio::test]
    async fn test_successor_waits_for_predecessor() {
        let task = task();
        task.set_state(TransferState::Running);
        let next = task.successor();

        let waiting = next.wait_idle_timeout(Duration::from_millis(50)).await;
        assert!(!waiting, "前一个句柄仍在运行时不应返回");

        task.set_state(TransferState::Stopped);
        assert!(next.wait_idle_timeout(Duration::from_secs(1)).await);
    }

    #[test]
    fn test_speed_of() {
        assert_eq!(speed_of(1_000, Duration::from_millis(500)), 2_000);
        assert_eq!(speed_of(1_000, Duration::ZERO), 1_000_000);
    }

    proptest! {
        #[test]
        fn prop_percent_bounded_and_monotonic(
            total in 1u64..10_000_000,
            steps in proptest::collection::vec(0u64..20_000_000, 1..50),
        ) {
            let mut steps = steps;
            steps.sort_unstable();
            let mut last = 0;
            for downloaded in steps {
                let percent = percent_of(downloaded, total);
                prop_assert!(percent <= 100);
                prop_assert!(percent >= last);
                last = percent;
            }
        }
    }
}
