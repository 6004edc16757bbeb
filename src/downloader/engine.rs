//! 断点续传引擎
//!
//! 单个 URL 的一次传输：连接 → 判断断点 → 空间检查 → 流式写入临时文件 → 完整性校验 → 重命名。
//! 任何失败或主动停止都把持久化状态置为暂停，随时可以继续。

use std::io;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use futures::TryStreamExt;
use reqwest::header::RANGE;
use reqwest::{Client, Response, StatusCode};
use tokio::fs::{self, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio_util::io::StreamReader;
use tracing::{debug, info, warn};

use super::error::TransferError;
use super::task::{DownloadTask, TransferState};
use crate::common::{NetworkMonitor, StorageProbe};
use crate::config::DownloadConfig;
use crate::events::{DownloadEvent, EventBus};
use crate::persistence::{DownloadStatus, MetadataStore};

/// 一次传输的结果
#[derive(Debug)]
pub enum TransferOutcome {
    Completed,
    /// 被暂停 / 删除 / 关闭
    Stopped,
    Failed(TransferError),
}

/// 传输循环的正常结束方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoopEnd {
    Completed,
    Stopped,
}

/// 传输引擎（可克隆，所有任务共享一个 HTTP 客户端）
#[derive(Clone)]
pub struct TransferEngine {
    client: Client,
    config: Arc<DownloadConfig>,
    store: Arc<dyn MetadataStore>,
    events: EventBus,
    storage: Arc<dyn StorageProbe>,
    network: Arc<dyn NetworkMonitor>,
}

impl TransferEngine {
    pub fn new(
        config: Arc<DownloadConfig>,
        store: Arc<dyn MetadataStore>,
        events: EventBus,
        storage: Arc<dyn StorageProbe>,
        network: Arc<dyn NetworkMonitor>,
    ) -> Result<Self, TransferError> {
        // 不设置整体超时：大文件传输时间不可预估，停滞由读超时判定
        let client = Client::builder()
            .user_agent(config.user_agent.clone())
            .connect_timeout(Duration::from_secs(config.read_timeout_secs.max(1)))
            .tcp_keepalive(Duration::from_secs(60))
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()?;

        Ok(Self {
            client,
            config,
            store,
            events,
            storage,
            network,
        })
    }

    /// 执行一次传输，结束时更新句柄状态与持久化状态
    ///
    /// 事件中的完成 / 错误由调度器在整理集合后发出。
    pub async fn execute(&self, task: &DownloadTask) -> TransferOutcome {
        // 等前一个句柄释放临时文件；自身被停止时不再等待
        tokio::select! {
            _ = task.wait_for_predecessor() => {}
            _ = task.cancellation_token().cancelled() => {}
        }

        // 先标记运行再检查停止信号，删除方据此判断是否需要等待
        task.set_state(TransferState::Running);
        if task.is_stopped() {
            debug!("任务在开始前已被停止: {}", task.url());
            task.set_state(TransferState::Stopped);
            return TransferOutcome::Stopped;
        }

        info!("开始下载: {}", task.url());
        let outcome = match self.run(task).await {
            Ok(LoopEnd::Completed) => {
                task.set_state(TransferState::Completed);
                TransferOutcome::Completed
            }
            Ok(LoopEnd::Stopped) => {
                self.persist_paused(task);
                task.set_state(TransferState::Stopped);
                TransferOutcome::Stopped
            }
            Err(e) => {
                self.persist_paused(task);
                task.set_last_error(e.to_string());
                task.set_state(TransferState::Errored);
                TransferOutcome::Failed(e)
            }
        };

        match &outcome {
            TransferOutcome::Completed => info!("✓ 下载完成: {}", task.url()),
            TransferOutcome::Stopped => info!("下载已停止: {}", task.url()),
            TransferOutcome::Failed(e) => warn!("✗ 下载失败: {}, 错误: {}", task.url(), e),
        }
        outcome
    }

    async fn run(&self, task: &DownloadTask) -> Result<LoopEnd, TransferError> {
        // 1. 网络检查
        if !self.network.is_available() {
            return Err(TransferError::NetworkUnavailable);
        }

        // 2. 首次请求，获取总大小
        let Some(response) = self.connect(task, None).await? else {
            return Ok(LoopEnd::Stopped);
        };
        if !response.status().is_success() {
            return Err(TransferError::InvalidUrl(format!(
                "服务器返回 {}",
                response.status()
            )));
        }
        let total_size = response.content_length().unwrap_or(0);

        // 3. 过小的响应视为错误页面
        if total_size < self.config.min_file_size {
            return Err(TransferError::InvalidUrl(format!(
                "文件大小 {} 字节小于下限 {} 字节",
                total_size, self.config.min_file_size
            )));
        }

        // 4. 目标文件已完整存在
        if file_len(task.file_path()).await == Some(total_size) {
            return Err(TransferError::FileExists);
        }

        // 5. 断点续传：重新获取最后一个字节，防止上次最后一次写入不完整
        let staging_len = file_len(task.staging_path()).await.unwrap_or(0);
        let (response, previous_size) = if staging_len > 0 && staging_len <= total_size {
            drop(response);
            let offset = staging_len - 1;
            debug!(
                "发现临时文件: {:?}, 长度={}, 从 {} 续传",
                task.staging_path(),
                staging_len,
                offset
            );
            let Some(resumed) = self.connect(task, Some(offset)).await? else {
                return Ok(LoopEnd::Stopped);
            };
            match resumed.status() {
                StatusCode::PARTIAL_CONTENT => (resumed, offset),
                StatusCode::OK => {
                    info!("服务器不支持 Range，从头下载: {}", task.url());
                    (resumed, 0)
                }
                status => {
                    return Err(TransferError::InvalidUrl(format!(
                        "续传请求返回 {}",
                        status
                    )))
                }
            }
        } else {
            (response, 0)
        };

        // 6. 空间检查
        let required = total_size - previous_size;
        let save_dir = task
            .staging_path()
            .parent()
            .unwrap_or(self.config.download_dir.as_path());
        if let Some(available) = self.storage.available_space(save_dir) {
            if required > available {
                return Err(TransferError::OutOfStorage {
                    required,
                    available,
                });
            }
        }

        // 7. 传输（已被停止或删除时不再碰文件）
        if task.is_stopped() {
            return Ok(LoopEnd::Stopped);
        }
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(task.staging_path())
            .await?;
        file.set_len(previous_size).await?;
        file.seek(io::SeekFrom::Start(previous_size)).await?;

        task.begin(total_size, previous_size);
        self.persist(task.url(), "总大小", |s| s.update_total_size(task.url(), total_size));
        self.persist(task.url(), "状态", |s| {
            s.update_status(task.url(), DownloadStatus::Downloading)
        });
        self.persist(task.url(), "已下载大小", |s| {
            s.update_current_size(task.url(), previous_size)
        });
        self.publish_progress(task);

        let mut reader = StreamReader::new(Box::pin(
            response.bytes_stream().map_err(|e| {
                // 连接提前关闭：按读到结尾处理，由完整性校验判定中断
                let kind = if e.is_body() || e.is_decode() {
                    io::ErrorKind::UnexpectedEof
                } else {
                    io::ErrorKind::Other
                };
                io::Error::new(kind, e)
            }),
        ));
        let mut buffer = vec![0u8; self.config.buffer_size];
        let read_timeout = Duration::from_secs(self.config.read_timeout_secs.max(1));
        let cancel = task.cancellation_token();
        let mut last_percent = task.percent();
        let mut copied = 0u64;
        let mut stopped = false;

        loop {
            let n = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    stopped = true;
                    break;
                }
                read = tokio::time::timeout(read_timeout, reader.read(&mut buffer)) => match read {
                    Ok(Ok(n)) => n,
                    Ok(Err(e)) if e.kind() == io::ErrorKind::UnexpectedEof => {
                        debug!("连接提前关闭: {}, 错误: {}", task.url(), e);
                        0
                    }
                    Ok(Err(e)) => return Err(e.into()),
                    Err(_) => {
                        file.flush().await?;
                        return Err(TransferError::Stalled(read_timeout.as_secs()));
                    }
                },
            };
            if n == 0 {
                break;
            }

            file.write_all(&buffer[..n]).await?;
            copied += n as u64;

            let percent = task.record_transferred(n as u64);
            if percent != last_percent {
                last_percent = percent;
                self.publish_progress(task);
                self.persist(task.url(), "已下载大小", |s| {
                    s.update_current_size(task.url(), task.downloaded_size())
                });
            }
        }

        file.flush().await?;
        file.sync_all().await?;
        drop(file);

        // 8. 完整性校验
        let end = check_completion(previous_size, copied, total_size, stopped)?;
        if end == LoopEnd::Stopped {
            return Ok(end);
        }
        if !task.try_commit() {
            return Ok(LoopEnd::Stopped);
        }

        // 9. 重命名为最终文件
        fs::rename(task.staging_path(), task.file_path()).await?;
        self.persist(task.url(), "已下载大小", |s| {
            s.update_current_size(task.url(), total_size)
        });
        self.persist(task.url(), "状态", |s| {
            s.update_status(task.url(), DownloadStatus::Complete)
        });
        Ok(LoopEnd::Completed)
    }

    /// 发送请求并等待响应头
    ///
    /// 等待期间响应停止信号（返回 None），超过读超时判定为停滞。
    async fn connect(
        &self,
        task: &DownloadTask,
        offset: Option<u64>,
    ) -> Result<Option<Response>, TransferError> {
        let mut request = self.client.get(task.url());
        if let Some(offset) = offset {
            request = request.header(RANGE, format!("bytes={}-", offset));
        }
        let read_timeout = Duration::from_secs(self.config.read_timeout_secs.max(1));

        tokio::select! {
            biased;
            _ = task.cancellation_token().cancelled() => Ok(None),
            sent = tokio::time::timeout(read_timeout, request.send()) => match sent {
                Ok(response) => Ok(Some(response?)),
                Err(_) => Err(TransferError::Stalled(read_timeout.as_secs())),
            },
        }
    }

    fn publish_progress(&self, task: &DownloadTask) {
        self.events.publish(DownloadEvent::Progress {
            url: task.url().to_string(),
            percent: task.percent(),
            downloaded_size: task.downloaded_size(),
            total_size: task.total_size(),
            speed: task.speed(),
        });
    }

    fn persist_paused(&self, task: &DownloadTask) {
        if task.is_deleted() {
            return;
        }
        self.persist(task.url(), "状态", |s| {
            s.update_status(task.url(), DownloadStatus::Paused)
        });
    }

    /// 存储失败只记录日志，不中断传输
    fn persist<F>(&self, url: &str, what: &str, f: F)
    where
        F: FnOnce(&dyn MetadataStore) -> anyhow::Result<()>,
    {
        if let Err(e) = f(self.store.as_ref()) {
            warn!("更新下载记录失败: url={}, 字段={}, 错误: {:#}", url, what, e);
        }
    }
}

async fn file_len(path: &Path) -> Option<u64> {
    fs::metadata(path).await.ok().map(|m| m.len())
}

/// 传输循环结束后的完整性判定
///
/// 主动停止不算中断；总大小为 0 时无法校验。
fn check_completion(
    previous_size: u64,
    copied: u64,
    total_size: u64,
    stopped: bool,
) -> Result<LoopEnd, TransferError> {
    if stopped {
        return Ok(LoopEnd::Stopped);
    }
    let actual = previous_size + copied;
    if total_size != 0 && actual != total_size {
        return Err(TransferError::InterruptedTransfer {
            expected: total_size,
            actual,
        });
    }
    Ok(LoopEnd::Completed)
}
