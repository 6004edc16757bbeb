//! 事件总线
//!
//! 基于 broadcast 通道：没有订阅者时发布直接丢弃；
//! 慢订阅者只会丢失最旧的事件（收到 Lagged），不会拖慢传输。

use tokio::sync::broadcast;
use tracing::debug;

use super::types::DownloadEvent;

const DEFAULT_CAPACITY: usize = 1024;

#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<DownloadEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// 发布事件，立即返回
    pub fn publish(&self, event: DownloadEvent) {
        if self.sender.send(event).is_err() {
            debug!("当前没有事件订阅者，事件已丢弃");
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DownloadEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}
