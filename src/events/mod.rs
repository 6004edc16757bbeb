//! 事件模块
//!
//! - `types.rs`: 下载生命周期事件
//! - `bus.rs`: 发布 / 订阅通道，发布方从不阻塞

mod bus;
mod types;

pub use bus::EventBus;
pub use types::DownloadEvent;
