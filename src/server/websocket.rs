//! WebSocket 事件推送
//!
//! 每个连接订阅一次事件总线，把下载事件以 JSON 文本帧转发给客户端。

use crate::downloader::TaskInfo;
use crate::events::DownloadEvent;
use crate::server::AppState;
use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// 客户端发送给服务端的消息
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WsClientMessage {
    /// 心跳 Ping
    Ping {
        /// 客户端时间戳（毫秒）
        timestamp: i64,
    },
    /// 请求任务快照
    RequestSnapshot,
}

/// 服务端发送给客户端的消息
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WsServerMessage {
    /// 连接成功
    Connected {
        connection_id: String,
        timestamp: i64,
    },
    /// 心跳 Pong
    Pong {
        timestamp: i64,
        client_timestamp: Option<i64>,
    },
    /// 下载事件
    Event {
        timestamp: i64,
        #[serde(flatten)]
        event: DownloadEvent,
    },
    /// 任务快照
    Snapshot { tasks: Vec<TaskInfo> },
    /// 错误消息
    Error { code: String, message: String },
}

impl WsServerMessage {
    pub fn connected(connection_id: String) -> Self {
        Self::Connected {
            connection_id,
            timestamp: chrono::Utc::now().timestamp_millis(),
        }
    }

    pub fn pong(client_timestamp: Option<i64>) -> Self {
        Self::Pong {
            timestamp: chrono::Utc::now().timestamp_millis(),
            client_timestamp,
        }
    }

    pub fn event(event: DownloadEvent) -> Self {
        Self::Event {
            timestamp: chrono::Utc::now().timestamp_millis(),
            event,
        }
    }

    pub fn error(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Error {
            code: code.into(),
            message: message.into(),
        }
    }
}

/// WebSocket 路由处理器
pub async fn handle_websocket(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let connection_id = Uuid::new_v4().to_string();
    info!("新的 WebSocket 连接: {}", connection_id);

    let mut events = state.download_manager.events().subscribe();
    let (mut sender, mut receiver) = socket.split();
    // 接收侧产生的回复通过该通道交给发送侧
    let (reply_tx, mut reply_rx) = mpsc::unbounded_channel::<WsServerMessage>();

    if send_json(&mut sender, &WsServerMessage::connected(connection_id.clone()))
        .await
        .is_err()
    {
        warn!("发送连接成功消息失败: {}", connection_id);
        return;
    }

    let send_conn_id = connection_id.clone();
    let mut send_task = tokio::spawn(async move {
        loop {
            let message = tokio::select! {
                event = events.recv() => match event {
                    Ok(event) => WsServerMessage::event(event),
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("连接 {} 处理过慢，丢失 {} 个事件", send_conn_id, n);
                        WsServerMessage::error("lagged", format!("丢失 {} 个事件", n))
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                reply = reply_rx.recv() => match reply {
                    Some(reply) => reply,
                    None => break,
                },
            };
            if send_json(&mut sender, &message).await.is_err() {
                break;
            }
        }
    });

    let recv_state = state.clone();
    let recv_conn_id = connection_id.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(message)) = receiver.next().await {
            match message {
                Message::Text(text) => {
                    if let Some(reply) = handle_client_message(&recv_state, &text) {
                        if reply_tx.send(reply).is_err() {
                            break;
                        }
                    }
                }
                Message::Close(_) => {
                    info!("收到关闭消息: {}", recv_conn_id);
                    break;
                }
                _ => {}
            }
        }
    });

    // 任一方向结束即关闭连接
    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    info!("WebSocket 连接已关闭: {}", connection_id);
}

fn handle_client_message(state: &AppState, text: &str) -> Option<WsServerMessage> {
    match serde_json::from_str::<WsClientMessage>(text) {
        Ok(WsClientMessage::Ping { timestamp }) => Some(WsServerMessage::pong(Some(timestamp))),
        Ok(WsClientMessage::RequestSnapshot) => Some(WsServerMessage::Snapshot {
            tasks: state.download_manager.snapshot(),
        }),
        Err(e) => {
            debug!("无法解析客户端消息: {}, 错误: {}", text, e);
            Some(WsServerMessage::error("invalid_message", e.to_string()))
        }
    }
}

async fn send_json<S>(sender: &mut S, message: &WsServerMessage) -> Result<(), ()>
where
    S: futures::Sink<Message> + Unpin,
{
    let json = serde_json::to_string(message).map_err(|e| {
        warn!("序列化消息失败: {}", e);
    })?;
    sender.send(Message::Text(json)).await.map_err(|_| ())
}
