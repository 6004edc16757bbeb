//! 测试辅助：本地文件服务器与探测器替身

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use axum::body::{Body, Bytes};
use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::Router;
use futures::StreamExt;
use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::watch;

use crate::common::{NetworkMonitor, StorageProbe};

/// 可复现的测试数据
pub fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

/// 轮询等待条件成立，5 秒超时
pub async fn wait_until<F: Fn() -> bool>(cond: F) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !cond() {
        if tokio::time::Instant::now() > deadline {
            panic!("等待条件超时");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FixedNetwork(pub bool);

impl NetworkMonitor for FixedNetwork {
    fn is_available(&self) -> bool {
        self.0
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FakeStorage {
    pub present: bool,
    pub writable: bool,
    pub space: Option<u64>,
}

impl Default for FakeStorage {
    fn default() -> Self {
        Self {
            present: true,
            writable: true,
            space: None,
        }
    }
}

impl FakeStorage {
    pub fn with_space(space: u64) -> Self {
        Self {
            space: Some(space),
            ..Self::default()
        }
    }
}

impl StorageProbe for FakeStorage {
    fn is_present(&self, _dir: &Path) -> bool {
        self.present
    }

    fn is_writable(&self, _dir: &Path) -> bool {
        self.writable
    }

    fn available_space(&self, _dir: &Path) -> Option<u64> {
        self.space
    }
}

/// 服务器上的一个文件
#[derive(Debug, Clone)]
pub struct TestFile {
    path: String,
    data: Bytes,
    /// 完整请求发送这么多字节后挂起，直到 [`TestServer::release`]
    gate_after: Option<usize>,
    honor_range: bool,
}

impl TestFile {
    pub fn new(path: &str, data: Vec<u8>) -> Self {
        Self {
            path: path.to_string(),
            data: Bytes::from(data),
            gate_after: None,
            honor_range: true,
        }
    }

    pub fn gate_after(mut self, bytes: usize) -> Self {
        self.gate_after = Some(bytes);
        self
    }

    pub fn ignore_range(mut self) -> Self {
        self.honor_range = false;
        self
    }
}

struct ServerState {
    files: HashMap<String, TestFile>,
    ranges: Mutex<HashMap<String, Vec<Option<String>>>>,
    release: watch::Sender<bool>,
}

/// 绑定在 127.0.0.1 随机端口上的文件服务器
pub struct TestServer {
    addr: SocketAddr,
    state: Arc<ServerState>,
}

impl TestServer {
    pub async fn start(files: Vec<TestFile>) -> Self {
        let (release, _) = watch::channel(false);
        let state = Arc::new(ServerState {
            files: files.into_iter().map(|f| (f.path.clone(), f)).collect(),
            ranges: Mutex::new(HashMap::new()),
            release,
        });

        let app = Router::new()
            .fallback(serve_file)
            .with_state(state.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        Self { addr, state }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    /// 某个路径收到的 Range 头（按请求顺序）
    pub fn range_headers(&self, path: &str) -> Vec<Option<String>> {
        self.state
            .ranges
            .lock()
            .get(path)
            .cloned()
            .unwrap_or_default()
    }

    /// 放行所有挂起的响应
    pub fn release(&self) {
        self.state.release.send_replace(true);
    }
}

async fn serve_file(
    State(state): State<Arc<ServerState>>,
    uri: Uri,
    headers: HeaderMap,
) -> Response {
    let path = uri.path().to_string();
    let range = headers
        .get(header::RANGE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_string());
    state
        .ranges
        .lock()
        .entry(path.clone())
        .or_default()
        .push(range.clone());

    let Some(file) = state.files.get(&path) else {
        return (StatusCode::NOT_FOUND, "not found").into_response();
    };

    let offset = range
        .filter(|_| file.honor_range)
        .and_then(|r| r.strip_prefix("bytes=")?.strip_suffix('-')?.parse::<usize>().ok());

    match offset {
        Some(offset) if offset < file.data.len() => {
            let body = file.data.slice(offset..);
            Response::builder()
                .status(StatusCode::PARTIAL_CONTENT)
                .header(header::CONTENT_LENGTH, body.len())
                .header(
                    header::CONTENT_RANGE,
                    format!("bytes {}-{}/{}", offset, file.data.len() - 1, file.data.len()),
                )
                .body(Body::from(body))
                .unwrap()
        }
        Some(_) => StatusCode::RANGE_NOT_SATISFIABLE.into_response(),
        None => {
            let body = match file.gate_after {
                Some(gate) if gate < file.data.len() => {
                    let head = file.data.slice(..gate);
                    let tail = file.data.slice(gate..);
                    let mut release = state.release.subscribe();
                    let stream = futures::stream::once(async move { Ok::<_, std::io::Error>(head) })
                        .chain(futures::stream::once(async move {
                            let _ = release.wait_for(|released| *released).await;
                            Ok(tail)
                        }));
                    Body::from_stream(stream)
                }
                _ => Body::from(file.data.clone()),
            };
            Response::builder()
                .status(StatusCode::OK)
                .header(header::CONTENT_LENGTH, file.data.len())
                .body(body)
                .unwrap()
        }
    }
}

/// 直接在 TCP 上模拟异常服务器的行为
#[derive(Debug, Clone)]
pub enum RawBehavior {
    /// 接受连接但从不响应
    Silent,
    /// 等待一段时间后才发送完整响应
    Delayed(Duration, Bytes),
    /// 声明 declared 字节，只发送 body 后关闭连接
    Truncated { declared: usize, body: Bytes },
}

/// 启动异常服务器，返回 `http://ip:port`
pub async fn raw_server(behavior: RawBehavior) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((mut stream, _)) = listener.accept().await {
            match behavior.clone() {
                RawBehavior::Silent => held.push(stream),
                RawBehavior::Delayed(delay, body) => {
                    tokio::spawn(async move {
                        read_request(&mut stream).await;
                        tokio::time::sleep(delay).await;
                        let _ = write_response(&mut stream, body.len(), &body).await;
                    });
                }
                RawBehavior::Truncated { declared, body } => {
                    tokio::spawn(async move {
                        read_request(&mut stream).await;
                        let _ = write_response(&mut stream, declared, &body).await;
                        let _ = stream.shutdown().await;
                    });
                }
            }
        }
    });

    format!("http://{}", addr)
}

async fn read_request(stream: &mut TcpStream) {
    let mut buf = [0u8; 4096];
    let _ = stream.read(&mut buf).await;
}

async fn write_response(
    stream: &mut TcpStream,
    content_length: usize,
    body: &[u8],
) -> std::io::Result<()> {
    let head = format!(
        "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        content_length
    );
    stream.write_all(head.as_bytes()).await?;
    stream.write_all(body).await?;
    stream.flush().await
}
