// API处理器

use crate::downloader::{AddTaskError, TaskInfo};
use crate::persistence::{DownloadRecord, DownloadStatus};
use crate::server::AppState;
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::Json,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// 统一响应格式
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    /// 状态码 (0: 成功, 其他: 错误码)
    pub code: i32,
    /// 消息
    pub message: String,
    /// 数据
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            code: 0,
            message: "Success".to_string(),
            data: Some(data),
        }
    }

    pub fn error(code: i32, message: String) -> Self {
        Self {
            code,
            message,
            data: None,
        }
    }
}

type ApiResult<T> = (StatusCode, Json<ApiResponse<T>>);

/// 只携带 URL 的请求体
#[derive(Debug, Deserialize)]
pub struct UrlRequest {
    pub url: String,
}

/// 状态查询参数
#[derive(Debug, Deserialize)]
pub struct StatusQuery {
    pub url: String,
}

/// 状态查询结果
#[derive(Debug, Serialize, Deserialize)]
pub struct StatusResponse {
    pub url: String,
    pub status: DownloadStatus,
    /// 状态的整数编码
    pub status_code: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub record: Option<DownloadRecord>,
}

/// 暂停 / 继续 / 删除的结果
///
/// 任务或记录不存在时命令视为空操作，`found` 为 false。
#[derive(Debug, Serialize, Deserialize)]
pub struct CommandResponse {
    pub url: String,
    pub found: bool,
}

/// 任务列表
#[derive(Debug, Serialize, Deserialize)]
pub struct DownloadListResponse {
    pub queued: usize,
    pub active: usize,
    pub paused: usize,
    pub tasks: Vec<TaskInfo>,
}

fn add_error_status(e: &AddTaskError) -> StatusCode {
    match e {
        AddTaskError::StorageUnavailable(_) | AddTaskError::StorageReadOnly(_) => {
            StatusCode::INSUFFICIENT_STORAGE
        }
        AddTaskError::TooManyTasks(_) => StatusCode::TOO_MANY_REQUESTS,
        AddTaskError::AlreadyExists(_) => StatusCode::CONFLICT,
        AddTaskError::MalformedUrl(_) => StatusCode::BAD_REQUEST,
        AddTaskError::ShutDown => StatusCode::SERVICE_UNAVAILABLE,
    }
}

fn command_done(url: String, found: bool) -> Json<ApiResponse<CommandResponse>> {
    if !found {
        debug!("任务不存在，忽略命令: {}", url);
    }
    Json(ApiResponse::success(CommandResponse { url, found }))
}

/// POST /api/v1/downloads
/// 添加下载任务
pub async fn add_download(
    State(app_state): State<AppState>,
    Json(req): Json<UrlRequest>,
) -> ApiResult<()> {
    match app_state.download_manager.add_task(&req.url).await {
        Ok(()) => (StatusCode::OK, Json(ApiResponse::success(()))),
        Err(e) => {
            warn!("添加下载任务失败: {}, 原因: {}", req.url, e);
            (
                add_error_status(&e),
                Json(ApiResponse::error(e.code(), e.to_string())),
            )
        }
    }
}

/// POST /api/v1/downloads/pause
pub async fn pause_download(
    State(app_state): State<AppState>,
    Json(req): Json<UrlRequest>,
) -> Json<ApiResponse<CommandResponse>> {
    let found = app_state.download_manager.pause_task(&req.url).await;
    command_done(req.url, found)
}

/// POST /api/v1/downloads/continue
pub async fn continue_download(
    State(app_state): State<AppState>,
    Json(req): Json<UrlRequest>,
) -> Json<ApiResponse<CommandResponse>> {
    let found = app_state.download_manager.continue_task(&req.url).await;
    command_done(req.url, found)
}

/// DELETE /api/v1/downloads
pub async fn delete_download(
    State(app_state): State<AppState>,
    Json(req): Json<UrlRequest>,
) -> Json<ApiResponse<CommandResponse>> {
    let found = app_state.download_manager.delete_task(&req.url).await;
    if found {
        info!("删除下载任务成功: {}", req.url);
    }
    command_done(req.url, found)
}

/// GET /api/v1/downloads/status?url=
/// 记录不存在时返回 default
pub async fn get_download_status(
    State(app_state): State<AppState>,
    Query(query): Query<StatusQuery>,
) -> Json<ApiResponse<StatusResponse>> {
    let manager = &app_state.download_manager;
    let status = manager.get_status(&query.url).await;
    Json(ApiResponse::success(StatusResponse {
        record: manager.get_record(&query.url),
        status_code: status.code(),
        status,
        url: query.url,
    }))
}

/// GET /api/v1/downloads
pub async fn list_downloads(
    State(app_state): State<AppState>,
) -> Json<ApiResponse<DownloadListResponse>> {
    let manager = &app_state.download_manager;
    Json(ApiResponse::success(DownloadListResponse {
        queued: manager.queued_count(),
        active: manager.active_count(),
        paused: manager.paused_count(),
        tasks: manager.snapshot(),
    }))
}

/// 健康检查响应
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// GET /health
pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::{NetworkMonitor, StorageProbe};
    use crate::config::{AppConfig, DownloadConfig};
    use crate::downloader::DownloadManager;
    use crate::events::EventBus;
    use crate::persistence::MemoryMetadataStore;
    use crate::server::build_router;
    use std::path::Path;
    use std::sync::Arc;
    use tempfile::TempDir;

    struct Offline;

    impl NetworkMonitor for Offline {
        fn is_available(&self) -> bool {
            false
        }
    }

    struct Writable;

    impl StorageProbe for Writable {
        fn is_present(&self, _dir: &Path) -> bool {
            true
        }
        fn is_writable(&self, _dir: &Path) -> bool {
            true
        }
        fn available_space(&self, _dir: &Path) -> Option<u64> {
            None
        }
    }

    async fn spawn_app(temp_dir: &TempDir) -> String {
        let mut config = AppConfig::default();
        config.download = DownloadConfig::with_dir(temp_dir.path().to_path_buf());
        let manager = DownloadManager::with_probes(
            config.download.clone(),
            Arc::new(MemoryMetadataStore::new()),
            EventBus::default(),
            Arc::new(Writable),
            Arc::new(Offline),
        )
        .unwrap();
        let app = build_router(AppState::new(Arc::new(manager), config));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        format!("http://{}", addr)
    }

    #[test]
    fn test_api_response_envelope() {
        let ok = serde_json::to_value(ApiResponse::success(1)).unwrap();
        assert_eq!(ok["code"], 0);
        assert_eq!(ok["data"], 1);

        let err = serde_json::to_value(ApiResponse::<()>::error(1003, "满了".into())).unwrap();
        assert_eq!(err["code"], 1003);
        assert!(err.get("data").is_none());
    }

    #[tokio::test]
    async fn test_command_surface() {
        let temp_dir = TempDir::new().unwrap();
        let base = spawn_app(&temp_dir).await;
        let client = reqwest::Client::new();
        let url = "http://127.0.0.1:9/a.bin";

        let health: HealthResponse = client
            .get(format!("{}/health", base))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(health.status, "ok");

        let resp = client
            .post(format!("{}/api/v1/downloads", base))
            .json(&serde_json::json!({ "url": url }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);

        let resp = client
            .post(format!("{}/api/v1/downloads", base))
            .json(&serde_json::json!({ "url": url }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 409);
        let body: ApiResponse<()> = resp.json().await.unwrap();
        assert_eq!(body.code, 1004);

        let resp = client
            .post(format!("{}/api/v1/downloads", base))
            .json(&serde_json::json!({ "url": "http://h/" }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 400);

        let list: ApiResponse<DownloadListResponse> = client
            .get(format!("{}/api/v1/downloads", base))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(list.data.unwrap().tasks.len(), 1);

        let resp = client
            .delete(format!("{}/api/v1/downloads", base))
            .json(&serde_json::json!({ "url": url }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
        let body: ApiResponse<CommandResponse> = resp.json().await.unwrap();
        assert!(body.data.unwrap().found);

        let status: ApiResponse<StatusResponse> = client
            .get(format!("{}/api/v1/downloads/status", base))
            .query(&[("url", url)])
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        let status = status.data.unwrap();
        assert_eq!(status.status, DownloadStatus::Default);
        assert_eq!(status.status_code, 0);
        assert!(status.record.is_none());

        // 不存在的任务：所有命令都是空操作而不是错误
        for (method, path) in [
            (reqwest::Method::POST, "/api/v1/downloads/pause"),
            (reqwest::Method::POST, "/api/v1/downloads/continue"),
            (reqwest::Method::DELETE, "/api/v1/downloads"),
        ] {
            let resp = client
                .request(method, format!("{}{}", base, path))
                .json(&serde_json::json!({ "url": url }))
                .send()
                .await
                .unwrap();
            assert_eq!(resp.status(), 200, "{}", path);
            let body: ApiResponse<CommandResponse> = resp.json().await.unwrap();
            assert_eq!(body.code, 0);
            let data = body.data.unwrap();
            assert_eq!(data.url, url);
            assert!(!data.found, "{}", path);
        }
    }
}
