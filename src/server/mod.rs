// Web服务器模块
//
// 对外暴露五个命令（添加 / 暂停 / 继续 / 删除 / 查询状态）以及事件推送。

pub mod handlers;
pub mod state;
pub mod websocket;

pub use handlers::ApiResponse;
pub use state::AppState;

use axum::{
    routing::{get, post},
    Router,
};
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

/// 构建完整路由
pub fn build_router(state: AppState) -> Router {
    let middleware = ServiceBuilder::new()
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        );

    let api_routes = Router::new()
        .route(
            "/downloads",
            get(handlers::list_downloads)
                .post(handlers::add_download)
                .delete(handlers::delete_download),
        )
        .route("/downloads/pause", post(handlers::pause_download))
        .route("/downloads/continue", post(handlers::continue_download))
        .route("/downloads/status", get(handlers::get_download_status))
        .route("/ws", get(websocket::handle_websocket));

    Router::new()
        .nest("/api/v1", api_routes)
        .route("/health", get(handlers::health_check))
        .layer(middleware)
        .with_state(state)
}
