use bg_download_manager::{
    config::{AppConfig, PathValidator, DEFAULT_CONFIG_PATH},
    logging, persistence, server, AppState, DownloadManager, EventBus,
};
use std::sync::Arc;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 配置文件不存在或解析失败时使用默认配置
    let config = AppConfig::load_or_default(DEFAULT_CONFIG_PATH).await;

    // 🔥 初始化日志系统（必须保持 _log_guard 存活）
    let _log_guard = logging::init_logging(&config.log);

    info!("bgdl v{} 启动中...", env!("CARGO_PKG_VERSION"));

    config.download.ensure_download_dir_exists()?;
    let dir_check = PathValidator::validate(&config.download.download_dir);
    if !dir_check.valid {
        // 不阻止启动，添加任务时会按存储状态拒绝
        warn!(
            "⚠️  下载目录不可用: {:?}, {}",
            config.download.download_dir, dir_check.message
        );
    }

    let store = persistence::open_store(&config.persistence)?;
    let events = EventBus::default();
    let manager = Arc::new(DownloadManager::new(
        config.download.clone(),
        store,
        events,
    )?);

    let restored = manager.restore_unfinished();
    if restored > 0 {
        info!("已恢复 {} 个未完成任务（暂停状态）", restored);
    }

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let app_state = AppState::new(manager, config);
    let app = server::build_router(app_state.clone());

    info!("服务器启动在: http://{}", addr);
    info!("API 基础路径: http://{}/api/v1", addr);
    info!("WebSocket: ws://{}/api/v1/ws", addr);
    info!("健康检查: http://{}/health", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let server = axum::serve(listener, app);

    tokio::select! {
        result = server => {
            if let Err(e) = result {
                tracing::error!("服务器错误: {}", e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("收到 Ctrl+C，开始优雅关闭...");
        }
    }

    info!("正在停止下载任务...");
    app_state.shutdown().await;
    info!("应用已安全退出");

    Ok(())
}
