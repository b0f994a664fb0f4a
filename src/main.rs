//! termhub 服务入口
//!
//! 读取配置，启动 PTY 管理器、元数据存储、转录目录监视和 WebSocket 网关。
//! 用法：`termhub [配置文件路径]`

use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use termhub::config::ServerConfig;
use termhub::gateway::{self, AppState, EVENT_CAPACITY};
use termhub::pty::PtyManager;
use termhub::store::{FileStore, SessionStore};
use termhub::terminal::ProcessLauncher;
use termhub::watcher::SessionFileWatcher;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 日志输出到 stderr
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let config = ServerConfig::load(std::env::args().nth(1))?;
    let addr = config.listen_addr()?;
    tracing::info!("termhub 启动");

    let (events, _) = broadcast::channel(EVENT_CAPACITY);

    let server_cwd = std::env::current_dir()?;
    let manager = PtyManager::new(config.manager_config(server_cwd), events.clone());

    let store: Arc<dyn SessionStore> = match config.store_path() {
        Some(path) => Arc::new(FileStore::open(path).await?),
        None => Arc::new(FileStore::in_memory()),
    };

    // 监视器在 main 结束前一直存活
    let _watcher = match config.watcher_config() {
        Some(watcher_config) => match SessionFileWatcher::start(watcher_config, events.clone()) {
            Ok(watcher) => Some(watcher),
            Err(e) => {
                tracing::warn!("转录目录监视未启动: {}", e);
                None
            }
        },
        None => None,
    };

    let state = AppState::new(manager.clone(), store, events, Arc::new(ProcessLauncher));
    let listener = TcpListener::bind(addr).await?;
    gateway::serve(listener, state, config.heartbeat()).await?;

    manager.shutdown().await;
    tracing::info!("termhub 已退出");
    Ok(())
}
