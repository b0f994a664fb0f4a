//! 连接网关
//!
//! WebSocket 入口：反序列化客户端消息并分发，维持心跳，向连接推送和广播事件。

pub mod connection;
pub mod methods;
pub mod server;
pub mod types;

use std::sync::Arc;
use std::time::Instant;
use tokio::sync::broadcast;

use crate::pty::manager::PtyManager;
use crate::store::SessionStore;
use crate::terminal::editor::EditorLauncher;

pub use connection::{ClientSender, ConnectionRegistry, Outbound};
pub use methods::Dispatcher;
pub use server::{build_router, serve};
pub use types::{ClientMessage, ServerEvent};

/// 进程级广播频道的容量
pub const EVENT_CAPACITY: usize = 1024;

/// 所有连接共享的服务状态
#[derive(Clone)]
pub struct AppState {
    pub manager: PtyManager,
    pub store: Arc<dyn SessionStore>,
    pub registry: ConnectionRegistry,
    /// 发往所有连接的事件
    pub events: broadcast::Sender<ServerEvent>,
    pub editor: Arc<dyn EditorLauncher>,
    pub started: Instant,
}

impl AppState {
    pub fn new(
        manager: PtyManager,
        store: Arc<dyn SessionStore>,
        events: broadcast::Sender<ServerEvent>,
        editor: Arc<dyn EditorLauncher>,
    ) -> Self {
        Self {
            manager,
            store,
            registry: ConnectionRegistry::new(),
            events,
            editor,
            started: Instant::now(),
        }
    }

    /// 广播给所有连接；没有订阅者时丢弃
    pub fn broadcast(&self, event: ServerEvent) {
        let kind = event.kind();
        if self.events.send(event).is_err() {
            tracing::debug!("没有订阅者，丢弃广播 {}", kind);
        }
    }
}
