//! 连接注册表
//!
//! 每个 WebSocket 连接一个出站通道，由写任务串行发送。
//! 注册表只做查找和扇出，不持有套接字本身；心跳超时通过连接句柄直接通知读循环，
//! 不经过可能积压的出站队列。

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, Notify};
use tokio::task::JoinHandle;

use super::types::{ConnectionId, ServerEvent};

/// 写任务的出站指令
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    Event(ServerEvent),
    Ping,
    Close,
}

/// 单个连接的发送端，可以克隆并在多个地方使用
#[derive(Debug, Clone)]
pub struct ClientSender {
    id: ConnectionId,
    tx: mpsc::UnboundedSender<Outbound>,
}

impl ClientSender {
    pub fn new(id: impl Into<ConnectionId>, tx: mpsc::UnboundedSender<Outbound>) -> Self {
        Self { id: id.into(), tx }
    }

    /// 新建发送端和对应的接收端
    pub fn channel(id: impl Into<ConnectionId>) -> (Self, mpsc::UnboundedReceiver<Outbound>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(id, tx), rx)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// 发送事件；连接已关闭时静默丢弃
    pub fn send(&self, event: ServerEvent) -> bool {
        match self.tx.send(Outbound::Event(event)) {
            Ok(()) => true,
            Err(e) => {
                if let Outbound::Event(event) = e.0 {
                    tracing::trace!("连接已关闭，丢弃事件 {}: {}", self.id, event.kind());
                }
                false
            }
        }
    }

    pub fn ping(&self) -> bool {
        self.tx.send(Outbound::Ping).is_ok()
    }

    pub fn close(&self) {
        let _ = self.tx.send(Outbound::Close);
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// 注册后交给连接读循环的句柄
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    alive: Arc<AtomicBool>,
    terminate: Arc<Notify>,
}

impl ConnectionHandle {
    fn new() -> Self {
        Self {
            alive: Arc::new(AtomicBool::new(true)),
            terminate: Arc::new(Notify::new()),
        }
    }

    /// 收到任何入站帧时调用
    pub fn mark_alive(&self) {
        self.alive.store(true, Ordering::SeqCst);
    }

    /// 心跳判定连接失效时完成；通知先于等待到达也不会丢失
    pub async fn terminated(&self) {
        self.terminate.notified().await
    }

    fn terminate(&self) {
        self.terminate.notify_one();
    }
}

struct ConnectionEntry {
    sender: ClientSender,
    handle: ConnectionHandle,
}

/// 所有在线连接
#[derive(Clone, Default)]
pub struct ConnectionRegistry {
    connections: Arc<Mutex<HashMap<ConnectionId, ConnectionEntry>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<ConnectionId, ConnectionEntry>> {
        self.connections.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// 注册连接，返回它的句柄
    pub fn register(&self, sender: ClientSender) -> ConnectionHandle {
        let handle = ConnectionHandle::new();
        let id = sender.id().to_string();
        self.lock().insert(
            id.clone(),
            ConnectionEntry {
                sender,
                handle: handle.clone(),
            },
        );
        tracing::info!("连接已注册: {}", id);
        handle
    }

    pub fn unregister(&self, id: &str) -> bool {
        let removed = self.lock().remove(id).is_some();
        if removed {
            tracing::info!("连接已注销: {}", id);
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// 发给单个连接；未知或已关闭时返回 false
    pub fn send(&self, id: &str, event: ServerEvent) -> bool {
        let sender = self.lock().get(id).map(|entry| entry.sender.clone());
        match sender {
            Some(sender) => sender.send(event),
            None => false,
        }
    }

    /// 发给所有在线连接，返回成功投递的数量
    pub fn broadcast(&self, event: &ServerEvent) -> usize {
        let senders: Vec<ClientSender> = self.lock().values().map(|e| e.sender.clone()).collect();
        senders
            .iter()
            .filter(|sender| sender.send(event.clone()))
            .count()
    }

    /// 心跳一轮：上一轮没有回应的连接被终止，其余发送 ping
    ///
    /// 终止先通知读循环，出站队列里的关闭帧只是尽力而为。
    pub fn heartbeat_tick(&self) -> Vec<ConnectionId> {
        let mut connections = self.lock();
        let mut dead = Vec::new();

        for (id, entry) in connections.iter() {
            if entry.handle.alive.swap(false, Ordering::SeqCst) {
                entry.sender.ping();
            } else {
                dead.push(id.clone());
            }
        }

        for id in &dead {
            if let Some(entry) = connections.remove(id) {
                tracing::warn!("心跳超时，终止连接: {}", id);
                entry.handle.terminate();
                entry.sender.close();
            }
        }

        dead
    }
}

/// 定时心跳
pub fn spawn_heartbeat(registry: ConnectionRegistry, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        // interval 的第一次 tick 立即返回
        ticker.tick().await;
        loop {
            ticker.tick().await;
            registry.heartbeat_tick();
        }
    })
}

/// 把进程级广播频道的事件扇出到所有连接
pub fn spawn_fanout(
    registry: ConnectionRegistry,
    mut events: broadcast::Receiver<ServerEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => {
                    let delivered = registry.broadcast(&event);
                    tracing::debug!("广播 {} -> {} 个连接", event.kind(), delivered);
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!("广播积压，丢弃 {} 条事件", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}
