//! WebSocket 服务器
//!
//! `/ws` 接受客户端连接，`/health` 返回健康检查结果。
//! 每个连接拆成读写两半：写任务串行发送出站队列，读循环逐帧分发。
//! 读循环结束（包括心跳超时）时立即孤儿化会话并中止写任务。

use axum::{
    extract::ws::{Message, WebSocket, WebSocketUpgrade},
    extract::State,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use futures::{Sink, SinkExt, Stream, StreamExt};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tower_http::cors::{Any, CorsLayer};

use crate::utility;

use super::connection::{spawn_fanout, spawn_heartbeat, ClientSender, Outbound};
use super::methods::Dispatcher;
use super::types::{ErrorPayload, ServerEvent};
use super::AppState;

/// 构建路由
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/ws", get(websocket_handler))
        .route("/health", get(health_handler))
        .layer(cors)
        .with_state(state)
}

async fn websocket_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(utility::health(state.started, &state.manager, state.registry.len()).await)
}

/// 单个连接的完整生命周期
pub async fn handle_socket(socket: WebSocket, state: AppState) {
    let connection_id = uuid::Uuid::new_v4().to_string();
    let (sink, stream) = socket.split();

    let (sender, outbound) = ClientSender::channel(connection_id.clone());
    let writer = tokio::spawn(write_outbound(connection_id, sink, outbound));
    run_connection(state, sender, stream, writer).await;
}

/// 写任务：串行发送出站队列，遇到关闭指令或发送失败时结束
async fn write_outbound<S>(connection_id: String, mut sink: S, mut outbound: mpsc::UnboundedReceiver<Outbound>)
where
    S: Sink<Message> + Unpin,
    S::Error: std::fmt::Display,
{
    while let Some(item) = outbound.recv().await {
        let message = match item {
            Outbound::Event(event) => match serde_json::to_string(&event) {
                Ok(json) => Message::Text(json),
                Err(e) => {
                    tracing::error!("[{}] 序列化事件 {} 失败: {}", connection_id, event.kind(), e);
                    continue;
                }
            },
            Outbound::Ping => Message::Ping(Vec::new()),
            Outbound::Close => {
                let _ = sink.send(Message::Close(None)).await;
                break;
            }
        };
        if let Err(e) = sink.send(message).await {
            tracing::debug!("[{}] 发送失败: {}", connection_id, e);
            break;
        }
    }
}

/// 读循环：逐帧分发，直到对端关闭、写任务结束或心跳超时
async fn run_connection<S>(state: AppState, sender: ClientSender, mut stream: S, mut writer: JoinHandle<()>)
where
    S: Stream<Item = Result<Message, axum::Error>> + Unpin,
{
    let connection_id = sender.id().to_string();
    let handle = state.registry.register(sender.clone());
    let dispatcher = Dispatcher::new(state.clone(), sender);

    dispatcher.push_resumable().await;

    loop {
        tokio::select! {
            frame = stream.next() => {
                let message = match frame {
                    Some(Ok(message)) => message,
                    Some(Err(e)) => {
                        tracing::debug!("[{}] 读取失败: {}", connection_id, e);
                        break;
                    }
                    None => break,
                };
                handle.mark_alive();

                match message {
                    Message::Text(text) => dispatcher.handle_text(&text).await,
                    Message::Binary(_) => reject_binary(&state, &connection_id),
                    Message::Close(_) => break,
                    Message::Ping(_) | Message::Pong(_) => {}
                }
            }
            _ = &mut writer => break,
            _ = handle.terminated() => {
                tracing::debug!("[{}] 心跳超时，断开连接", connection_id);
                break;
            }
        }
    }

    dispatcher.disconnect().await;
    state.registry.unregister(&connection_id);
    writer.abort();
}

fn reject_binary(state: &AppState, connection_id: &str) {
    state.registry.send(
        connection_id,
        ServerEvent::Error(ErrorPayload {
            code: "invalid_request".to_string(),
            message: "只接受文本帧".to_string(),
            recoverable: true,
        }),
    );
}

/// 启动服务，收到 Ctrl-C 或 SIGTERM 后优雅退出
pub async fn serve(listener: TcpListener, state: AppState, heartbeat: Duration) -> std::io::Result<()> {
    let fanout = spawn_fanout(state.registry.clone(), state.events.subscribe());
    let heartbeat = spawn_heartbeat(state.registry.clone(), heartbeat);

    if let Ok(addr) = listener.local_addr() {
        tracing::info!("WebSocket 服务: ws://{}/ws", addr);
    }

    let result = axum::serve(listener, build_router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await;

    heartbeat.abort();
    fanout.abort();
    result
}

/// 等待退出信号
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("无法监听 Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
        tracing::info!("收到 Ctrl-C，开始关闭");
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
                tracing::info!("收到 SIGTERM，开始关闭");
            }
            Err(e) => {
                tracing::error!("无法监听 SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pty::local::ExitInfo;
    use crate::pty::session::{DataHandler, ExitHandler};
    use crate::pty::testing::fake_manager;
    use crate::store::FileStore;
    use crate::terminal::editor::ProcessLauncher;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use std::sync::Arc;
    use tower::ServiceExt;

    #[tokio::test]
    async fn test_health_endpoint() {
        let fake = fake_manager(0);
        let state = AppState::new(
            fake.manager.clone(),
            Arc::new(FileStore::in_memory()),
            fake.events.clone(),
            Arc::new(ProcessLauncher),
        );

        let response = build_router(state)
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["status"], "ok");
        assert_eq!(json["connections"], 0);
    }

    #[tokio::test]
    async fn test_silent_backlogged_connection_is_orphaned_by_heartbeat() {
        let fake = fake_manager(5_000);
        let state = AppState::new(
            fake.manager.clone(),
            Arc::new(FileStore::in_memory()),
            fake.events.clone(),
            Arc::new(ProcessLauncher),
        );

        fake.manager
            .create(crate::gateway::types::CreateTerminal {
                id: "t1".to_string(),
                ..Default::default()
            })
            .await
            .unwrap();

        // 半开的对端：不发任何帧，写任务也永远卡住
        let (sender, _outbound) = ClientSender::channel("c1");
        let stream = futures::stream::pending::<Result<Message, axum::Error>>();
        let writer = tokio::spawn(std::future::pending::<()>());
        let task = tokio::spawn(run_connection(state.clone(), sender.clone(), stream, writer));

        while state.registry.is_empty() {
            tokio::task::yield_now().await;
        }
        let data: DataHandler = Box::new(|_: &[u8]| {});
        let exit: ExitHandler = Box::new(|_: ExitInfo| {});
        assert!(fake.manager.attach("t1", "c1", move |_| (data, exit)).await);

        state.registry.heartbeat_tick();
        for _ in 0..10_000 {
            sender.send(ServerEvent::Output {
                id: "t1".to_string(),
                data: "x".repeat(64),
            });
        }
        assert_eq!(state.registry.heartbeat_tick(), vec!["c1".to_string()]);

        tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .unwrap()
            .unwrap();
        assert!(fake.manager.is_orphaned("t1").await);
        assert!(state.registry.is_empty());
    }

    #[tokio::test]
    async fn test_ws_route_requires_upgrade() {
        let fake = fake_manager(0);
        let state = AppState::new(
            fake.manager.clone(),
            Arc::new(FileStore::in_memory()),
            fake.events.clone(),
            Arc::new(ProcessLauncher),
        );

        let response = build_router(state)
            .oneshot(Request::builder().uri("/ws").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert!(response.status().is_client_error());
    }
}
