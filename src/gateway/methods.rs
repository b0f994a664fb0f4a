//! 消息分发
//!
//! 每个连接一个分发器，按消息类型调用对应的组件。
//! 终端消息交给 [`TerminalSessionHandler`]，元数据消息交给存储，其余在这里直接处理。

use crate::terminal::handler::TerminalSessionHandler;
use crate::utility;
use crate::utils::error::TerminalError;

use super::connection::ClientSender;
use super::types::{ClientMessage, ErrorPayload, ServerEvent};
use super::AppState;

/// 单个连接的消息分发器
pub struct Dispatcher {
    state: AppState,
    sender: ClientSender,
    terminals: TerminalSessionHandler,
}

impl Dispatcher {
    pub fn new(state: AppState, sender: ClientSender) -> Self {
        let terminals =
            TerminalSessionHandler::new(state.manager.clone(), sender.clone(), state.editor.clone());
        Self {
            state,
            sender,
            terminals,
        }
    }

    pub fn connection_id(&self) -> &str {
        self.sender.id()
    }

    /// 推送可恢复的会话和分组列表
    pub async fn push_resumable(&self) {
        match self.snapshot().await {
            Ok((sessions, groups)) => {
                self.sender.send(ServerEvent::Resumable { sessions, groups });
            }
            Err(e) => self.report(e),
        }
    }

    /// 处理一个文本帧；无法识别的消息回报错误后忽略
    pub async fn handle_text(&self, text: &str) {
        match serde_json::from_str::<ClientMessage>(text) {
            Ok(message) => self.dispatch(message).await,
            Err(e) => {
                tracing::warn!("[{}] 无法解析的消息: {}", self.connection_id(), e);
                self.sender.send(ServerEvent::Error(ErrorPayload {
                    code: "invalid_request".to_string(),
                    message: format!("无法解析的消息: {}", e),
                    recoverable: true,
                }));
            }
        }
    }

    pub async fn dispatch(&self, message: ClientMessage) {
        match message {
            ClientMessage::Ping => {
                self.sender.send(ServerEvent::Pong);
            }

            ClientMessage::ListConsoles => self.push_resumable().await,
            ClientMessage::SaveConsole { session } => {
                let result = self.state.store.save_session(session).await;
                self.after_mutation(result).await;
            }
            ClientMessage::DeleteConsole { id } => {
                let result = self.state.store.delete_session(&id).await.map(|_| ());
                self.after_mutation(result).await;
            }
            ClientMessage::SaveGroup { group } => {
                let result = self.state.store.save_group(group).await;
                self.after_mutation(result).await;
            }
            ClientMessage::DeleteGroup { id } => {
                let result = self.state.store.delete_group(&id).await.map(|_| ());
                self.after_mutation(result).await;
            }

            ClientMessage::Create(request) => self.terminals.create(request).await,
            ClientMessage::Input { id, data } => self.terminals.input(&id, &data).await,
            ClientMessage::Resize { id, cols, rows } => self.terminals.resize(&id, cols, rows).await,
            ClientMessage::Close { id } => self.terminals.close(&id).await,
            ClientMessage::Reclaim { ids } => self.terminals.reclaim(&ids).await,
            ClientMessage::SyncActive { ids } => self.terminals.sync_active(&ids).await,

            ClientMessage::EditorExec {
                command,
                cwd,
                request_id,
            } => {
                self.terminals
                    .editor_exec(&command, cwd.as_deref(), request_id)
                    .await
            }

            ClientMessage::ScaffoldInit { path } => match utility::init_project(&path).await {
                Ok(created) => {
                    self.sender.send(ServerEvent::ScaffoldResult { path, created });
                }
                Err(e) => self.report(e),
            },
            ClientMessage::Diagnostics => {
                let diagnostics = utility::collect_diagnostics(&self.state.manager).await;
                self.sender.send(ServerEvent::Diagnostics(diagnostics));
            }
            ClientMessage::HealthCheck => {
                let report = utility::health(
                    self.state.started,
                    &self.state.manager,
                    self.state.registry.len(),
                )
                .await;
                self.sender.send(ServerEvent::Health(report));
            }

            ClientMessage::SetOrphanTimeout { timeout_ms } => {
                self.state.manager.set_orphan_timeout(timeout_ms);
                self.state
                    .broadcast(ServerEvent::OrphanTimeout { timeout_ms });
            }
        }
    }

    /// 连接断开：本连接的终端立即成为孤儿
    pub async fn disconnect(&self) {
        self.terminals.disconnect().await;
    }

    async fn snapshot(
        &self,
    ) -> Result<(Vec<super::types::ConsoleSession>, Vec<super::types::ConsoleGroup>), TerminalError>
    {
        let sessions = self.state.store.sessions().await?;
        let groups = self.state.store.groups().await?;
        Ok((sessions, groups))
    }

    /// 元数据变更成功后广播最新列表
    async fn after_mutation(&self, result: Result<(), TerminalError>) {
        if let Err(e) = result {
            self.report(e);
            return;
        }
        match self.snapshot().await {
            Ok((sessions, groups)) => self
                .state
                .broadcast(ServerEvent::ConsolesUpdated { sessions, groups }),
            Err(e) => self.report(e),
        }
    }

    fn report(&self, err: TerminalError) {
        tracing::warn!("[{}] {}", self.connection_id(), err);
        self.sender.send(ServerEvent::Error(err.into()));
    }
}
