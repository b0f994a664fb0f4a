//! 终端会话处理器
//!
//! 每个连接一个处理器：把 `pty:*` 和 `editor:exec` 消息转换为管理器调用，
//! 并把进程输出、目录变化和退出事件送回本连接。

use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::gateway::connection::ClientSender;
use crate::gateway::types::{CreateTerminal, ServerEvent, TermSize};
use crate::pty::local::ExitInfo;
use crate::pty::manager::PtyManager;
use crate::pty::session::{DataHandler, ExitHandler, TerminalSession};
use crate::utils::error::TerminalError;
use crate::utils::text::Utf8Carry;

use super::cwd::{CwdTracker, LookupThrottle, LOOKUP_DELAY};
use super::editor::{launch_editor, EditorLauncher};

/// 单个连接的终端处理器
#[derive(Clone)]
pub struct TerminalSessionHandler {
    manager: PtyManager,
    sender: ClientSender,
    editor: Arc<dyn EditorLauncher>,
    lookups: LookupThrottle,
    lookup_delay: Duration,
}

impl TerminalSessionHandler {
    pub fn new(manager: PtyManager, sender: ClientSender, editor: Arc<dyn EditorLauncher>) -> Self {
        Self {
            manager,
            sender,
            editor,
            lookups: LookupThrottle::default(),
            lookup_delay: LOOKUP_DELAY,
        }
    }

    pub fn connection_id(&self) -> &str {
        self.sender.id()
    }

    /// 创建终端；同一 ID 的孤儿终端直接认领
    pub async fn create(&self, request: CreateTerminal) {
        let id = request.id.clone();
        let owner = self.connection_id().to_string();

        if self
            .manager
            .reclaim_orphan(&id, &owner, |session| self.announce(session, true))
            .await
        {
            return;
        }

        match self.manager.create(request).await {
            Ok(outcome) => {
                if let Some(fallback) = outcome.fallback {
                    self.sender.send(ServerEvent::SpawnFallback {
                        id: id.clone(),
                        original_command: fallback.original_command,
                        fallback_shell: fallback.fallback_shell,
                        reason: fallback.reason,
                    });
                }

                let reclaimed = outcome.reclaimed;
                let attached = self
                    .manager
                    .attach(&id, &owner, |session| self.announce(session, reclaimed))
                    .await;
                if !attached {
                    tracing::debug!("终端在挂载前已退出: {}", id);
                }
            }
            Err(e) => {
                tracing::warn!("创建终端失败 {}: {}", id, e);
                self.sender.send(ServerEvent::PtyError {
                    id,
                    error: e.into(),
                });
            }
        }
    }

    /// 发送 `pty:created` 并返回本连接的处理器
    fn announce(&self, session: &TerminalSession, reclaimed: bool) -> (DataHandler, ExitHandler) {
        self.sender.send(ServerEvent::Created {
            id: session.id.clone(),
            reclaimed,
            cwd: session.cwd.get(),
            multiplexed: session.tmux_session.is_some(),
        });
        self.handlers(session)
    }

    /// 为会话构建输出和退出处理器
    pub fn handlers(&self, session: &TerminalSession) -> (DataHandler, ExitHandler) {
        let utf8 = Arc::new(Mutex::new(Utf8Carry::new()));
        let mut tracker = CwdTracker::new();
        let tracked = session.cwd.clone();

        let id = session.id.clone();
        let sender = self.sender.clone();
        let carry = utf8.clone();
        let data: DataHandler = Box::new(move |chunk: &[u8]| {
            let text = carry.lock().unwrap_or_else(|e| e.into_inner()).push(chunk);
            if text.is_empty() {
                return;
            }
            let cwd = tracker.feed(&text);
            sender.send(ServerEvent::Output {
                id: id.clone(),
                data: text,
            });
            if let Some(cwd) = cwd {
                if tracked.update(&cwd) {
                    tracing::debug!("工作目录变化 {}: {}", id, cwd);
                    sender.send(ServerEvent::CwdChange {
                        id: id.clone(),
                        cwd,
                    });
                }
            }
        });

        let id = session.id.clone();
        let sender = self.sender.clone();
        let lookups = self.lookups.clone();
        let exit: ExitHandler = Box::new(move |exit: ExitInfo| {
            let rest = utf8.lock().unwrap_or_else(|e| e.into_inner()).flush();
            if !rest.is_empty() {
                sender.send(ServerEvent::Output {
                    id: id.clone(),
                    data: rest,
                });
            }
            lookups.forget(&id);
            sender.send(ServerEvent::Exit {
                id,
                exit_code: exit.exit_code,
            });
        });

        (data, exit)
    }

    /// 写入输入；包含回车时安排一次目录查询
    pub async fn input(&self, id: &str, data: &str) {
        if !self.manager.write(id, data.as_bytes()).await {
            tracing::trace!("忽略未知终端的输入: {}", id);
            return;
        }
        if data.contains('\r') || data.contains('\n') {
            self.schedule_lookup(id);
        }
    }

    fn schedule_lookup(&self, id: &str) {
        if !self.lookups.try_acquire(id) {
            return;
        }
        let manager = self.manager.clone();
        let sender = self.sender.clone();
        let id = id.to_string();
        let delay = self.lookup_delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(cwd) = manager.resolve_runtime_cwd(&id).await {
                if manager.record_cwd(&id, &cwd).await {
                    tracing::debug!("查询到工作目录变化 {}: {}", id, cwd);
                    sender.send(ServerEvent::CwdChange { id, cwd });
                }
            }
        });
    }

    pub async fn resize(&self, id: &str, cols: u16, rows: u16) {
        self.manager.resize(id, cols, rows).await;
    }

    pub async fn close(&self, id: &str) {
        self.lookups.forget(id);
        self.manager.close(id).await;
    }

    /// 重新认领终端；成功的发送 `pty:created` 并重绘提示符，未知的回报错误
    pub async fn reclaim(&self, ids: &[String]) {
        let owner = self.connection_id().to_string();
        let mut reclaimed: Vec<(String, TermSize)> = Vec::new();

        let unknown = self
            .manager
            .reclaim_for_client(&owner, ids, |session| {
                reclaimed.push((session.id.clone(), session.size));
                self.announce(session, true)
            })
            .await;

        for (id, size) in reclaimed {
            self.manager.nudge_resize(&id, size.cols, size.rows).await;
        }

        for id in unknown {
            tracing::info!("无法认领不存在的终端: {}", id);
            self.sender.send(ServerEvent::PtyError {
                id: id.clone(),
                error: TerminalError::SessionNotFound(id).into(),
            });
        }
    }

    pub async fn sync_active(&self, ids: &[String]) {
        let killed = self.manager.sync_active_terminals(ids).await;
        if !killed.is_empty() {
            tracing::info!("已清理 {} 个 tmux 会话", killed.len());
        }
    }

    pub async fn editor_exec(&self, command: &str, cwd: Option<&str>, request_id: Option<String>) {
        let result = launch_editor(self.editor.as_ref(), command, cwd).await;
        let event = match result {
            Ok(()) => ServerEvent::EditorResult {
                request_id,
                success: true,
                error: None,
            },
            Err(e) => ServerEvent::EditorResult {
                request_id,
                success: false,
                error: Some(e.into()),
            },
        };
        self.sender.send(event);
    }

    /// 连接断开：释放本连接的终端
    pub async fn disconnect(&self) {
        let orphaned = self.manager.orphan_for_client(self.connection_id()).await;
        tracing::info!(
            "连接 {} 断开，{} 个终端成为孤儿",
            self.connection_id(),
            orphaned.len()
        );
    }
}
