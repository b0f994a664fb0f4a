//! 会话元数据存储
//!
//! 保存客户端的终端标签（名称、目录、分组）和分组信息，用于连接时恢复界面。
//! 默认实现是内存表，可选地以 JSON 快照持久化到文件。

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

use crate::gateway::types::{ConsoleGroup, ConsoleSession};
use crate::utils::error::TerminalError;

/// 元数据存储接口
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn sessions(&self) -> Result<Vec<ConsoleSession>, TerminalError>;
    async fn groups(&self) -> Result<Vec<ConsoleGroup>, TerminalError>;
    /// 新增或更新，`updated_at` 由存储填写
    async fn save_session(&self, session: ConsoleSession) -> Result<(), TerminalError>;
    async fn delete_session(&self, id: &str) -> Result<bool, TerminalError>;
    async fn save_group(&self, group: ConsoleGroup) -> Result<(), TerminalError>;
    /// 删除分组，组内会话移出分组
    async fn delete_group(&self, id: &str) -> Result<bool, TerminalError>;
}

#[derive(Debug, Default, Clone, Serialize, Deserialize, PartialEq)]
struct Snapshot {
    #[serde(default)]
    sessions: Vec<ConsoleSession>,
    #[serde(default)]
    groups: Vec<ConsoleGroup>,
}

/// 内存表 + 可选 JSON 快照
pub struct FileStore {
    path: Option<PathBuf>,
    state: Mutex<Snapshot>,
}

impl FileStore {
    /// 不落盘
    pub fn in_memory() -> Self {
        Self {
            path: None,
            state: Mutex::new(Snapshot::default()),
        }
    }

    /// 打开快照文件，不存在时从空表开始
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, TerminalError> {
        let path = path.into();
        let snapshot = match tokio::fs::read_to_string(&path).await {
            Ok(content) if content.trim().is_empty() => Snapshot::default(),
            Ok(content) => serde_json::from_str(&content).map_err(|e| {
                TerminalError::Storage(format!("快照格式错误 {}: {}", path.display(), e))
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Snapshot::default(),
            Err(e) => return Err(e.into()),
        };

        tracing::info!(
            "加载会话元数据 {}: {} 个会话, {} 个分组",
            path.display(),
            snapshot.sessions.len(),
            snapshot.groups.len()
        );

        Ok(Self {
            path: Some(path),
            state: Mutex::new(snapshot),
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// 先写临时文件再改名
    async fn persist(&self, snapshot: &Snapshot) -> Result<(), TerminalError> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let json = serde_json::to_string_pretty(snapshot)?;
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, path).await?;
        Ok(())
    }
}

#[async_trait]
impl SessionStore for FileStore {
    async fn sessions(&self) -> Result<Vec<ConsoleSession>, TerminalError> {
        Ok(self.state.lock().await.sessions.clone())
    }

    async fn groups(&self) -> Result<Vec<ConsoleGroup>, TerminalError> {
        let mut groups = self.state.lock().await.groups.clone();
        groups.sort_by_key(|g| g.position);
        Ok(groups)
    }

    async fn save_session(&self, mut session: ConsoleSession) -> Result<(), TerminalError> {
        if session.id.is_empty() {
            return Err(TerminalError::InvalidRequest("会话 ID 为空".to_string()));
        }
        session.updated_at = Some(Utc::now());

        let mut state = self.state.lock().await;
        match state.sessions.iter_mut().find(|s| s.id == session.id) {
            Some(existing) => *existing = session,
            None => state.sessions.push(session),
        }
        self.persist(&state).await
    }

    async fn delete_session(&self, id: &str) -> Result<bool, TerminalError> {
        let mut state = self.state.lock().await;
        let before = state.sessions.len();
        state.sessions.retain(|s| s.id != id);
        let removed = state.sessions.len() != before;
        if removed {
            self.persist(&state).await?;
        }
        Ok(removed)
    }

    async fn save_group(&self, group: ConsoleGroup) -> Result<(), TerminalError> {
        if group.id.is_empty() {
            return Err(TerminalError::InvalidRequest("分组 ID 为空".to_string()));
        }

        let mut state = self.state.lock().await;
        match state.groups.iter_mut().find(|g| g.id == group.id) {
            Some(existing) => *existing = group,
            None => state.groups.push(group),
        }
        self.persist(&state).await
    }

    async fn delete_group(&self, id: &str) -> Result<bool, TerminalError> {
        let mut state = self.state.lock().await;
        let before = state.groups.len();
        state.groups.retain(|g| g.id != id);
        let removed = state.groups.len() != before;

        for session in state.sessions.iter_mut() {
            if session.group_id.as_deref() == Some(id) {
                session.group_id = None;
            }
        }

        if removed {
            self.persist(&state).await?;
        }
        Ok(removed)
    }
}
