//! 协议数据类型定义
//!
//! 定义客户端消息、服务端事件以及它们共享的数据结构。
//! 所有消息都是带 `type` 标签的 JSON 文本帧，字段使用 camelCase。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// 连接 ID
pub type ConnectionId = String;

/// 终端尺寸
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct TermSize {
    pub cols: u16,
    pub rows: u16,
}

impl Default for TermSize {
    fn default() -> Self {
        Self { cols: 80, rows: 24 }
    }
}

impl TermSize {
    pub fn new(cols: u16, rows: u16) -> Self {
        Self {
            cols: cols.max(1),
            rows: rows.max(1),
        }
    }
}

/// 创建终端请求
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CreateTerminal {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cols: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rows: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub env: Option<HashMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub args: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logging: Option<bool>,
}

/// 控制台会话元数据（由存储协作方持久化）
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ConsoleSession {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

/// 控制台分组
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ConsoleGroup {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub position: i32,
    #[serde(default)]
    pub collapsed: bool,
}

/// 转录文件元数据（从文件尾部提取）
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TranscriptMeta {
    pub session_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preview: Option<String>,
}

/// 错误载荷
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ErrorPayload {
    pub code: String,
    pub message: String,
    pub recoverable: bool,
}

/// 运行环境诊断信息
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EnvDiagnostics {
    pub os: String,
    pub arch: String,
    pub default_shell: String,
    pub shell_kind: String,
    pub multiplexer_available: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub multiplexer_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub home_dir: Option<String>,
    pub username: String,
    pub hostname: String,
    pub server_cwd: String,
    pub orphan_timeout_ms: u64,
    pub terminals: usize,
}

/// 健康检查结果
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    pub status: String,
    pub uptime_secs: u64,
    pub terminals: usize,
    pub connections: usize,
}

// ============ 客户端消息 ============

/// 客户端消息（封闭的标签联合）
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all_fields = "camelCase")]
pub enum ClientMessage {
    #[serde(rename = "ping")]
    Ping,

    #[serde(rename = "console:list")]
    ListConsoles,
    #[serde(rename = "console:save")]
    SaveConsole { session: ConsoleSession },
    #[serde(rename = "console:delete")]
    DeleteConsole { id: String },
    #[serde(rename = "group:save")]
    SaveGroup { group: ConsoleGroup },
    #[serde(rename = "group:delete")]
    DeleteGroup { id: String },

    #[serde(rename = "pty:create")]
    Create(CreateTerminal),
    #[serde(rename = "pty:input")]
    Input { id: String, data: String },
    #[serde(rename = "pty:resize")]
    Resize { id: String, cols: u16, rows: u16 },
    #[serde(rename = "pty:close")]
    Close { id: String },
    #[serde(rename = "pty:reclaim")]
    Reclaim { ids: Vec<String> },
    #[serde(rename = "pty:sync-active")]
    SyncActive { ids: Vec<String> },

    #[serde(rename = "editor:exec")]
    EditorExec {
        command: String,
        #[serde(default)]
        cwd: Option<String>,
        #[serde(default)]
        request_id: Option<String>,
    },

    #[serde(rename = "scaffold:init")]
    ScaffoldInit { path: String },
    #[serde(rename = "env:diagnostics")]
    Diagnostics,
    #[serde(rename = "health:check")]
    HealthCheck,

    #[serde(rename = "settings:orphan-timeout")]
    SetOrphanTimeout { timeout_ms: u64 },
}

// ============ 服务端事件 ============

/// 服务端事件
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all_fields = "camelCase")]
pub enum ServerEvent {
    #[serde(rename = "pong")]
    Pong,

    #[serde(rename = "console:resumable")]
    Resumable {
        sessions: Vec<ConsoleSession>,
        groups: Vec<ConsoleGroup>,
    },
    #[serde(rename = "console:updated")]
    ConsolesUpdated {
        sessions: Vec<ConsoleSession>,
        groups: Vec<ConsoleGroup>,
    },

    #[serde(rename = "pty:created")]
    Created {
        id: String,
        reclaimed: bool,
        cwd: String,
        multiplexed: bool,
    },
    #[serde(rename = "pty:output")]
    Output { id: String, data: String },
    #[serde(rename = "pty:exit")]
    Exit { id: String, exit_code: Option<u32> },
    #[serde(rename = "pty:error")]
    PtyError {
        id: String,
        #[serde(flatten)]
        error: ErrorPayload,
    },
    #[serde(rename = "pty:spawn-fallback")]
    SpawnFallback {
        id: String,
        original_command: String,
        fallback_shell: String,
        reason: String,
    },
    #[serde(rename = "pty:cwd-change")]
    CwdChange { id: String, cwd: String },
    #[serde(rename = "pty:died")]
    Died { id: String, exit_code: Option<u32> },

    #[serde(rename = "editor:result")]
    EditorResult {
        request_id: Option<String>,
        success: bool,
        error: Option<ErrorPayload>,
    },
    #[serde(rename = "scaffold:result")]
    ScaffoldResult { path: String, created: Vec<String> },
    #[serde(rename = "env:diagnostics")]
    Diagnostics(EnvDiagnostics),
    #[serde(rename = "health")]
    Health(HealthReport),
    #[serde(rename = "settings:orphan-timeout")]
    OrphanTimeout { timeout_ms: u64 },

    #[serde(rename = "transcript:created")]
    TranscriptCreated { path: String, meta: TranscriptMeta },
    #[serde(rename = "transcript:updated")]
    TranscriptUpdated { path: String, meta: TranscriptMeta },
    #[serde(rename = "transcript:deleted")]
    TranscriptDeleted { path: String },

    #[serde(rename = "error")]
    Error(ErrorPayload),
}

impl ServerEvent {
    /// 事件的 `type` 标签，用于日志
    pub fn kind(&self) -> &'static str {
        match self {
            ServerEvent::Pong => "pong",
            ServerEvent::Resumable { .. } => "console:resumable",
            ServerEvent::ConsolesUpdated { .. } => "console:updated",
            ServerEvent::Created { .. } => "pty:created",
            ServerEvent::Output { .. } => "pty:output",
            ServerEvent::Exit { .. } => "pty:exit",
            ServerEvent::PtyError { .. } => "pty:error",
            ServerEvent::SpawnFallback { .. } => "pty:spawn-fallback",
            ServerEvent::CwdChange { .. } => "pty:cwd-change",
            ServerEvent::Died { .. } => "pty:died",
            ServerEvent::EditorResult { .. } => "editor:result",
            ServerEvent::ScaffoldResult { .. } => "scaffold:result",
            ServerEvent::Diagnostics(_) => "env:diagnostics",
            ServerEvent::Health(_) => "health",
            ServerEvent::OrphanTimeout { .. } => "settings:orphan-timeout",
            ServerEvent::TranscriptCreated { .. } => "transcript:created",
            ServerEvent::TranscriptUpdated { .. } => "transcript:updated",
            ServerEvent::TranscriptDeleted { .. } => "transcript:deleted",
            ServerEvent::Error(_) => "error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_pty_error_fields_are_top_level() {
        let event = ServerEvent::PtyError {
            id: "t1".to_string(),
            error: ErrorPayload {
                code: "spawn_failed".to_string(),
                message: "m".to_string(),
                recoverable: true,
            },
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(
            value,
            json!({
                "type": "pty:error",
                "id": "t1",
                "code": "spawn_failed",
                "message": "m",
                "recoverable": true
            })
        );
        assert!(value.get("error").is_none());

        let parsed: ServerEvent = serde_json::from_value(value).unwrap();
        assert_eq!(parsed, event);
    }

    #[test]
    fn test_term_size_default() {
        let size = TermSize::default();
        assert_eq!(size.cols, 80);
        assert_eq!(size.rows, 24);
        assert_eq!(TermSize::new(0, 0), TermSize { cols: 1, rows: 1 });
    }

    #[test]
    fn test_parse_create_message() {
        let msg: ClientMessage = serde_json::from_value(json!({
            "type": "pty:create",
            "id": "t1",
            "cwd": "/tmp/proj",
            "cols": 120,
            "rows": 40,
            "command": "htop",
            "args": ["-d", "10"],
            "logging": true
        }))
        .unwrap();

        match msg {
            ClientMessage::Create(req) => {
                assert_eq!(req.id, "t1");
                assert_eq!(req.cwd.as_deref(), Some("/tmp/proj"));
                assert_eq!(req.cols, Some(120));
                assert_eq!(req.command.as_deref(), Some("htop"));
                assert_eq!(req.args, Some(vec!["-d".to_string(), "10".to_string()]));
                assert_eq!(req.logging, Some(true));
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[test]
    fn test_parse_minimal_create() {
        let msg: ClientMessage =
            serde_json::from_value(json!({"type": "pty:create", "id": "t2"})).unwrap();
        assert_eq!(
            msg,
            ClientMessage::Create(CreateTerminal {
                id: "t2".to_string(),
                ..Default::default()
            })
        );
    }

    #[test]
    fn test_parse_camel_case_fields() {
        let msg: ClientMessage = serde_json::from_value(json!({
            "type": "settings:orphan-timeout",
            "timeoutMs": 5000
        }))
        .unwrap();
        assert_eq!(msg, ClientMessage::SetOrphanTimeout { timeout_ms: 5000 });

        let msg: ClientMessage = serde_json::from_value(json!({
            "type": "editor:exec",
            "command": "code .",
            "requestId": "r1"
        }))
        .unwrap();
        assert_eq!(
            msg,
            ClientMessage::EditorExec {
                command: "code .".to_string(),
                cwd: None,
                request_id: Some("r1".to_string()),
            }
        );
    }

    #[test]
    fn test_unknown_type_is_rejected() {
        let result: Result<ClientMessage, _> =
            serde_json::from_value(json!({"type": "pty:explode", "id": "t1"}));
        assert!(result.is_err());

        let result: Result<ClientMessage, _> = serde_json::from_value(json!({"id": "t1"}));
        assert!(result.is_err());
    }

    #[test]
    fn test_missing_required_field_is_rejected() {
        let result: Result<ClientMessage, _> =
            serde_json::from_value(json!({"type": "pty:input", "id": "t1"}));
        assert!(result.is_err());
    }

    #[test]
    fn test_server_event_serialization() {
        let event = ServerEvent::SpawnFallback {
            id: "t1".to_string(),
            original_command: "nope".to_string(),
            fallback_shell: "/bin/bash".to_string(),
            reason: "not found".to_string(),
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "pty:spawn-fallback");
        assert_eq!(value["originalCommand"], "nope");
        assert_eq!(value["fallbackShell"], "/bin/bash");
        assert_eq!(event.kind(), "pty:spawn-fallback");
    }

    #[test]
    fn test_created_event_serialization() {
        let event = ServerEvent::Created {
            id: "t1".to_string(),
            reclaimed: false,
            cwd: "/tmp".to_string(),
            multiplexed: false,
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "pty:created");
        assert_eq!(value["reclaimed"], false);
    }

    #[test]
    fn test_newtype_event_flattens_fields() {
        let event = ServerEvent::Health(HealthReport {
            status: "ok".to_string(),
            uptime_secs: 3,
            terminals: 1,
            connections: 2,
        });
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "health");
        assert_eq!(value["uptimeSecs"], 3);
        assert_eq!(value["connections"], 2);
    }

    #[test]
    fn test_console_session_optional_fields() {
        let session: ConsoleSession =
            serde_json::from_value(json!({"id": "s1", "name": "api", "groupId": "g1"})).unwrap();
        assert_eq!(session.group_id.as_deref(), Some("g1"));
        assert!(session.cwd.is_none());

        let value = serde_json::to_value(&session).unwrap();
        assert!(value.get("cwd").is_none());
    }
}
