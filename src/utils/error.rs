//! 错误类型定义
//!
//! 定义终端服务的错误类型，提供描述性错误消息。
//!
//! ## 功能
//! - 定义 TerminalError 枚举，涵盖 PTY、多路复用器、编辑器调用等错误
//! - 实现错误转换（From trait）
//! - 提供错误分类和辅助方法
//! - 支持转换为线上协议的错误载荷

use crate::gateway::types::ErrorPayload;
use thiserror::Error;

/// 终端错误类型
#[derive(Debug, Error)]
pub enum TerminalError {
    /// PTY 进程启动失败
    #[error("PTY 启动失败: {0}")]
    SpawnFailed(String),

    /// 会话不存在
    #[error("会话不存在: {0}")]
    SessionNotFound(String),

    /// 连接已关闭
    #[error("连接已关闭: {0}")]
    TransportClosed(String),

    /// 命令不在允许列表中
    #[error("命令不被允许: {0}")]
    DisallowedCommand(String),

    /// 进程工作目录查询超时
    #[error("工作目录查询超时: {0}")]
    IntrospectionTimeout(String),

    /// 无效的请求
    #[error("无效的请求: {0}")]
    InvalidRequest(String),

    /// 多路复用器 (tmux) 错误
    #[error("多路复用器错误: {0}")]
    Multiplexer(String),

    /// 文件监视错误
    #[error("文件监视错误: {0}")]
    Watcher(String),

    /// 元数据存储错误
    #[error("存储错误: {0}")]
    Storage(String),

    /// IO 错误
    #[error("IO 错误: {0}")]
    IoError(#[from] std::io::Error),

    /// 序列化错误
    #[error("序列化错误: {0}")]
    SerializationError(#[from] serde_json::Error),
}

impl From<notify::Error> for TerminalError {
    fn from(err: notify::Error) -> Self {
        TerminalError::Watcher(err.to_string())
    }
}

impl From<TerminalError> for ErrorPayload {
    fn from(err: TerminalError) -> Self {
        ErrorPayload {
            code: err.error_type().to_string(),
            message: err.to_string(),
            recoverable: err.is_recoverable(),
        }
    }
}

impl TerminalError {
    /// 获取错误码
    pub fn code(&self) -> i32 {
        match self {
            TerminalError::SpawnFailed(_) => 1001,
            TerminalError::SessionNotFound(_) => 1003,
            TerminalError::InvalidRequest(_) => 1004,
            TerminalError::IoError(_) => 1005,
            TerminalError::SerializationError(_) => 1006,
            TerminalError::TransportClosed(_) => 1009,
            TerminalError::DisallowedCommand(_) => 1014,
            TerminalError::IntrospectionTimeout(_) => 1015,
            TerminalError::Multiplexer(_) => 1016,
            TerminalError::Watcher(_) => 1017,
            TerminalError::Storage(_) => 1018,
        }
    }

    /// 获取错误类型名称
    pub fn error_type(&self) -> &'static str {
        match self {
            TerminalError::SpawnFailed(_) => "spawn_failed",
            TerminalError::SessionNotFound(_) => "unknown_session",
            TerminalError::TransportClosed(_) => "transport_closed",
            TerminalError::DisallowedCommand(_) => "disallowed_command",
            TerminalError::IntrospectionTimeout(_) => "introspection_timeout",
            TerminalError::InvalidRequest(_) => "invalid_request",
            TerminalError::Multiplexer(_) => "multiplexer_error",
            TerminalError::Watcher(_) => "watcher_error",
            TerminalError::Storage(_) => "storage_error",
            TerminalError::IoError(_) => "io_error",
            TerminalError::SerializationError(_) => "serialization_error",
        }
    }

    /// 检查是否为可恢复错误
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            TerminalError::SpawnFailed(_)
                | TerminalError::IntrospectionTimeout(_)
                | TerminalError::TransportClosed(_)
        )
    }

    /// 检查是否应静默丢弃（不向客户端报告）
    pub fn is_silent(&self) -> bool {
        matches!(
            self,
            TerminalError::TransportClosed(_) | TerminalError::IntrospectionTimeout(_)
        )
    }

    /// 创建启动失败错误（包含命令信息）
    pub fn spawn_failed(program: &str, reason: impl std::fmt::Display) -> Self {
        TerminalError::SpawnFailed(format!("{}: {}", program, reason))
    }

    /// 创建命令被拒绝错误
    pub fn disallowed(program: &str) -> Self {
        TerminalError::DisallowedCommand(format!("{} 不在编辑器允许列表中", program))
    }
}
