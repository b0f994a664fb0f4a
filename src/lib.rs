//! termhub 库
//!
//! 终端会话复用服务：PTY 进程在 WebSocket 连接断开后继续存活，
//! 客户端重连时可以重新认领。

pub mod config;
pub mod gateway;
pub mod pty;
pub mod shell;
pub mod store;
pub mod terminal;
pub mod utility;
pub mod utils;
pub mod watcher;
