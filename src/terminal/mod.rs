//! 终端会话处理模块
//!
//! 连接与 PTY 管理器之间的一层：消息转换、工作目录跟踪、编辑器调用。

pub mod cwd;
pub mod editor;
pub mod handler;

pub use cwd::{CwdTracker, LookupThrottle};
pub use editor::{EditorLauncher, ProcessLauncher};
pub use handler::TerminalSessionHandler;
