//! Shell 集成模块
//!
//! 负责 Shell 检测、环境注入和 OSC 序列解析。

pub mod detect;
pub mod integration;
pub mod osc;

pub use detect::{detect_default_shell, ShellKind};
pub use osc::{OscHandler, OscParseResult, OscSequence};
