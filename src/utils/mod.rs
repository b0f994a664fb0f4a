//! 工具模块
//!
//! 提供错误类型和通用工具函数。

pub mod error;
pub mod text;

pub use error::TerminalError;
pub use text::{expand_home, truncate_chars, Utf8Carry};
