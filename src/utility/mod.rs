//! 辅助消息
//!
//! 项目脚手架、环境诊断和健康检查。

pub mod diagnostics;
pub mod scaffold;

pub use diagnostics::{collect as collect_diagnostics, health};
pub use scaffold::init_project;
