//! Shell 检测
//!
//! 检测系统默认 shell 及其类型。

use std::env;
use std::path::Path;

/// Shell 类型（决定注入哪种工作目录钩子）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShellKind {
    Bash,
    Zsh,
    Fish,
    Sh,
    Other,
}

impl ShellKind {
    /// 根据可执行文件路径判断 shell 类型
    pub fn from_path(shell_path: &str) -> Self {
        match get_shell_name(shell_path) {
            "bash" => ShellKind::Bash,
            "zsh" => ShellKind::Zsh,
            "fish" => ShellKind::Fish,
            "sh" | "dash" | "ash" => ShellKind::Sh,
            _ => ShellKind::Other,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ShellKind::Bash => "bash",
            ShellKind::Zsh => "zsh",
            ShellKind::Fish => "fish",
            ShellKind::Sh => "sh",
            ShellKind::Other => "other",
        }
    }
}

/// 检测系统默认 shell
pub fn detect_default_shell() -> String {
    #[cfg(unix)]
    {
        // Unix: 使用 SHELL 环境变量
        env::var("SHELL")
            .ok()
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| "/bin/sh".to_string())
    }

    #[cfg(windows)]
    {
        // Windows: 使用 COMSPEC 环境变量
        env::var("COMSPEC").unwrap_or_else(|_| "cmd.exe".to_string())
    }
}

/// 获取 shell 名称
pub fn get_shell_name(shell_path: &str) -> &str {
    Path::new(shell_path)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("shell")
}
