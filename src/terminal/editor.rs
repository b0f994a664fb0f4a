//! 外部编辑器调用
//!
//! 命令行按 shell 规则分词（单双引号、反斜杠转义），但不经过 shell 执行。
//! 可执行文件名必须在允许列表中。

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use crate::utils::error::TerminalError;
use crate::utils::text::expand_home;

/// 允许调用的编辑器
pub const EDITOR_ALLOWLIST: &[&str] = &[
    "code",
    "code-insiders",
    "cursor",
    "windsurf",
    "zed",
    "subl",
    "idea",
    "webstorm",
    "pycharm",
    "goland",
    "rustrover",
    "fleet",
    "xed",
];

/// 按 shell 引号规则切分命令行
pub fn tokenize(command: &str) -> Result<Vec<String>, TerminalError> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_token = false;
    let mut chars = command.chars();

    #[derive(PartialEq)]
    enum Quote {
        None,
        Single,
        Double,
    }
    let mut quote = Quote::None;

    while let Some(c) = chars.next() {
        match quote {
            Quote::Single => {
                if c == '\'' {
                    quote = Quote::None;
                } else {
                    current.push(c);
                }
            }
            Quote::Double => match c {
                '"' => quote = Quote::None,
                '\\' => match chars.next() {
                    Some(next @ ('"' | '\\' | '$' | '`')) => current.push(next),
                    Some(next) => {
                        current.push('\\');
                        current.push(next);
                    }
                    None => return Err(unterminated("\\")),
                },
                _ => current.push(c),
            },
            Quote::None => match c {
                '\'' => {
                    quote = Quote::Single;
                    in_token = true;
                }
                '"' => {
                    quote = Quote::Double;
                    in_token = true;
                }
                '\\' => match chars.next() {
                    Some(next) => {
                        current.push(next);
                        in_token = true;
                    }
                    None => return Err(unterminated("\\")),
                },
                c if c.is_whitespace() => {
                    if in_token {
                        tokens.push(std::mem::take(&mut current));
                        in_token = false;
                    }
                }
                _ => {
                    current.push(c);
                    in_token = true;
                }
            },
        }
    }

    match quote {
        Quote::Single => return Err(unterminated("'")),
        Quote::Double => return Err(unterminated("\"")),
        Quote::None => {}
    }

    if in_token {
        tokens.push(current);
    }

    Ok(tokens)
}

fn unterminated(what: &str) -> TerminalError {
    TerminalError::InvalidRequest(format!("命令行中有未闭合的 {}", what))
}

/// 可执行文件名（去掉目录）是否在允许列表中
pub fn is_allowed(program: &str) -> bool {
    Path::new(program)
        .file_name()
        .and_then(|name| name.to_str())
        .map(|name| EDITOR_ALLOWLIST.contains(&name))
        .unwrap_or(false)
}

/// 编辑器启动接口
#[async_trait]
pub trait EditorLauncher: Send + Sync {
    async fn launch(&self, argv: &[String], cwd: Option<&Path>) -> Result<(), TerminalError>;
}

/// 启动真实进程，不等待其结束
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessLauncher;

#[async_trait]
impl EditorLauncher for ProcessLauncher {
    async fn launch(&self, argv: &[String], cwd: Option<&Path>) -> Result<(), TerminalError> {
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| TerminalError::InvalidRequest("命令为空".to_string()))?;

        let mut command = tokio::process::Command::new(program);
        command
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        if let Some(dir) = cwd {
            command.current_dir(dir);
        }

        let mut child = command
            .spawn()
            .map_err(|e| TerminalError::spawn_failed(program, e))?;

        tracing::info!("启动编辑器: {} (pid {:?})", program, child.id());

        // 回收子进程，避免僵尸进程
        let name = program.clone();
        tokio::spawn(async move {
            match child.wait().await {
                Ok(status) => tracing::debug!("编辑器退出 {}: {}", name, status),
                Err(e) => tracing::debug!("等待编辑器失败 {}: {}", name, e),
            }
        });

        Ok(())
    }
}

/// 校验并启动编辑器命令
pub async fn launch_editor(
    launcher: &dyn EditorLauncher,
    command: &str,
    cwd: Option<&str>,
) -> Result<(), TerminalError> {
    let argv = tokenize(command)?;
    let program = argv
        .first()
        .ok_or_else(|| TerminalError::InvalidRequest("命令为空".to_string()))?;

    if !is_allowed(program) {
        tracing::warn!("拒绝调用不在允许列表中的命令: {}", program);
        return Err(TerminalError::disallowed(program));
    }

    let dir: Option<PathBuf> = cwd
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(expand_home)
        .filter(|path| path.is_dir());

    launcher.launch(&argv, dir.as_deref()).await
}
