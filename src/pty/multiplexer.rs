//! tmux 持久化后端
//!
//! 孤儿策略为无限期时，终端通过 `tmux new-session -A` 启动，
//! 进程由 tmux 服务端持有，可以在本服务重启后重新挂载。
//!
//! 会话名：`th-<sha256(服务工作目录) 前 8 位>-<清洗后的终端 ID>`，
//! 同一台机器上不同目录启动的服务互不干扰。

use sha2::{Digest, Sha256};
use std::path::Path;
use std::time::Duration;
use tokio::process::Command;
use tokio::sync::OnceCell;

use super::local::SpawnCommand;
use crate::utils::error::TerminalError;

/// tmux 命令超时
const COMMAND_TIMEOUT: Duration = Duration::from_secs(2);

/// tmux 后端
#[derive(Debug)]
pub struct TmuxBackend {
    binary: String,
    prefix: String,
    /// 首次探测后缓存：`Some(版本)` 表示可用
    lookupd: OnceCell<Option<String>>,
}

impl TmuxBackend {
    pub fn new(server_cwd: &Path) -> Self {
        Self::with_binary("tmux", server_cwd)
    }

    pub fn with_binary(binary: &str, server_cwd: &Path) -> Self {
        Self {
            binary: binary.to_string(),
            prefix: session_prefix(server_cwd),
            lookupd: OnceCell::new(),
        }
    }

    /// 本服务管理的会话名前缀
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// 终端 ID 对应的会话名
    pub fn session_name(&self, terminal_id: &str) -> String {
        format!("{}{}", self.prefix, sanitize_id(terminal_id))
    }

    /// 是否可用（只探测一次）
    pub async fn is_available(&self) -> bool {
        self.version().await.is_some()
    }

    /// tmux 版本
    pub async fn version(&self) -> Option<String> {
        self.lookupd
            .get_or_init(|| async {
                match self.run(&["-V"]).await {
                    Ok(out) => {
                        let version = out.trim().to_string();
                        tracing::info!("检测到多路复用器: {}", version);
                        Some(version)
                    }
                    Err(e) => {
                        tracing::info!("多路复用器不可用: {}", e);
                        None
                    }
                }
            })
            .await
            .clone()
    }

    /// 构造通过 tmux 启动的命令
    ///
    /// 会话已存在时 `-A` 直接挂载，原进程保持不变。
    pub fn wrap(&self, session_name: &str, inner: &SpawnCommand) -> SpawnCommand {
        let mut args = vec![
            "new-session".to_string(),
            "-A".to_string(),
            "-s".to_string(),
            session_name.to_string(),
            "-x".to_string(),
            inner.size.cols.to_string(),
            "-y".to_string(),
            inner.size.rows.to_string(),
        ];

        if let Some(cwd) = &inner.cwd {
            args.push("-c".to_string());
            args.push(cwd.to_string_lossy().to_string());
        }

        // TERM 由 tmux 自己设置
        for (key, value) in inner.env.iter().filter(|(k, _)| k != "TERM") {
            args.push("-e".to_string());
            args.push(format!("{}={}", key, value));
        }

        args.push(inner.program.clone());
        args.extend(inner.args.iter().cloned());

        args.extend(
            [";", "set-option", "-t", session_name, "status", "off"]
                .iter()
                .map(|s| s.to_string()),
        );

        // 服务自身运行在 tmux 里时，客户端会拒绝嵌套启动
        let mut env = inner.env.clone();
        env.push(("TMUX".to_string(), String::new()));

        SpawnCommand {
            program: self.binary.clone(),
            args,
            cwd: inner.cwd.clone(),
            env,
            size: inner.size,
        }
    }

    /// 会话是否存在
    pub async fn has_session(&self, session_name: &str) -> bool {
        self.run(&["has-session", "-t", &exact_target(session_name)])
            .await
            .is_ok()
    }

    /// 结束会话
    pub async fn kill_session(&self, session_name: &str) -> Result<(), TerminalError> {
        self.run(&["kill-session", "-t", &exact_target(session_name)])
            .await
            .map(|_| ())
    }

    /// 本服务前缀下的所有会话名
    pub async fn list_sessions(&self) -> Result<Vec<String>, TerminalError> {
        match self.run(&["list-sessions", "-F", "#{session_name}"]).await {
            Ok(out) => Ok(out
                .lines()
                .map(str::trim)
                .filter(|name| name.starts_with(&self.prefix))
                .map(str::to_string)
                .collect()),
            // 没有 tmux 服务端时等同于空列表
            Err(TerminalError::Multiplexer(msg))
                if msg.contains("no server running") || msg.contains("error connecting") =>
            {
                Ok(Vec::new())
            }
            Err(e) => Err(e),
        }
    }

    /// 会话当前窗格的工作目录
    pub async fn pane_current_path(&self, session_name: &str) -> Result<Option<String>, TerminalError> {
        let out = self
            .run(&[
                "display-message",
                "-p",
                "-t",
                &exact_target(session_name),
                "#{pane_current_path}",
            ])
            .await?;
        let path = out.trim();
        Ok(if path.is_empty() {
            None
        } else {
            Some(path.to_string())
        })
    }

    async fn run(&self, args: &[&str]) -> Result<String, TerminalError> {
        let output = tokio::time::timeout(
            COMMAND_TIMEOUT,
            Command::new(&self.binary).args(args).kill_on_drop(true).output(),
        )
        .await
        .map_err(|_| TerminalError::Multiplexer(format!("{} {} 超时", self.binary, args.join(" "))))?
        .map_err(|e| TerminalError::Multiplexer(format!("{}: {}", self.binary, e)))?;

        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).into_owned())
        } else {
            Err(TerminalError::Multiplexer(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ))
        }
    }
}

/// 由服务工作目录计算会话前缀
pub fn session_prefix(server_cwd: &Path) -> String {
    let digest = Sha256::digest(server_cwd.to_string_lossy().as_bytes());
    let hex: String = digest.iter().map(|b| format!("{:02x}", b)).collect();
    format!("th-{}-", &hex[..8])
}

/// tmux 会话名不能包含 `.` 和 `:`
pub fn sanitize_id(id: &str) -> String {
    id.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// `=` 前缀让 tmux 按名称精确匹配
fn exact_target(session_name: &str) -> String {
    format!("={}", session_name)
}
