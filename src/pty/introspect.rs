//! 进程工作目录查询
//!
//! shell 不上报 OSC 7 时，通过操作系统查询进程的当前目录：
//! Linux 读 `/proc/<pid>/cwd`，macOS 调用 `lsof`，其他平台不支持。

use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::utils::error::TerminalError;

/// 查询超时
pub const INTROSPECTION_TIMEOUT: Duration = Duration::from_secs(1);

/// 进程工作目录查询接口
#[async_trait]
pub trait CwdResolver: Send + Sync {
    /// 查询进程当前目录，无法得知时返回 `None`
    async fn resolve(&self, pid: u32) -> Result<Option<String>, TerminalError>;
}

/// 通过 procfs 查询
#[derive(Debug, Clone)]
pub struct ProcfsResolver {
    root: PathBuf,
}

impl ProcfsResolver {
    pub fn new() -> Self {
        Self::with_root("/proc")
    }

    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl Default for ProcfsResolver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CwdResolver for ProcfsResolver {
    async fn resolve(&self, pid: u32) -> Result<Option<String>, TerminalError> {
        let link = self.root.join(pid.to_string()).join("cwd");
        match tokio::fs::read_link(&link).await {
            Ok(path) => Ok(Some(path.to_string_lossy().to_string())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

/// 通过 lsof 查询
#[derive(Debug, Clone, Default)]
pub struct LsofResolver;

#[async_trait]
impl CwdResolver for LsofResolver {
    async fn resolve(&self, pid: u32) -> Result<Option<String>, TerminalError> {
        let output = tokio::process::Command::new("lsof")
            .args(["-a", "-p", &pid.to_string(), "-d", "cwd", "-Fn"])
            .kill_on_drop(true)
            .output()
            .await?;

        if !output.status.success() {
            return Ok(None);
        }

        Ok(parse_lsof_cwd(&String::from_utf8_lossy(&output.stdout)))
    }
}

/// 不支持的平台
#[derive(Debug, Clone, Default)]
pub struct UnsupportedResolver;

#[async_trait]
impl CwdResolver for UnsupportedResolver {
    async fn resolve(&self, _pid: u32) -> Result<Option<String>, TerminalError> {
        Ok(None)
    }
}

/// 当前平台的查询实现
pub fn platform_resolver() -> Arc<dyn CwdResolver> {
    if cfg!(target_os = "linux") {
        Arc::new(ProcfsResolver::new())
    } else if cfg!(target_os = "macos") {
        Arc::new(LsofResolver)
    } else {
        Arc::new(UnsupportedResolver)
    }
}

/// 带超时的查询
pub async fn resolve_with_timeout(
    resolver: &dyn CwdResolver,
    pid: u32,
    timeout: Duration,
) -> Result<Option<String>, TerminalError> {
    tokio::time::timeout(timeout, resolver.resolve(pid))
        .await
        .map_err(|_| TerminalError::IntrospectionTimeout(format!("pid {}", pid)))?
}

/// `lsof -Fn` 输出中 `n` 开头的行是路径
fn parse_lsof_cwd(output: &str) -> Option<String> {
    output
        .lines()
        .find_map(|line| line.strip_prefix('n'))
        .filter(|path| !path.is_empty())
        .map(str::to_string)
}
