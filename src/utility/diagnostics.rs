//! 运行环境诊断与健康检查

use std::time::Instant;

use crate::gateway::types::{EnvDiagnostics, HealthReport};
use crate::pty::manager::PtyManager;
use crate::shell::detect::ShellKind;

/// 收集运行环境信息
pub async fn collect(manager: &PtyManager) -> EnvDiagnostics {
    let default_shell = manager.default_shell();
    let multiplexer_version = manager.multiplexer_version().await;

    EnvDiagnostics {
        os: std::env::consts::OS.to_string(),
        arch: std::env::consts::ARCH.to_string(),
        shell_kind: ShellKind::from_path(&default_shell).as_str().to_string(),
        default_shell,
        multiplexer_available: multiplexer_version.is_some(),
        multiplexer_version,
        home_dir: dirs::home_dir().map(|p| p.to_string_lossy().to_string()),
        username: whoami::username(),
        hostname: whoami::fallible::hostname().unwrap_or_else(|_| "localhost".to_string()),
        server_cwd: manager.server_cwd().to_string_lossy().to_string(),
        orphan_timeout_ms: manager.orphan_timeout(),
        terminals: manager.session_count().await,
    }
}

/// 健康检查
pub async fn health(started: Instant, manager: &PtyManager, connections: usize) -> HealthReport {
    HealthReport {
        status: "ok".to_string(),
        uptime_secs: started.elapsed().as_secs(),
        terminals: manager.session_count().await,
        connections,
    }
}
