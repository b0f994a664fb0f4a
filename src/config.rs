//! 服务配置
//!
//! 加载顺序：`.env` → TOML 文件 → 环境变量覆盖。
//! 配置文件路径依次取命令行第一个参数、`TERMHUB_CONFIG`、当前目录的 `termhub.toml`，
//! 都没有时使用默认值。

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::gateway::types::TermSize;
use crate::pty::logger::LoggerConfig;
use crate::pty::manager::ManagerConfig;
use crate::utils::text::expand_home;
use crate::watcher::WatcherConfig;

/// 默认配置文件名
pub const DEFAULT_CONFIG_FILE: &str = "termhub.toml";

/// 配置错误
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("读取配置文件失败 {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("配置文件格式错误 {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("环境变量 {name} 的值无效: {value}")]
    InvalidEnv { name: String, value: String },

    #[error("监听地址无效: {0}")]
    InvalidAddress(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    pub host: String,
    pub port: u16,
    pub heartbeat_secs: u64,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 7681,
            heartbeat_secs: 30,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TerminalSection {
    pub orphan_timeout_ms: u64,
    pub cols: u16,
    pub rows: u16,
    pub use_multiplexer: bool,
    /// 覆盖检测到的默认 shell
    pub shell: Option<String>,
}

impl Default for TerminalSection {
    fn default() -> Self {
        Self {
            orphan_timeout_ms: 30_000,
            cols: 80,
            rows: 24,
            use_multiplexer: true,
            shell: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    pub dir: Option<String>,
    pub max_file_bytes: u64,
    pub max_files: usize,
}

impl Default for LoggingSection {
    fn default() -> Self {
        let defaults = LoggerConfig::default();
        Self {
            dir: None,
            max_file_bytes: defaults.max_file_bytes,
            max_files: defaults.max_files,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatcherSection {
    pub enabled: bool,
    pub transcript_dir: String,
    pub debounce_ms: u64,
}

impl Default for WatcherSection {
    fn default() -> Self {
        Self {
            enabled: true,
            transcript_dir: "~/.claude/projects".to_string(),
            debounce_ms: 250,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct StoreSection {
    /// 为空时只保存在内存中
    pub path: Option<String>,
}

/// 服务配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ServerConfig {
    pub server: ServerSection,
    pub terminal: TerminalSection,
    pub logging: LoggingSection,
    pub watcher: WatcherSection,
    pub store: StoreSection,
}

impl ServerConfig {
    /// 按默认顺序加载
    pub fn load(cli_path: Option<String>) -> Result<Self, ConfigError> {
        if let Ok(path) = dotenvy::dotenv() {
            tracing::debug!("已加载 {}", path.display());
        }

        let mut config = match resolve_path(cli_path, std::env::var("TERMHUB_CONFIG").ok()) {
            Some(path) => {
                tracing::info!("加载配置文件: {}", path.display());
                Self::from_file(&path)?
            }
            None => Self::default(),
        };

        config.apply_env(|name| std::env::var(name).ok())?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn from_toml(raw: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(raw)
    }

    /// 环境变量覆盖
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup("TERMHUB_HOST") {
            self.server.host = host;
        }
        if let Some(port) = lookup("TERMHUB_PORT") {
            self.server.port = parse_env("TERMHUB_PORT", &port)?;
        }
        if let Some(timeout) = lookup("TERMHUB_ORPHAN_TIMEOUT_MS") {
            self.terminal.orphan_timeout_ms = parse_env("TERMHUB_ORPHAN_TIMEOUT_MS", &timeout)?;
        }
        if let Some(dir) = lookup("TERMHUB_TRANSCRIPT_DIR") {
            self.watcher.transcript_dir = dir;
        }
        if let Some(dir) = lookup("TERMHUB_LOG_DIR") {
            self.logging.dir = Some(dir);
        }
        Ok(())
    }

    pub fn listen_addr(&self) -> Result<SocketAddr, ConfigError> {
        let addr = format!("{}:{}", self.server.host, self.server.port);
        addr.parse()
            .map_err(|_| ConfigError::InvalidAddress(addr.clone()))
    }

    pub fn heartbeat(&self) -> Duration {
        Duration::from_secs(self.server.heartbeat_secs.max(1))
    }

    pub fn logger_config(&self) -> LoggerConfig {
        let defaults = LoggerConfig::default();
        LoggerConfig {
            dir: self
                .logging
                .dir
                .as_deref()
                .map(expand_home)
                .unwrap_or(defaults.dir),
            max_file_bytes: self.logging.max_file_bytes,
            max_files: self.logging.max_files.max(1),
        }
    }

    pub fn manager_config(&self, server_cwd: PathBuf) -> ManagerConfig {
        ManagerConfig {
            orphan_timeout_ms: self.terminal.orphan_timeout_ms,
            default_size: TermSize::new(self.terminal.cols, self.terminal.rows),
            default_shell: self.terminal.shell.clone(),
            use_multiplexer: self.terminal.use_multiplexer,
            logger: self.logger_config(),
            server_cwd,
            ..Default::default()
        }
    }

    pub fn watcher_config(&self) -> Option<WatcherConfig> {
        self.watcher.enabled.then(|| WatcherConfig {
            root: expand_home(&self.watcher.transcript_dir),
            debounce: Duration::from_millis(self.watcher.debounce_ms),
        })
    }

    pub fn store_path(&self) -> Option<PathBuf> {
        self.store
            .path
            .as_deref()
            .filter(|p| !p.trim().is_empty())
            .map(expand_home)
    }
}

/// 配置文件路径：命令行参数优先，其次环境变量，最后当前目录的默认文件
pub fn resolve_path(cli_path: Option<String>, env_path: Option<String>) -> Option<PathBuf> {
    if let Some(path) = cli_path.or(env_path).filter(|p| !p.is_empty()) {
        return Some(expand_home(&path));
    }
    let local = PathBuf::from(DEFAULT_CONFIG_FILE);
    local.is_file().then_some(local)
}

fn parse_env<T: std::str::FromStr>(name: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidEnv {
        name: name.to_string(),
        value: value.to_string(),
    })
}
