//! 转录文件监视
//!
//! 递归监视转录目录下的 `*.jsonl` 文件，按路径去抖后广播创建/更新/删除事件。

pub mod tail;

use notify::event::{ModifyKind, RenameMode};
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::gateway::types::ServerEvent;
use crate::utils::error::TerminalError;

pub use tail::{extract_meta, read_meta};

/// 默认去抖时间
pub const DEBOUNCE: Duration = Duration::from_millis(250);

/// 文件变化类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Created,
    Updated,
    Deleted,
}

/// 合并同一路径上待处理的变化
///
/// 后来的事件覆盖先前的，但尚未发出的 `Created` 遇到更新仍是 `Created`。
pub fn merge(pending: Option<ChangeKind>, incoming: ChangeKind) -> ChangeKind {
    match (pending, incoming) {
        (Some(ChangeKind::Created), ChangeKind::Updated) => ChangeKind::Created,
        (_, incoming) => incoming,
    }
}

/// 是否为转录文件
pub fn is_transcript(path: &Path) -> bool {
    path.extension().and_then(|e| e.to_str()) == Some("jsonl")
}

/// 把 notify 事件拆成按路径的变化
pub fn changes(event: &Event) -> Vec<(PathBuf, ChangeKind)> {
    let single = |kind: ChangeKind| -> Vec<(PathBuf, ChangeKind)> {
        event.paths.iter().map(|p| (p.clone(), kind)).collect()
    };

    match &event.kind {
        EventKind::Create(_) => single(ChangeKind::Created),
        EventKind::Remove(_) => single(ChangeKind::Deleted),
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => single(ChangeKind::Deleted),
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => single(ChangeKind::Created),
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
            let mut out = Vec::new();
            if let Some(from) = event.paths.first() {
                out.push((from.clone(), ChangeKind::Deleted));
            }
            if let Some(to) = event.paths.get(1) {
                out.push((to.clone(), ChangeKind::Created));
            }
            out
        }
        EventKind::Modify(ModifyKind::Metadata(_)) => Vec::new(),
        EventKind::Modify(_) => single(ChangeKind::Updated),
        _ => Vec::new(),
    }
}

/// 监视配置
#[derive(Debug, Clone)]
pub struct WatcherConfig {
    pub root: PathBuf,
    pub debounce: Duration,
}

/// 转录目录监视器，丢弃即停止
pub struct SessionFileWatcher {
    _watcher: RecommendedWatcher,
    task: JoinHandle<()>,
    root: PathBuf,
}

impl SessionFileWatcher {
    /// 开始监视；目录不存在时返回错误
    pub fn start(
        config: WatcherConfig,
        events: broadcast::Sender<ServerEvent>,
    ) -> Result<Self, TerminalError> {
        if !config.root.is_dir() {
            return Err(TerminalError::Watcher(format!(
                "转录目录不存在: {}",
                config.root.display()
            )));
        }

        let (tx, rx) = mpsc::unbounded_channel();

        let mut watcher = RecommendedWatcher::new(
            move |res: Result<Event, notify::Error>| match res {
                Ok(event) => {
                    for (path, kind) in changes(&event) {
                        if is_transcript(&path) {
                            let _ = tx.send((path, kind));
                        }
                    }
                }
                Err(e) => tracing::warn!("文件监视错误: {}", e),
            },
            Config::default(),
        )?;

        watcher.watch(&config.root, RecursiveMode::Recursive)?;

        let task = spawn_debouncer(rx, config.debounce, events);

        tracing::info!("开始监视转录目录: {}", config.root.display());

        Ok(Self {
            _watcher: watcher,
            task,
            root: config.root,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl Drop for SessionFileWatcher {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// 去抖任务：每条路径静默 `debounce` 之后才发出事件
pub fn spawn_debouncer(
    mut rx: mpsc::UnboundedReceiver<(PathBuf, ChangeKind)>,
    debounce: Duration,
    events: broadcast::Sender<ServerEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut pending: HashMap<PathBuf, (ChangeKind, Instant)> = HashMap::new();

        loop {
            let next_deadline = pending.values().map(|(_, at)| *at).min();

            tokio::select! {
                received = rx.recv() => match received {
                    Some((path, kind)) => {
                        let merged = merge(pending.get(&path).map(|(k, _)| *k), kind);
                        pending.insert(path, (merged, Instant::now() + debounce));
                    }
                    None => break,
                },
                _ = sleep_until(next_deadline) => {
                    let now = Instant::now();
                    let due: Vec<PathBuf> = pending
                        .iter()
                        .filter(|(_, (_, at))| *at <= now)
                        .map(|(path, _)| path.clone())
                        .collect();
                    for path in due {
                        if let Some((kind, _)) = pending.remove(&path) {
                            publish(&events, path, kind).await;
                        }
                    }
                }
            }
        }

        tracing::debug!("转录去抖任务退出");
    })
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

async fn publish(events: &broadcast::Sender<ServerEvent>, path: PathBuf, kind: ChangeKind) {
    let shown = path.to_string_lossy().to_string();

    let event = match kind {
        ChangeKind::Deleted => ServerEvent::TranscriptDeleted { path: shown },
        ChangeKind::Created | ChangeKind::Updated => match read_meta(&path).await {
            Ok(meta) if kind == ChangeKind::Created => ServerEvent::TranscriptCreated {
                path: shown,
                meta,
            },
            Ok(meta) => ServerEvent::TranscriptUpdated {
                path: shown,
                meta,
            },
            Err(e) => {
                tracing::debug!("读取转录文件失败 {}: {}", shown, e);
                return;
            }
        },
    };

    tracing::debug!("转录文件变化: {}", event.kind());
    let _ = events.send(event);
}
