//! PTY 管理器
//!
//! 管理终端会话的创建、输入、调整大小和关闭，以及连接断开后的孤儿/重新认领。
//!
//! 会话表由一把异步锁保护。所有状态转换（插入、所有权变更、处理器替换与缓冲交付、移除）
//! 都在持锁期间完成，持锁期间不做任何等待；输入只入队到每个会话的写线程。读取线程和退出监控线程通过 `blocking_lock`
//! 进入同一把锁，因此单个进程的输出顺序、缓冲到实时输出的交接都不会错乱。

use std::collections::{HashMap, HashSet};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex};

use crate::gateway::types::{ConnectionId, CreateTerminal, ServerEvent, TermSize};
use crate::shell::detect::{detect_default_shell, ShellKind};
use crate::shell::integration::{build_env, needs_lazy_hook, ZSH_HOOK};
use crate::utils::error::TerminalError;
use crate::utils::text::expand_home;

use super::introspect::{platform_resolver, resolve_with_timeout, CwdResolver, INTROSPECTION_TIMEOUT};
use super::local::{ChildWaiter, ExitInfo, NativeSpawner, PtySpawner, SpawnCommand, SpawnedPty};
use super::logger::{LoggerConfig, SessionLogger};
use super::multiplexer::TmuxBackend;
use super::output::{start_exit_monitor, start_input_writer, start_output_reader, OutputReaderConfig};
use super::session::{DataHandler, ExitHandler, TerminalSession};

/// 关闭后等待进程响应终止信号的时间
pub const CLOSE_GRACE: Duration = Duration::from_secs(1);
/// 重绘提示符时两次尺寸调整的间隔
pub const NUDGE_DELAY: Duration = Duration::from_millis(50);
/// zsh 一直没有输出时安装钩子的兜底时间
pub const HOOK_FALLBACK: Duration = Duration::from_secs(1);

/// 管理器配置
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// 孤儿超时（毫秒），0 表示无限期
    pub orphan_timeout_ms: u64,
    pub default_size: TermSize,
    /// 覆盖检测到的默认 shell
    pub default_shell: Option<String>,
    /// 是否允许使用 tmux 持久化
    pub use_multiplexer: bool,
    pub logger: LoggerConfig,
    /// 服务工作目录，用于 tmux 会话名
    pub server_cwd: PathBuf,
    pub output: OutputReaderConfig,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            orphan_timeout_ms: 30_000,
            default_size: TermSize::default(),
            default_shell: None,
            use_multiplexer: true,
            logger: LoggerConfig::default(),
            server_cwd: std::env::current_dir().unwrap_or_else(|_| PathBuf::from("/")),
            output: OutputReaderConfig::default(),
        }
    }
}

/// 自定义命令启动失败后改用默认 shell
#[derive(Debug, Clone, PartialEq)]
pub struct SpawnFallback {
    pub original_command: String,
    pub fallback_shell: String,
    pub reason: String,
}

/// 创建结果
#[derive(Debug, Clone, PartialEq)]
pub struct CreateOutcome {
    /// 挂载到了已存在的 tmux 会话
    pub reclaimed: bool,
    pub cwd: String,
    pub multiplexed: bool,
    pub fallback: Option<SpawnFallback>,
}

/// 选中的 tmux 后端
struct Backend {
    tmux: Arc<TmuxBackend>,
    name: String,
    existing: bool,
}

struct Inner {
    sessions: Mutex<HashMap<String, TerminalSession>>,
    orphan_timeout_ms: AtomicU64,
    next_generation: AtomicU64,
    spawner: Arc<dyn PtySpawner>,
    resolver: Arc<dyn CwdResolver>,
    tmux: Option<Arc<TmuxBackend>>,
    events: broadcast::Sender<ServerEvent>,
    config: ManagerConfig,
}

/// PTY 管理器
///
/// 克隆开销很小，所有克隆共享同一张会话表。
#[derive(Clone)]
pub struct PtyManager {
    inner: Arc<Inner>,
}

impl PtyManager {
    /// 创建使用系统 PTY 的管理器
    pub fn new(config: ManagerConfig, events: broadcast::Sender<ServerEvent>) -> Self {
        let tmux = config
            .use_multiplexer
            .then(|| Arc::new(TmuxBackend::new(&config.server_cwd)));
        Self::with_parts(config, Arc::new(NativeSpawner), platform_resolver(), tmux, events)
    }

    /// 指定各个协作组件创建管理器
    pub fn with_parts(
        config: ManagerConfig,
        spawner: Arc<dyn PtySpawner>,
        resolver: Arc<dyn CwdResolver>,
        tmux: Option<Arc<TmuxBackend>>,
        events: broadcast::Sender<ServerEvent>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                sessions: Mutex::new(HashMap::new()),
                orphan_timeout_ms: AtomicU64::new(config.orphan_timeout_ms),
                next_generation: AtomicU64::new(0),
                spawner,
                resolver,
                tmux,
                events,
                config,
            }),
        }
    }

    // ============ 孤儿策略 ============

    /// 当前孤儿超时（毫秒），0 表示无限期
    pub fn orphan_timeout(&self) -> u64 {
        self.inner.orphan_timeout_ms.load(Ordering::SeqCst)
    }

    /// 修改孤儿超时；已经在计时的会话不受影响
    pub fn set_orphan_timeout(&self, timeout_ms: u64) {
        let previous = self.inner.orphan_timeout_ms.swap(timeout_ms, Ordering::SeqCst);
        tracing::info!("孤儿超时: {}ms -> {}ms", previous, timeout_ms);
    }

    /// 实际使用的默认 shell
    pub fn default_shell(&self) -> String {
        self.inner
            .config
            .default_shell
            .clone()
            .unwrap_or_else(detect_default_shell)
    }

    /// 服务进程的工作目录，也是未指定目录时的回退
    pub fn server_cwd(&self) -> &Path {
        &self.inner.config.server_cwd
    }

    /// tmux 版本（未配置或不可用时为 None）
    pub async fn multiplexer_version(&self) -> Option<String> {
        match &self.inner.tmux {
            Some(tmux) => tmux.version().await,
            None => None,
        }
    }

    // ============ 创建 ============

    /// 创建终端
    ///
    /// 同一 ID 已有进程时先结束旧进程，保证每个 ID 只有一个存活进程。
    pub async fn create(&self, request: CreateTerminal) -> Result<CreateOutcome, TerminalError> {
        let id = request.id.clone();
        if id.is_empty() {
            return Err(TerminalError::InvalidRequest("终端 ID 为空".to_string()));
        }

        let defaults = self.inner.config.default_size;
        let size = TermSize::new(
            request.cols.unwrap_or(defaults.cols),
            request.rows.unwrap_or(defaults.rows),
        );
        let cwd = self.start_dir(request.cwd.as_deref());
        let shell = self.default_shell();
        let custom = request
            .command
            .clone()
            .filter(|command| !command.trim().is_empty());
        let program = custom.clone().unwrap_or_else(|| shell.clone());
        let args = request.args.clone().unwrap_or_default();
        let env = request.env.as_ref();

        let primary = build_command(&id, &program, args, &cwd, size, env);
        let backend = self.select_backend(&id).await;

        let mut sessions = self.inner.sessions.lock().await;

        if let Some(mut previous) = sessions.remove(&id) {
            tracing::info!("终端已存在，先结束旧进程: {}", id);
            previous.cancel_timers();
            previous.detach();
            previous.kill();
        }

        let (spawned, kind, fallback) =
            match self.spawn(&primary, backend.as_ref(), custom.is_some()) {
                Ok(spawned) => (spawned, ShellKind::from_path(&program), None),
                Err(e) => match &custom {
                    Some(original) => {
                        tracing::warn!("自定义命令启动失败，改用默认 shell {}: {}", id, e);
                        let retry = build_command(&id, &shell, Vec::new(), &cwd, size, env);
                        let spawned = self.spawn(&retry, backend.as_ref(), false)?;
                        let fallback = SpawnFallback {
                            original_command: original.clone(),
                            fallback_shell: shell.clone(),
                            reason: e.to_string(),
                        };
                        (spawned, ShellKind::from_path(&shell), Some(fallback))
                    }
                    None => return Err(e),
                },
            };

        let generation = self.inner.next_generation.fetch_add(1, Ordering::SeqCst) + 1;
        let SpawnedPty {
            process,
            writer,
            reader,
            waiter,
        } = spawned;

        let input = start_input_writer(id.clone(), writer);
        let cwd_display = cwd.to_string_lossy().to_string();
        let mut session = TerminalSession::new(
            id.clone(),
            generation,
            process,
            input,
            cwd_display.clone(),
            size,
            kind,
        );

        let reattached = backend.as_ref().map(|b| b.existing).unwrap_or(false);
        session.tmux_session = backend.map(|b| b.name);

        if request.logging.unwrap_or(false) {
            match SessionLogger::open(&self.inner.config.logger, &id) {
                Ok(logger) => session.logger = Some(logger),
                Err(e) => tracing::warn!("打开会话日志失败 {}: {}", id, e),
            }
        }

        if needs_lazy_hook(kind) && !reattached {
            session.hook_pending = true;
            let manager = self.clone();
            let hook_id = id.clone();
            let timer = tokio::spawn(async move {
                tokio::time::sleep(HOOK_FALLBACK).await;
                manager.install_hook(&hook_id, generation).await;
            });
            session.hook_timer = Some(timer.abort_handle());
        }

        let exited = session.exited.clone();
        let multiplexed = session.tmux_session.is_some();
        sessions.insert(id.clone(), session);
        drop(sessions);

        self.start_pumps(&id, generation, reader, waiter, exited);

        tracing::info!(
            "创建终端 {}: program={}, cwd={}, multiplexed={}",
            id,
            program,
            cwd_display,
            multiplexed
        );

        Ok(CreateOutcome {
            reclaimed: reattached,
            cwd: cwd_display,
            multiplexed,
            fallback,
        })
    }

    /// 起始目录：展开 `~`，目录不存在时退回主目录
    fn start_dir(&self, requested: Option<&str>) -> PathBuf {
        let home = dirs::home_dir().unwrap_or_else(|| self.inner.config.server_cwd.clone());
        match requested.map(str::trim).filter(|s| !s.is_empty()) {
            Some(raw) => {
                let path = expand_home(raw);
                if path.is_dir() {
                    path
                } else {
                    tracing::warn!("工作目录不存在，使用主目录: {}", raw);
                    home
                }
            }
            None => home,
        }
    }

    /// 孤儿策略为无限期且 tmux 可用时使用 tmux
    async fn select_backend(&self, id: &str) -> Option<Backend> {
        if self.orphan_timeout() != 0 {
            return None;
        }
        let tmux = self.inner.tmux.clone()?;
        if !tmux.is_available().await {
            return None;
        }
        let name = tmux.session_name(id);
        let existing = tmux.has_session(&name).await;
        Some(Backend {
            tmux,
            name,
            existing,
        })
    }

    fn spawn(
        &self,
        command: &SpawnCommand,
        backend: Option<&Backend>,
        check_program: bool,
    ) -> Result<SpawnedPty, TerminalError> {
        match backend {
            Some(backend) => {
                // tmux 客户端总能启动成功，需要提前确认内部命令存在
                if check_program && !program_exists(&command.program) {
                    return Err(TerminalError::spawn_failed(&command.program, "command not found"));
                }
                self.inner
                    .spawner
                    .spawn(&backend.tmux.wrap(&backend.name, command))
            }
            None => self.inner.spawner.spawn(command),
        }
    }

    fn start_pumps(
        &self,
        id: &str,
        generation: u64,
        reader: Box<dyn Read + Send>,
        waiter: Box<dyn ChildWaiter>,
        exited: Arc<AtomicBool>,
    ) {
        let config = &self.inner.config.output;

        let inner = self.inner.clone();
        let output_id = id.to_string();
        let (_reader, done) = start_output_reader(id.to_string(), reader, config, move |chunk| {
            inner.on_output(&output_id, generation, chunk)
        });

        let inner = self.inner.clone();
        let exit_id = id.to_string();
        start_exit_monitor(id.to_string(), waiter, done, config, move |exit| {
            exited.store(true, Ordering::SeqCst);
            inner.on_exit(&exit_id, generation, exit)
        });
    }

    async fn install_hook(&self, id: &str, generation: u64) {
        let mut sessions = self.inner.sessions.lock().await;
        if let Some(session) = sessions.get_mut(id) {
            if session.generation == generation && session.hook_pending {
                // 正在运行的就是这个计时器本身，只丢弃句柄
                session.hook_timer.take();
                write_hook(session);
            }
        }
    }

    // ============ 输入与尺寸 ============

    /// 写入终端；未知 ID 直接忽略
    pub async fn write(&self, id: &str, data: &[u8]) -> bool {
        let sessions = self.inner.sessions.lock().await;
        match sessions.get(id) {
            Some(session) => {
                if !session.send_input(data) {
                    tracing::debug!("输入写线程已退出，丢弃输入: {}", id);
                }
                true
            }
            None => false,
        }
    }

    /// 调整终端尺寸；未知 ID 直接忽略
    pub async fn resize(&self, id: &str, cols: u16, rows: u16) -> bool {
        let mut sessions = self.inner.sessions.lock().await;
        match sessions.get_mut(id) {
            Some(session) => {
                let size = TermSize::new(cols, rows);
                session.size = size;
                if let Err(e) = session.process.resize(size) {
                    tracing::debug!("调整终端尺寸失败 {}: {}", id, e);
                }
                true
            }
            None => false,
        }
    }

    /// 先缩小一列再恢复，迫使 shell 重绘提示符
    pub async fn nudge_resize(&self, id: &str, cols: u16, rows: u16) {
        let shrunk = cols.saturating_sub(1).max(1);
        if !self.resize(id, shrunk, rows).await {
            return;
        }
        let manager = self.clone();
        let id = id.to_string();
        tokio::spawn(async move {
            tokio::time::sleep(NUDGE_DELAY).await;
            manager.resize(&id, cols, rows).await;
        });
    }

    // ============ 处理器与所有权 ============

    /// 替换处理器，缓冲的输出先按顺序交给新处理器
    pub async fn set_handlers(&self, id: &str, data: DataHandler, exit: ExitHandler) -> bool {
        let mut sessions = self.inner.sessions.lock().await;
        match sessions.get_mut(id) {
            Some(session) => {
                session.attach(data, exit);
                true
            }
            None => false,
        }
    }

    /// 由某个连接认领终端并挂载处理器
    ///
    /// `bind` 在持锁期间调用，适合先发送 `pty:created` 再返回处理器。
    pub async fn attach<F>(&self, id: &str, owner: &str, bind: F) -> bool
    where
        F: FnOnce(&TerminalSession) -> (DataHandler, ExitHandler),
    {
        let mut sessions = self.inner.sessions.lock().await;
        match sessions.get_mut(id) {
            Some(session) => {
                claim(session, owner, bind);
                true
            }
            None => false,
        }
    }

    /// 只认领当前没有所有者的终端
    pub async fn reclaim_orphan<F>(&self, id: &str, owner: &str, bind: F) -> bool
    where
        F: FnOnce(&TerminalSession) -> (DataHandler, ExitHandler),
    {
        let mut sessions = self.inner.sessions.lock().await;
        match sessions.get_mut(id) {
            Some(session) if session.owner.is_none() => {
                claim(session, owner, bind);
                tracing::info!("重新认领孤儿终端 {} -> {}", id, owner);
                true
            }
            _ => false,
        }
    }

    /// 连接断开：释放它拥有的所有终端
    pub async fn orphan_for_client(&self, owner: &str) -> Vec<String> {
        let timeout_ms = self.orphan_timeout();
        let mut sessions = self.inner.sessions.lock().await;

        let owned: Vec<String> = sessions
            .values()
            .filter(|s| s.owner.as_deref() == Some(owner))
            .map(|s| s.id.clone())
            .collect();

        for id in &owned {
            let Some(session) = sessions.get_mut(id) else {
                continue;
            };
            session.owner = None;
            session.detach();

            if timeout_ms == 0 {
                if session.tmux_session.is_some() {
                    // 只结束本地 tmux 客户端，后端会话保留
                    if let Some(mut local) = sessions.remove(id) {
                        local.cancel_timers();
                        local.kill();
                        tracing::info!("断开 tmux 客户端，后端会话保留: {}", id);
                    }
                } else {
                    tracing::info!("孤儿终端无限期保留: {}", id);
                }
            } else {
                session.cancel_orphan_timer();
                let manager = self.clone();
                let timer_id = id.clone();
                let generation = session.generation;
                let timer = tokio::spawn(async move {
                    tokio::time::sleep(Duration::from_millis(timeout_ms)).await;
                    manager.expire_orphan(&timer_id, generation).await;
                });
                session.orphan_timer = Some(timer.abort_handle());
                tracing::info!("终端成为孤儿，{}ms 后结束: {}", timeout_ms, id);
            }
        }

        owned
    }

    /// 重新认领终端；返回不存在的 ID
    pub async fn reclaim_for_client<F>(&self, owner: &str, ids: &[String], mut bind: F) -> Vec<String>
    where
        F: FnMut(&TerminalSession) -> (DataHandler, ExitHandler),
    {
        let mut sessions = self.inner.sessions.lock().await;
        let mut unknown = Vec::new();

        for id in ids {
            match sessions.get_mut(id) {
                Some(session) => {
                    claim(session, owner, &mut bind);
                    tracing::info!("重新认领终端 {} -> {}", id, owner);
                }
                None => unknown.push(id.clone()),
            }
        }

        unknown
    }

    async fn expire_orphan(&self, id: &str, generation: u64) {
        let removed = {
            let mut sessions = self.inner.sessions.lock().await;
            match sessions.get(id) {
                Some(s) if s.generation == generation && s.owner.is_none() => sessions.remove(id),
                _ => None,
            }
        };

        if let Some(mut session) = removed {
            tracing::info!("孤儿终端超时，结束进程: {}", id);
            // 当前任务就是这个计时器
            session.orphan_timer.take();
            self.teardown(session).await;
        }
    }

    // ============ 关闭 ============

    /// 关闭终端；重复关闭无副作用
    pub async fn close(&self, id: &str) -> bool {
        let removed = self.inner.sessions.lock().await.remove(id);

        match removed {
            Some(session) => {
                tracing::info!("关闭终端: {}", id);
                self.teardown(session).await;
                true
            }
            None => {
                // 孤儿期间已断开的 tmux 会话只剩后端
                if let Some(tmux) = &self.inner.tmux {
                    if tmux.is_available().await {
                        let name = tmux.session_name(id);
                        if tmux.has_session(&name).await {
                            if let Err(e) = tmux.kill_session(&name).await {
                                tracing::debug!("结束 tmux 会话失败 {}: {}", name, e);
                            }
                        }
                    }
                }
                false
            }
        }
    }

    /// 先清空处理器再结束进程，宽限期后仍未退出则强制结束
    async fn teardown(&self, mut session: TerminalSession) {
        session.cancel_timers();
        session.detach();
        session.kill();

        let id = session.id.clone();
        let pid = session.pid;
        let exited = session.exited.clone();
        let tmux_session = session.tmux_session.take();
        drop(session);

        let spawner = self.inner.spawner.clone();
        tokio::spawn(async move {
            tokio::time::sleep(CLOSE_GRACE).await;
            if !exited.load(Ordering::SeqCst) {
                if let Some(pid) = pid {
                    tracing::warn!("进程未响应终止信号，强制结束 {}: {}", id, pid);
                    spawner.force_kill(pid);
                }
            }
        });

        if let (Some(name), Some(tmux)) = (tmux_session, &self.inner.tmux) {
            if let Err(e) = tmux.kill_session(&name).await {
                tracing::debug!("结束 tmux 会话失败 {}: {}", name, e);
            }
        }
    }

    /// 结束客户端不再需要的 tmux 会话
    pub async fn sync_active_terminals(&self, active_ids: &[String]) -> Vec<String> {
        let Some(tmux) = self.inner.tmux.clone() else {
            return Vec::new();
        };
        if !tmux.is_available().await {
            return Vec::new();
        }

        let keep: HashSet<String> = active_ids.iter().map(|id| tmux.session_name(id)).collect();
        let names = match tmux.list_sessions().await {
            Ok(names) => names,
            Err(e) => {
                tracing::warn!("列出 tmux 会话失败: {}", e);
                return Vec::new();
            }
        };

        let stale: Vec<String> = names.into_iter().filter(|n| !keep.contains(n)).collect();

        for name in &stale {
            let local = {
                let mut sessions = self.inner.sessions.lock().await;
                let id = sessions
                    .values()
                    .find(|s| s.tmux_session.as_deref() == Some(name.as_str()))
                    .map(|s| s.id.clone());
                id.and_then(|id| sessions.remove(&id))
            };

            tracing::info!("清理不再使用的 tmux 会话: {}", name);
            match local {
                Some(session) => self.teardown(session).await,
                None => {
                    if let Err(e) = tmux.kill_session(name).await {
                        tracing::warn!("结束 tmux 会话失败 {}: {}", name, e);
                    }
                }
            }
        }

        stale
    }

    /// 服务退出：结束所有本地进程（tmux 后端会话保留）
    pub async fn shutdown(&self) {
        let mut sessions = self.inner.sessions.lock().await;
        let count = sessions.len();
        for (_, mut session) in sessions.drain() {
            session.cancel_timers();
            session.detach();
            session.kill();
        }
        tracing::info!("已结束 {} 个终端", count);
    }

    // ============ 工作目录 ============

    /// 通过操作系统查询终端进程的当前目录
    pub async fn resolve_runtime_cwd(&self, id: &str) -> Option<String> {
        let (pid, tmux_session) = {
            let sessions = self.inner.sessions.lock().await;
            let session = sessions.get(id)?;
            (session.pid, session.tmux_session.clone())
        };

        let result = match (tmux_session, &self.inner.tmux) {
            (Some(name), Some(tmux)) => {
                tokio::time::timeout(INTROSPECTION_TIMEOUT, tmux.pane_current_path(&name))
                    .await
                    .unwrap_or_else(|_| Err(TerminalError::IntrospectionTimeout(name.clone())))
            }
            _ => match pid {
                Some(pid) => {
                    resolve_with_timeout(self.inner.resolver.as_ref(), pid, INTROSPECTION_TIMEOUT)
                        .await
                }
                None => Ok(None),
            },
        };

        match result {
            Ok(cwd) => cwd,
            Err(e) => {
                if !e.is_silent() {
                    tracing::debug!("查询工作目录失败 {}: {}", id, e);
                }
                None
            }
        }
    }

    /// 记录工作目录，值变化时返回 true
    pub async fn record_cwd(&self, id: &str, cwd: &str) -> bool {
        let sessions = self.inner.sessions.lock().await;
        sessions
            .get(id)
            .map(|session| session.cwd.update(cwd))
            .unwrap_or(false)
    }

    // ============ 查询 ============

    pub async fn session_count(&self) -> usize {
        self.inner.sessions.lock().await.len()
    }

    pub async fn contains(&self, id: &str) -> bool {
        self.inner.sessions.lock().await.contains_key(id)
    }

    /// 终端存在且没有所有者
    pub async fn is_orphaned(&self, id: &str) -> bool {
        self.inner
            .sessions
            .lock()
            .await
            .get(id)
            .map(|s| s.owner.is_none())
            .unwrap_or(false)
    }

    pub async fn owner_of(&self, id: &str) -> Option<ConnectionId> {
        self.inner.sessions.lock().await.get(id)?.owner.clone()
    }

    pub async fn pending_len(&self, id: &str) -> usize {
        self.inner
            .sessions
            .lock()
            .await
            .get(id)
            .map(|s| s.pending_len())
            .unwrap_or(0)
    }
}

impl Inner {
    /// 读取线程回调
    fn on_output(&self, id: &str, generation: u64, chunk: &[u8]) {
        let mut sessions = self.sessions.blocking_lock();
        let Some(session) = sessions.get_mut(id) else {
            return;
        };
        if session.generation != generation {
            return;
        }

        session.deliver_output(chunk);

        if session.hook_pending {
            if let Some(timer) = session.hook_timer.take() {
                timer.abort();
            }
            write_hook(session);
        }
    }

    /// 退出监控回调；代数不匹配说明条目已被替换或移除
    fn on_exit(&self, id: &str, generation: u64, exit: ExitInfo) {
        let mut sessions = self.sessions.blocking_lock();
        match sessions.get(id) {
            Some(session) if session.generation == generation => {}
            _ => {
                tracing::debug!("忽略已移除终端的退出事件: {}", id);
                return;
            }
        }
        let Some(mut session) = sessions.remove(id) else {
            return;
        };

        session.cancel_timers();
        match session.take_exit_handler() {
            Some(handler) => handler(exit),
            None if session.owner.is_none() => {
                tracing::warn!("孤儿终端意外退出: {} ({:?})", id, exit.exit_code);
                let _ = self.events.send(ServerEvent::Died {
                    id: id.to_string(),
                    exit_code: exit.exit_code,
                });
            }
            None => {}
        }
    }
}

fn claim<F>(session: &mut TerminalSession, owner: &str, bind: F)
where
    F: FnOnce(&TerminalSession) -> (DataHandler, ExitHandler),
{
    session.cancel_orphan_timer();
    session.owner = Some(owner.to_string());
    let (data, exit) = bind(session);
    session.attach(data, exit);
}

fn write_hook(session: &mut TerminalSession) {
    session.hook_pending = false;
    tracing::debug!("安装 zsh 工作目录钩子: {}", session.id);
    if !session.send_input(ZSH_HOOK.as_bytes()) {
        tracing::warn!("安装 zsh 钩子失败: {}", session.id);
    }
}

fn build_command(
    id: &str,
    program: &str,
    args: Vec<String>,
    cwd: &Path,
    size: TermSize,
    user_env: Option<&HashMap<String, String>>,
) -> SpawnCommand {
    SpawnCommand {
        program: program.to_string(),
        args,
        cwd: Some(cwd.to_path_buf()),
        env: build_env(id, ShellKind::from_path(program), user_env),
        size,
    }
}

/// 命令是否能在 PATH 或给定路径中找到
fn program_exists(program: &str) -> bool {
    if program.contains(std::path::MAIN_SEPARATOR) || program.contains('/') {
        return Path::new(program).is_file();
    }
    std::env::var_os("PATH")
        .map(|paths| std::env::split_paths(&paths).any(|dir| dir.join(program).is_file()))
        .unwrap_or(false)
}
