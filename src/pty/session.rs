//! PTY 会话
//!
//! 单个终端的状态记录。只由管理器在持锁状态下修改。

use portable_pty::ChildKiller;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::task::AbortHandle;

use crate::gateway::types::{ConnectionId, TermSize};
use crate::shell::detect::ShellKind;

use super::local::{ExitInfo, PtyProcess};
use super::logger::SessionLogger;
use super::output::InputSender;

/// 未挂载处理器时缓冲输出的字节上限
pub const PENDING_OUTPUT_LIMIT: usize = 256 * 1024;

/// 输出处理器
pub type DataHandler = Box<dyn FnMut(&[u8]) + Send>;
/// 退出处理器
pub type ExitHandler = Box<dyn FnOnce(ExitInfo) + Send>;

/// 有上限的输出缓冲，超出时丢弃最旧的字节
#[derive(Debug)]
pub struct PendingOutput {
    buf: Vec<u8>,
    limit: usize,
}

impl PendingOutput {
    pub fn new(limit: usize) -> Self {
        Self {
            buf: Vec::new(),
            limit,
        }
    }

    pub fn push(&mut self, data: &[u8]) {
        if data.len() >= self.limit {
            self.buf.clear();
            self.buf.extend_from_slice(&data[data.len() - self.limit..]);
            return;
        }
        self.buf.extend_from_slice(data);
        if self.buf.len() > self.limit {
            let excess = self.buf.len() - self.limit;
            self.buf.drain(..excess);
        }
    }

    pub fn take(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.buf)
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }
}

impl Default for PendingOutput {
    fn default() -> Self {
        Self::new(PENDING_OUTPUT_LIMIT)
    }
}

/// 最近一次已知的工作目录
///
/// 输出解析（在读取线程中）和目录探测（在异步任务中）都会更新它。
#[derive(Debug, Default)]
pub struct TrackedCwd(Mutex<String>);

impl TrackedCwd {
    pub fn new(cwd: impl Into<String>) -> Self {
        Self(Mutex::new(cwd.into()))
    }

    pub fn get(&self) -> String {
        self.0.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// 值发生变化时返回 true
    pub fn update(&self, cwd: &str) -> bool {
        let mut current = self.0.lock().unwrap_or_else(|e| e.into_inner());
        if *current == cwd {
            false
        } else {
            *current = cwd.to_string();
            true
        }
    }
}

/// PTY 会话
pub struct TerminalSession {
    pub id: String,
    /// 启动代数，区分同一 ID 先后启动的进程
    pub generation: u64,
    pub process: Box<dyn PtyProcess>,
    /// 输入写线程的入队端
    input: InputSender,
    pub killer: Box<dyn ChildKiller + Send + Sync>,
    pub pid: Option<u32>,
    /// 退出监控任务观察到进程结束后置位
    pub exited: Arc<AtomicBool>,
    pub owner: Option<ConnectionId>,
    pub cwd: Arc<TrackedCwd>,
    pub size: TermSize,
    /// 仅在持久化模式下存在
    pub tmux_session: Option<String>,
    pub shell: ShellKind,
    pending: PendingOutput,
    data_handler: Option<DataHandler>,
    exit_handler: Option<ExitHandler>,
    pub logger: Option<SessionLogger>,
    pub orphan_timer: Option<AbortHandle>,
    /// zsh 钩子尚未安装
    pub hook_pending: bool,
    pub hook_timer: Option<AbortHandle>,
}

impl TerminalSession {
    pub fn new(
        id: String,
        generation: u64,
        process: Box<dyn PtyProcess>,
        input: InputSender,
        cwd: String,
        size: TermSize,
        shell: ShellKind,
    ) -> Self {
        let killer = process.killer();
        let pid = process.pid();
        Self {
            id,
            generation,
            process,
            input,
            killer,
            pid,
            exited: Arc::new(AtomicBool::new(false)),
            owner: None,
            cwd: Arc::new(TrackedCwd::new(cwd)),
            size,
            tmux_session: None,
            shell,
            pending: PendingOutput::default(),
            data_handler: None,
            exit_handler: None,
            logger: None,
            orphan_timer: None,
            hook_pending: false,
            hook_timer: None,
        }
    }

    /// 输入入队；写线程已退出时返回 false
    pub fn send_input(&self, data: &[u8]) -> bool {
        self.input.send(data)
    }

    /// 分发一段进程输出：写日志，然后交给处理器或进入缓冲
    pub fn deliver_output(&mut self, data: &[u8]) {
        if let Some(logger) = self.logger.as_mut() {
            logger.write(data);
        }
        match self.data_handler.as_mut() {
            Some(handler) => handler(data),
            None => self.pending.push(data),
        }
    }

    /// 挂载处理器，先按顺序交付缓冲的输出
    pub fn attach(&mut self, mut data: DataHandler, exit: ExitHandler) {
        let backlog = self.pending.take();
        if !backlog.is_empty() {
            data(&backlog);
        }
        self.data_handler = Some(data);
        self.exit_handler = Some(exit);
    }

    pub fn detach(&mut self) {
        self.data_handler = None;
        self.exit_handler = None;
    }

    pub fn is_attached(&self) -> bool {
        self.data_handler.is_some()
    }

    pub fn take_exit_handler(&mut self) -> Option<ExitHandler> {
        self.data_handler = None;
        self.exit_handler.take()
    }

    pub fn has_exited(&self) -> bool {
        self.exited.load(Ordering::SeqCst)
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn cancel_orphan_timer(&mut self) {
        if let Some(timer) = self.orphan_timer.take() {
            timer.abort();
        }
    }

    pub fn cancel_timers(&mut self) {
        self.cancel_orphan_timer();
        if let Some(timer) = self.hook_timer.take() {
            timer.abort();
        }
    }

    /// 终止本地进程（tmux 模式下只结束 tmux 客户端）
    pub fn kill(&mut self) {
        if let Err(e) = self.killer.kill() {
            tracing::debug!("终止进程失败 {}: {}", self.id, e);
        }
    }
}


#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        /// 缓冲内容总是所有输入拼接后的最后 limit 个字节
        #[test]
        fn prop_pending_output_is_suffix(
            chunks in prop::collection::vec(prop::collection::vec(any::<u8>(), 0..64), 0..20),
            limit in 1usize..128,
        ) {
            let mut pending = PendingOutput::new(limit);
            let mut all = Vec::new();
            for chunk in &chunks {
                pending.push(chunk);
                all.extend_from_slice(chunk);
            }
            let start = all.len().saturating_sub(limit);
            prop_assert_eq!(pending.take(), all[start..].to_vec());
        }
    }
}
