//! 测试用的 PTY 启动器
//!
//! 不创建真实进程：写入的数据原样回显到输出，终止后输出端 EOF、等待器返回。
//! 写入可以被挂起，模拟不读 stdin 的子进程。

use portable_pty::ChildKiller;
use std::io::{Read, Write};
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::{Arc, Condvar, Mutex};

use super::local::{ChildWaiter, ExitInfo, PtyProcess, PtySpawner, SpawnCommand, SpawnedPty};
use crate::gateway::types::TermSize;
use crate::utils::error::TerminalError;

/// 单个假进程的共享状态
#[derive(Debug)]
pub struct FakeProcessState {
    pub command: SpawnCommand,
    pub pid: u32,
    output: Mutex<Option<Sender<Vec<u8>>>>,
    exit: Mutex<Option<Sender<ExitInfo>>>,
    written: Mutex<Vec<u8>>,
    sizes: Mutex<Vec<TermSize>>,
    kills: Mutex<usize>,
    force_kills: Mutex<usize>,
    ignore_hangup: Mutex<bool>,
    stalled: Mutex<bool>,
    unstalled: Condvar,
}

impl FakeProcessState {
    /// 模拟进程输出
    pub fn emit(&self, data: &[u8]) {
        if data.is_empty() {
            return;
        }
        if let Some(tx) = self.output.lock().unwrap().as_ref() {
            let _ = tx.send(data.to_vec());
        }
    }

    /// 模拟进程自然退出
    pub fn exit(&self, code: u32) {
        self.output.lock().unwrap().take();
        if let Some(tx) = self.exit.lock().unwrap().take() {
            let _ = tx.send(ExitInfo {
                exit_code: Some(code),
            });
        }
    }

    pub fn is_alive(&self) -> bool {
        self.exit.lock().unwrap().is_some()
    }

    pub fn written(&self) -> Vec<u8> {
        self.written.lock().unwrap().clone()
    }

    pub fn sizes(&self) -> Vec<TermSize> {
        self.sizes.lock().unwrap().clone()
    }

    pub fn kill_count(&self) -> usize {
        *self.kills.lock().unwrap()
    }

    pub fn force_kill_count(&self) -> usize {
        *self.force_kills.lock().unwrap()
    }

    /// 让进程忽略普通终止信号
    pub fn ignore_hangup(&self) {
        *self.ignore_hangup.lock().unwrap() = true;
    }

    /// 之后的写入一直阻塞，直到 `release_writes` 或进程结束
    pub fn stall_writes(&self) {
        *self.stalled.lock().unwrap() = true;
    }

    pub fn release_writes(&self) {
        *self.stalled.lock().unwrap() = false;
        self.unstalled.notify_all();
    }

    fn wait_writable(&self) {
        let mut stalled = self.stalled.lock().unwrap();
        while *stalled && self.is_alive() {
            stalled = self.unstalled.wait(stalled).unwrap();
        }
    }

    fn hangup(&self) {
        *self.kills.lock().unwrap() += 1;
        if *self.ignore_hangup.lock().unwrap() {
            return;
        }
        self.kill();
    }

    fn kill(&self) {
        self.output.lock().unwrap().take();
        if let Some(tx) = self.exit.lock().unwrap().take() {
            let _ = tx.send(ExitInfo {
                exit_code: Some(129),
            });
        }
        let _stalled = self.stalled.lock().unwrap();
        self.unstalled.notify_all();
    }
}

/// 假启动器
///
/// 程序名以 `/nonexistent` 开头时启动失败。
#[derive(Default)]
pub struct FakeSpawner {
    spawned: Mutex<Vec<Arc<FakeProcessState>>>,
}

impl FakeSpawner {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn spawned(&self) -> Vec<Arc<FakeProcessState>> {
        self.spawned.lock().unwrap().clone()
    }

    pub fn spawn_count(&self) -> usize {
        self.spawned.lock().unwrap().len()
    }

    /// 存活的进程数
    pub fn live_count(&self) -> usize {
        self.spawned
            .lock()
            .unwrap()
            .iter()
            .filter(|p| p.is_alive())
            .count()
    }

    pub fn last(&self) -> Option<Arc<FakeProcessState>> {
        self.spawned.lock().unwrap().last().cloned()
    }
}

impl PtySpawner for FakeSpawner {
    fn spawn(&self, command: &SpawnCommand) -> Result<SpawnedPty, TerminalError> {
        if command.program.starts_with("/nonexistent") {
            return Err(TerminalError::spawn_failed(
                &command.program,
                "No such file or directory",
            ));
        }

        let (out_tx, out_rx) = channel();
        let (exit_tx, exit_rx) = channel();

        let mut spawned = self.spawned.lock().unwrap();
        let state = Arc::new(FakeProcessState {
            command: command.clone(),
            pid: 10_000 + spawned.len() as u32,
            output: Mutex::new(Some(out_tx)),
            exit: Mutex::new(Some(exit_tx)),
            written: Mutex::new(Vec::new()),
            sizes: Mutex::new(vec![command.size]),
            kills: Mutex::new(0),
            force_kills: Mutex::new(0),
            ignore_hangup: Mutex::new(false),
            stalled: Mutex::new(false),
            unstalled: Condvar::new(),
        });
        spawned.push(state.clone());

        Ok(SpawnedPty {
            process: Box::new(FakeProcess {
                state: state.clone(),
            }),
            writer: Box::new(FakeWriter {
                state: state.clone(),
            }),
            reader: Box::new(ChannelReader {
                rx: out_rx,
                pending: Vec::new(),
            }),
            waiter: Box::new(FakeWaiter { rx: exit_rx }),
        })
    }

    fn force_kill(&self, pid: u32) {
        if let Some(state) = self.spawned().into_iter().find(|p| p.pid == pid) {
            *state.force_kills.lock().unwrap() += 1;
            state.kill();
        }
    }
}

struct FakeProcess {
    state: Arc<FakeProcessState>,
}

impl PtyProcess for FakeProcess {
    fn resize(&self, size: TermSize) -> Result<(), TerminalError> {
        self.state.sizes.lock().unwrap().push(size);
        Ok(())
    }

    fn killer(&self) -> Box<dyn ChildKiller + Send + Sync> {
        Box::new(FakeKiller {
            state: self.state.clone(),
        })
    }

    fn pid(&self) -> Option<u32> {
        Some(self.state.pid)
    }
}

struct FakeWriter {
    state: Arc<FakeProcessState>,
}

impl Write for FakeWriter {
    fn write(&mut self, data: &[u8]) -> std::io::Result<usize> {
        self.state.wait_writable();
        if !self.state.is_alive() {
            return Err(std::io::ErrorKind::BrokenPipe.into());
        }
        self.state.written.lock().unwrap().extend_from_slice(data);
        self.state.emit(data);
        Ok(data.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[derive(Debug)]
struct FakeKiller {
    state: Arc<FakeProcessState>,
}

impl ChildKiller for FakeKiller {
    fn kill(&mut self) -> std::io::Result<()> {
        self.state.hangup();
        Ok(())
    }

    fn clone_killer(&self) -> Box<dyn ChildKiller + Send + Sync> {
        Box::new(FakeKiller {
            state: self.state.clone(),
        })
    }
}

struct ChannelReader {
    rx: Receiver<Vec<u8>>,
    pending: Vec<u8>,
}

impl Read for ChannelReader {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        if self.pending.is_empty() {
            match self.rx.recv() {
                Ok(chunk) => self.pending = chunk,
                Err(_) => return Ok(0),
            }
        }
        let n = buf.len().min(self.pending.len());
        buf[..n].copy_from_slice(&self.pending[..n]);
        self.pending.drain(..n);
        Ok(n)
    }
}

struct FakeWaiter {
    rx: Receiver<ExitInfo>,
}

impl ChildWaiter for FakeWaiter {
    fn wait(self: Box<Self>) -> ExitInfo {
        self.rx.recv().unwrap_or_default()
    }
}

/// 使用假启动器的管理器，日志写入临时目录
pub struct FakeManager {
    pub manager: super::manager::PtyManager,
    pub spawner: Arc<FakeSpawner>,
    pub events: tokio::sync::broadcast::Sender<crate::gateway::types::ServerEvent>,
    _logs: tempfile::TempDir,
}

pub fn fake_manager(orphan_timeout_ms: u64) -> FakeManager {
    use super::introspect::UnsupportedResolver;
    use super::logger::LoggerConfig;
    use super::manager::{ManagerConfig, PtyManager};

    let logs = tempfile::TempDir::new().unwrap();
    let (events, _) = tokio::sync::broadcast::channel(64);
    let spawner = FakeSpawner::new();
    let config = ManagerConfig {
        orphan_timeout_ms,
        default_shell: Some("/bin/bash".to_string()),
        use_multiplexer: false,
        logger: LoggerConfig {
            dir: logs.path().to_path_buf(),
            ..Default::default()
        },
        server_cwd: logs.path().to_path_buf(),
        ..Default::default()
    };
    let manager = PtyManager::with_parts(
        config,
        spawner.clone(),
        Arc::new(UnsupportedResolver),
        None,
        events.clone(),
    );
    FakeManager {
        manager,
        spawner,
        events,
        _logs: logs,
    }
}
