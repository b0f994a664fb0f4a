//! 本地 PTY 实现
//!
//! 使用 portable-pty 创建伪终端并启动子进程。
//! 启动层抽象为 [`PtySpawner`]，管理器只依赖这一接口。

use portable_pty::{native_pty_system, ChildKiller, CommandBuilder, MasterPty, PtySize};
use std::io::{Read, Write};
use std::path::PathBuf;

use crate::gateway::types::TermSize;
use crate::utils::error::TerminalError;

/// 启动参数
#[derive(Debug, Clone, PartialEq)]
pub struct SpawnCommand {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub env: Vec<(String, String)>,
    pub size: TermSize,
}

/// 进程退出信息
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ExitInfo {
    pub exit_code: Option<u32>,
}

/// 运行中的 PTY 进程句柄
///
/// 写入端不在这里：写入可能阻塞，由独立的写线程持有。
pub trait PtyProcess: Send {
    /// 调整 PTY 大小
    fn resize(&self, size: TermSize) -> Result<(), TerminalError>;
    /// 获取可独立使用的终止器
    fn killer(&self) -> Box<dyn ChildKiller + Send + Sync>;
    /// 子进程 PID
    fn pid(&self) -> Option<u32>;
}

/// 阻塞等待子进程退出
pub trait ChildWaiter: Send {
    fn wait(self: Box<Self>) -> ExitInfo;
}

/// 启动结果：写入端、读取端和退出等待器分离，分别交给不同的任务
pub struct SpawnedPty {
    pub process: Box<dyn PtyProcess>,
    pub writer: Box<dyn Write + Send>,
    pub reader: Box<dyn Read + Send>,
    pub waiter: Box<dyn ChildWaiter>,
}

/// PTY 启动器
pub trait PtySpawner: Send + Sync {
    fn spawn(&self, command: &SpawnCommand) -> Result<SpawnedPty, TerminalError>;

    /// 强制结束没有响应终止信号的进程
    fn force_kill(&self, pid: u32) {
        let _ = pid;
    }
}

fn pty_size(size: TermSize) -> PtySize {
    PtySize {
        rows: size.rows,
        cols: size.cols,
        pixel_width: 0,
        pixel_height: 0,
    }
}

fn io_error(e: impl std::fmt::Display) -> TerminalError {
    TerminalError::IoError(std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))
}

/// 基于系统 PTY 的启动器
#[derive(Debug, Default, Clone, Copy)]
pub struct NativeSpawner;

impl PtySpawner for NativeSpawner {
    fn spawn(&self, command: &SpawnCommand) -> Result<SpawnedPty, TerminalError> {
        let pty_system = native_pty_system();

        let pair = pty_system
            .openpty(pty_size(command.size))
            .map_err(|e| TerminalError::spawn_failed(&command.program, e))?;

        let mut cmd = CommandBuilder::new(&command.program);
        cmd.args(&command.args);

        if let Some(dir) = &command.cwd {
            cmd.cwd(dir);
        }

        for (key, value) in &command.env {
            cmd.env(key, value);
        }

        let child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|e| TerminalError::spawn_failed(&command.program, e))?;

        // 子进程已持有 slave，父进程这端必须关闭，否则读取端永远等不到 EOF
        drop(pair.slave);

        let reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| TerminalError::spawn_failed(&command.program, e))?;
        let writer = pair
            .master
            .take_writer()
            .map_err(|e| TerminalError::spawn_failed(&command.program, e))?;

        let process = LocalPty {
            master: pair.master,
            killer: child.clone_killer(),
            pid: child.process_id(),
        };

        Ok(SpawnedPty {
            process: Box::new(process),
            writer,
            reader,
            waiter: Box::new(NativeWaiter { child }),
        })
    }

    /// portable-pty 的终止器只发送 SIGHUP，这里向整个进程组补发 SIGKILL
    #[cfg(unix)]
    fn force_kill(&self, pid: u32) {
        match kill_process_group(pid) {
            Ok(()) => tracing::info!("强制终止进程组: {}", pid),
            Err(e) if e.raw_os_error() == Some(libc::ESRCH) => {
                tracing::debug!("进程组已退出: {}", pid)
            }
            Err(e) => tracing::warn!("强制终止进程组失败 {}: {}", pid, e),
        }
    }
}

/// 子进程是会话首进程，进程组 ID 等于 PID
#[cfg(unix)]
pub fn kill_process_group(pid: u32) -> std::io::Result<()> {
    let pgid = libc::pid_t::try_from(pid)
        .map_err(|_| std::io::Error::new(std::io::ErrorKind::InvalidInput, "pid 超出范围"))?;
    if pgid <= 1 {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            "拒绝向保留进程组发送信号",
        ));
    }
    // SAFETY: kill 只读取两个整数参数
    let rc = unsafe { libc::kill(-pgid, libc::SIGKILL) };
    if rc == 0 {
        Ok(())
    } else {
        Err(std::io::Error::last_os_error())
    }
}

/// 本地 PTY 实例
pub struct LocalPty {
    /// PTY master
    master: Box<dyn MasterPty + Send>,
    /// 子进程终止器
    killer: Box<dyn ChildKiller + Send + Sync>,
    pid: Option<u32>,
}

impl PtyProcess for LocalPty {
    fn resize(&self, size: TermSize) -> Result<(), TerminalError> {
        self.master.resize(pty_size(size)).map_err(io_error)
    }

    fn killer(&self) -> Box<dyn ChildKiller + Send + Sync> {
        self.killer.clone_killer()
    }

    fn pid(&self) -> Option<u32> {
        self.pid
    }
}

struct NativeWaiter {
    child: Box<dyn portable_pty::Child + Send + Sync>,
}

impl ChildWaiter for NativeWaiter {
    fn wait(mut self: Box<Self>) -> ExitInfo {
        match self.child.wait() {
            Ok(status) => ExitInfo {
                exit_code: Some(status.exit_code()),
            },
            Err(e) => {
                tracing::warn!("等待子进程退出失败: {}", e);
                ExitInfo { exit_code: None }
            }
        }
    }
}
