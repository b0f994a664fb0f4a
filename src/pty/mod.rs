//! PTY 管理模块
//!
//! 负责本地伪终端的创建和管理，以及可选的 tmux 持久化。

pub mod introspect;
pub mod local;
pub mod logger;
pub mod manager;
pub mod multiplexer;
pub mod output;
pub mod session;

#[cfg(test)]
pub mod testing;

pub use local::{ExitInfo, NativeSpawner, PtySpawner, SpawnCommand};
pub use logger::{LoggerConfig, SessionLogger};
pub use manager::{CreateOutcome, ManagerConfig, PtyManager, SpawnFallback};
pub use multiplexer::TmuxBackend;
pub use output::OutputReaderConfig;
pub use session::{DataHandler, ExitHandler, TerminalSession, TrackedCwd};
