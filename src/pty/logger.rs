//! 会话输出日志
//!
//! 每个终端一个追加写入的日志文件。超过大小上限时就地轮转，
//! 只保留最近的若干个历史文件。轮转和写入失败只记录警告，不影响终端本身。

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use crate::utils::error::TerminalError;

/// 日志配置
#[derive(Debug, Clone, PartialEq)]
pub struct LoggerConfig {
    pub dir: PathBuf,
    pub max_file_bytes: u64,
    pub max_files: usize,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            dir: dirs::data_local_dir()
                .unwrap_or_else(std::env::temp_dir)
                .join("termhub")
                .join("logs"),
            max_file_bytes: 5 * 1024 * 1024,
            max_files: 5,
        }
    }
}

/// 单个终端的输出日志
pub struct SessionLogger {
    stem: String,
    path: PathBuf,
    file: File,
    written: u64,
    config: LoggerConfig,
}

impl SessionLogger {
    /// 打开（或创建）终端的日志文件
    pub fn open(config: &LoggerConfig, terminal_id: &str) -> Result<Self, TerminalError> {
        fs::create_dir_all(&config.dir)?;

        let stem = sanitize(terminal_id);
        let path = config.dir.join(format!("{}.log", stem));
        let file = open_append(&path)?;
        let written = file.metadata().map(|m| m.len()).unwrap_or(0);

        tracing::debug!("打开会话日志: {}", path.display());

        Ok(Self {
            stem,
            path,
            file,
            written,
            config: config.clone(),
        })
    }

    /// 追加一段输出
    pub fn write(&mut self, data: &[u8]) {
        if data.is_empty() {
            return;
        }

        if self.written > 0 && self.written + data.len() as u64 > self.config.max_file_bytes {
            if let Err(e) = self.rotate() {
                tracing::warn!("会话日志轮转失败 {}: {}", self.path.display(), e);
            }
        }

        match self.file.write_all(data) {
            Ok(()) => self.written += data.len() as u64,
            Err(e) => tracing::warn!("写入会话日志失败 {}: {}", self.path.display(), e),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 当前文件改名为带时间戳和序号的历史文件，然后重新打开
    fn rotate(&mut self) -> io::Result<()> {
        self.file.flush()?;

        let rotated = self.rotated_path()?;
        fs::rename(&self.path, &rotated)?;

        self.file = open_append(&self.path)?;
        self.written = 0;

        self.evict()
    }

    /// 同一毫秒内多次轮转时用序号区分，不覆盖已有文件
    fn rotated_path(&self) -> io::Result<PathBuf> {
        let stamp = chrono::Utc::now().format("%Y%m%d%H%M%S%3f");
        (0..1000u32)
            .map(|seq| {
                self.config
                    .dir
                    .join(format!("{}.{}-{:03}.log", self.stem, stamp, seq))
            })
            .find(|candidate| !candidate.exists())
            .ok_or_else(|| io::Error::new(io::ErrorKind::AlreadyExists, "轮转文件名已用尽"))
    }

    /// 删除超出数量上限的最旧历史文件
    fn evict(&self) -> io::Result<()> {
        let prefix = format!("{}.", self.stem);
        let mut rotated: Vec<PathBuf> = fs::read_dir(&self.config.dir)?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| *path != self.path)
            .filter(|path| {
                path.file_name()
                    .and_then(|n| n.to_str())
                    .map(|n| n.starts_with(&prefix) && n.ends_with(".log"))
                    .unwrap_or(false)
            })
            .collect();

        // 时间戳和序号都定长，按文件名排序即按时间排序
        rotated.sort();

        let keep = self.config.max_files.saturating_sub(1);
        if rotated.len() > keep {
            for old in &rotated[..rotated.len() - keep] {
                if let Err(e) = fs::remove_file(old) {
                    tracing::warn!("删除旧日志失败 {}: {}", old.display(), e);
                }
            }
        }

        Ok(())
    }
}

fn open_append(path: &Path) -> io::Result<File> {
    OpenOptions::new().create(true).append(true).open(path)
}

/// 终端 ID 转为安全的文件名
fn sanitize(id: &str) -> String {
    let cleaned: String = id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() {
        "terminal".to_string()
    } else {
        cleaned
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn config(dir: &TempDir, max_file_bytes: u64, max_files: usize) -> LoggerConfig {
        LoggerConfig {
            dir: dir.path().to_path_buf(),
            max_file_bytes,
            max_files,
        }
    }

    fn log_files(dir: &TempDir) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn test_append_output() {
        let dir = TempDir::new().unwrap();
        let mut logger = SessionLogger::open(&config(&dir, 1024, 3), "t1").unwrap();

        logger.write(b"hello ");
        logger.write(b"world");

        let content = fs::read_to_string(logger.path()).unwrap();
        assert_eq!(content, "hello world");
    }

    #[test]
    fn test_reopen_appends() {
        let dir = TempDir::new().unwrap();
        let cfg = config(&dir, 1024, 3);
        {
            let mut logger = SessionLogger::open(&cfg, "t1").unwrap();
            logger.write(b"first\n");
        }
        let mut logger = SessionLogger::open(&cfg, "t1").unwrap();
        logger.write(b"second\n");

        let content = fs::read_to_string(logger.path()).unwrap();
        assert_eq!(content, "first\nsecond\n");
    }

    #[test]
    fn test_rotation_on_size() {
        let dir = TempDir::new().unwrap();
        let mut logger = SessionLogger::open(&config(&dir, 10, 3), "t1").unwrap();

        logger.write(b"0123456789");
        logger.write(b"abc");

        let files = log_files(&dir);
        assert_eq!(files.len(), 2);
        assert_eq!(fs::read_to_string(logger.path()).unwrap(), "abc");
    }

    #[test]
    fn test_eviction_keeps_max_files() {
        let dir = TempDir::new().unwrap();
        let mut logger = SessionLogger::open(&config(&dir, 4, 3), "t1").unwrap();

        for i in 0..8 {
            logger.write(format!("{:04}", i).as_bytes());
        }

        let files = log_files(&dir);
        assert_eq!(files.len(), 3);
        assert!(files.contains(&"t1.log".to_string()));
        assert_eq!(fs::read_to_string(logger.path()).unwrap(), "0007");
    }

    #[test]
    fn test_rapid_rotations_keep_every_file() {
        let dir = TempDir::new().unwrap();
        let mut logger = SessionLogger::open(&config(&dir, 4, 10), "t1").unwrap();

        // 同一毫秒内多次轮转
        for chunk in [b"aaaa", b"bbbb", b"cccc", b"dddd"] {
            logger.write(chunk);
        }

        let files = log_files(&dir);
        assert_eq!(files.len(), 4);
        let contents: Vec<String> = files
            .iter()
            .filter(|name| name.as_str() != "t1.log")
            .map(|name| fs::read_to_string(dir.path().join(name)).unwrap())
            .collect();
        assert_eq!(contents, vec!["aaaa", "bbbb", "cccc"]);
        assert_eq!(fs::read_to_string(logger.path()).unwrap(), "dddd");
    }

    #[test]
    fn test_eviction_ignores_other_terminals() {
        let dir = TempDir::new().unwrap();
        let cfg = config(&dir, 4, 1);
        let mut other = SessionLogger::open(&cfg, "t10").unwrap();
        other.write(b"keep");

        let mut logger = SessionLogger::open(&cfg, "t1").unwrap();
        logger.write(b"aaaa");
        logger.write(b"bbbb");

        let files = log_files(&dir);
        assert!(files.contains(&"t10.log".to_string()));
        assert!(files.contains(&"t1.log".to_string()));
        assert_eq!(files.len(), 2);
    }

    #[test]
    fn test_sanitize() {
        assert_eq!(sanitize("abc-123_x"), "abc-123_x");
        assert_eq!(sanitize("../etc/passwd"), "___etc_passwd");
        assert_eq!(sanitize(""), "terminal");
    }
}
