//! 工作目录跟踪
//!
//! 两个来源：输出流中的 OSC 7 / OSC 1337 序列，以及用户回车后的进程目录查询。

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

use crate::shell::osc::{OscHandler, OscSequence, MAX_PENDING_SEQUENCE};

/// 两次目录查询的最小间隔
pub const LOOKUP_WINDOW: Duration = Duration::from_secs(2);
/// 回车后等待命令生效再查询
pub const LOOKUP_DELAY: Duration = Duration::from_millis(300);

/// 从输出流中提取工作目录
///
/// 跨块的未终止序列保留到下一块再解析。
#[derive(Debug, Default)]
pub struct CwdTracker {
    osc: OscHandler,
    carry: String,
}

impl CwdTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// 输入一段输出文本，返回其中最后一个工作目录
    pub fn feed(&mut self, text: &str) -> Option<String> {
        let mut data = std::mem::take(&mut self.carry);
        data.push_str(text);

        let sequences = self.osc.extract_sequences(&data);
        let parsed_to = sequences.last().map(|s| s.end).unwrap_or(0);

        let latest = sequences
            .into_iter()
            .rev()
            .find_map(|result| match result.sequence {
                OscSequence::WorkingDirectory(path) => Some(path),
                OscSequence::Unknown => None,
            });

        if let Some(start) = self.osc.unterminated_start(&data, parsed_to) {
            if data.len() - start <= MAX_PENDING_SEQUENCE {
                self.carry = data[start..].to_string();
            } else {
                tracing::trace!("丢弃过长的未终止 OSC 序列: {} bytes", data.len() - start);
            }
        }

        latest
    }

    pub fn pending_len(&self) -> usize {
        self.carry.len()
    }
}

/// 目录查询节流：每个终端每个时间窗口至多一次
#[derive(Debug, Clone)]
pub struct LookupThrottle {
    window: Duration,
    last: Arc<Mutex<HashMap<String, Instant>>>,
}

impl LookupThrottle {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// 窗口内已有查询时返回 false
    pub fn try_acquire(&self, terminal_id: &str) -> bool {
        let now = Instant::now();
        let mut last = self.last.lock().unwrap_or_else(|e| e.into_inner());
        match last.get(terminal_id) {
            Some(at) if now.duration_since(*at) < self.window => false,
            _ => {
                last.insert(terminal_id.to_string(), now);
                true
            }
        }
    }

    pub fn forget(&self, terminal_id: &str) {
        self.last
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(terminal_id);
    }
}

impl Default for LookupThrottle {
    fn default() -> Self {
        Self::new(LOOKUP_WINDOW)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tracker_reads_osc7() {
        let mut tracker = CwdTracker::new();
        let cwd = tracker.feed("prompt\x1b]7;file://host/tmp/proj2\x07$ ");
        assert_eq!(cwd.as_deref(), Some("/tmp/proj2"));
        assert_eq!(tracker.pending_len(), 0);
    }

    #[test]
    fn test_tracker_reads_osc1337_with_st() {
        let mut tracker = CwdTracker::new();
        let cwd = tracker.feed("\x1b]1337;CurrentDir=/srv/app\x1b\\");
        assert_eq!(cwd.as_deref(), Some("/srv/app"));
    }

    #[test]
    fn test_tracker_last_sequence_wins() {
        let mut tracker = CwdTracker::new();
        let cwd = tracker.feed("\x1b]7;file:///a\x07\x1b]0;title\x07\x1b]7;file:///b\x07");
        assert_eq!(cwd.as_deref(), Some("/b"));
    }

    #[test]
    fn test_tracker_sequence_split_across_chunks() {
        let mut tracker = CwdTracker::new();
        assert_eq!(tracker.feed("out\x1b]7;file://host/ho"), None);
        assert!(tracker.pending_len() > 0);
        assert_eq!(tracker.feed("me/user\x07").as_deref(), Some("/home/user"));
        assert_eq!(tracker.pending_len(), 0);
    }

    #[test]
    fn test_tracker_split_on_lone_escape() {
        let mut tracker = CwdTracker::new();
        assert_eq!(tracker.feed("abc\x1b"), None);
        assert_eq!(tracker.feed("]7;file:///x\x07").as_deref(), Some("/x"));
    }

    #[test]
    fn test_tracker_drops_oversized_pending() {
        let mut tracker = CwdTracker::new();
        let junk = format!("\x1b]7;file:///{}", "a".repeat(MAX_PENDING_SEQUENCE + 10));
        assert_eq!(tracker.feed(&junk), None);
        assert_eq!(tracker.pending_len(), 0);
    }

    #[test]
    fn test_tracker_ignores_plain_output() {
        let mut tracker = CwdTracker::new();
        assert_eq!(tracker.feed("ls -la\r\ntotal 0\r\n"), None);
        assert_eq!(tracker.pending_len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_throttle_window() {
        let throttle = LookupThrottle::new(LOOKUP_WINDOW);
        assert!(throttle.try_acquire("t1"));
        assert!(!throttle.try_acquire("t1"));
        assert!(throttle.try_acquire("t2"));

        tokio::time::advance(Duration::from_millis(1_999)).await;
        assert!(!throttle.try_acquire("t1"));

        tokio::time::advance(Duration::from_millis(2)).await;
        assert!(throttle.try_acquire("t1"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_throttle_forget() {
        let throttle = LookupThrottle::default();
        assert!(throttle.try_acquire("t1"));
        throttle.forget("t1");
        assert!(throttle.try_acquire("t1"));
    }
}

#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        /// 任意切分位置都能解析出同一个目录
        #[test]
        fn prop_split_anywhere(
            path in "/[a-z]{1,12}(/[a-z]{1,12}){0,3}",
            prefix in "[a-z ]{0,20}",
            cut in 0usize..200,
        ) {
            let full = format!("{}\x1b]7;file://host{}\x07$ ", prefix, path);
            let cut = cut.min(full.len());
            let (a, b) = full.split_at(cut);

            let mut tracker = CwdTracker::new();
            let first = tracker.feed(a);
            let second = tracker.feed(b);
            prop_assert_eq!(first.or(second), Some(path));
        }
    }
}
