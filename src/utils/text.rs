//! 文本与路径工具
//!
//! - UTF-8 分块解码：PTY 读取可能把多字节字符切成两半
//! - `~` 展开：PTY 启动层不做 shell 展开

use std::path::PathBuf;

/// UTF-8 分块解码器
///
/// 保留末尾不完整的多字节字符，和下一块数据拼接后再解码。
#[derive(Debug, Default)]
pub struct Utf8Carry {
    pending: Vec<u8>,
}

impl Utf8Carry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 追加一块原始字节，返回可以安全输出的文本
    pub fn push(&mut self, data: &[u8]) -> String {
        self.pending.extend_from_slice(data);
        let complete = complete_prefix_len(&self.pending);
        let text = String::from_utf8_lossy(&self.pending[..complete]).into_owned();
        self.pending.drain(..complete);
        text
    }

    /// 输出剩余字节（进程退出时调用）
    pub fn flush(&mut self) -> String {
        let text = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        text
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

/// 返回以完整字符结尾的前缀长度
fn complete_prefix_len(bytes: &[u8]) -> usize {
    let len = bytes.len();
    let start = len.saturating_sub(4);

    for i in (start..len).rev() {
        let b = bytes[i];
        // 续字节 10xxxxxx
        if b & 0b1100_0000 == 0b1000_0000 {
            continue;
        }
        let width = if b < 0x80 {
            1
        } else if b & 0b1110_0000 == 0b1100_0000 {
            2
        } else if b & 0b1111_0000 == 0b1110_0000 {
            3
        } else if b & 0b1111_1000 == 0b1111_0000 {
            4
        } else {
            1
        };
        return if i + width > len { i } else { len };
    }

    len
}

/// 展开路径开头的 `~`
pub fn expand_home(path: &str) -> PathBuf {
    if path == "~" {
        if let Some(home) = dirs::home_dir() {
            return home;
        }
    } else if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

/// 按字符数截断
pub fn truncate_chars(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => s[..idx].to_string(),
        None => s.to_string(),
    }
}


#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        /// 任意切分方式都能还原原始文本
        #[test]
        fn prop_carry_reassembles_any_split(text in "\\PC{0,40}", cut in 0usize..200) {
            let bytes = text.as_bytes();
            let cut = cut.min(bytes.len());
            let mut carry = Utf8Carry::new();
            let mut out = carry.push(&bytes[..cut]);
            out.push_str(&carry.push(&bytes[cut..]));
            prop_assert_eq!(out, text);
            prop_assert_eq!(carry.pending_len(), 0);
        }
    }
}
