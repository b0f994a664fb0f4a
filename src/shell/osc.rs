//! OSC 序列处理
//!
//! 从终端输出中识别工作目录通知。
//!
//! ## OSC 序列格式
//!
//! OSC (Operating System Command) 序列的格式为:
//! - `ESC ] Ps ; Pt BEL` 或 `ESC ] Ps ; Pt ST`
//! - ESC = 0x1B, BEL = 0x07, ST = ESC \
//!
//! ## 支持的序列
//!
//! - OSC 7: 工作目录通知 (`file://hostname/path`)
//! - OSC 1337: iTerm2 风格的 `CurrentDir=/path`

/// BEL 字符 (终止符)
const BEL: char = '\x07';
/// OSC 起始序列
const OSC_START: &str = "\x1b]";
/// ST 终止序列 (ESC \)
const ST: &str = "\x1b\\";

/// 未终止序列的最大保留长度，超过后视为垃圾数据丢弃
pub const MAX_PENDING_SEQUENCE: usize = 4096;

/// OSC 序列类型
#[derive(Debug, Clone, PartialEq)]
pub enum OscSequence {
    /// 工作目录（来自 OSC 7 或 OSC 1337）
    WorkingDirectory(String),
    /// 未知或无效序列
    Unknown,
}

/// OSC 解析结果
#[derive(Debug, Clone)]
pub struct OscParseResult {
    /// 解析出的 OSC 序列
    pub sequence: OscSequence,
    /// 原始 OSC 序列在输入中的起始位置
    pub start: usize,
    /// 原始 OSC 序列在输入中的结束位置（不包含）
    pub end: usize,
}

/// OSC 处理器
///
/// 负责从终端输出流中检测和解析 OSC 序列。
#[derive(Debug, Default, Clone, Copy)]
pub struct OscHandler;

impl OscHandler {
    /// 创建新的 OSC 处理器
    pub fn new() -> Self {
        Self
    }

    /// 解析 OSC 序列内容
    ///
    /// 输入应该是去掉了 `ESC ]` 前缀和 `BEL`/`ST` 后缀的内容。
    ///
    /// # 示例
    ///
    /// ```
    /// use termhub::shell::osc::{OscHandler, OscSequence};
    ///
    /// let handler = OscHandler::new();
    /// let result = handler.parse("7;file://localhost/home/user");
    /// assert_eq!(result, OscSequence::WorkingDirectory("/home/user".to_string()));
    /// ```
    pub fn parse(&self, data: &str) -> OscSequence {
        if data.is_empty() {
            return OscSequence::Unknown;
        }

        // OSC 7: 工作目录
        if let Some(rest) = data.strip_prefix("7;") {
            if let Some(path) = self.parse_file_url(rest) {
                return OscSequence::WorkingDirectory(path);
            }
            // 某些 shell 直接发送路径
            if rest.starts_with('/') {
                return OscSequence::WorkingDirectory(urlencoding_decode(rest));
            }
        }

        // OSC 1337: CurrentDir=/path
        if let Some(rest) = data.strip_prefix("1337;CurrentDir=") {
            if !rest.is_empty() {
                return OscSequence::WorkingDirectory(rest.to_string());
            }
        }

        OscSequence::Unknown
    }

    /// 从原始终端输出中提取所有已终止的 OSC 序列
    ///
    /// 返回找到的所有 OSC 序列及其位置信息。
    pub fn extract_sequences(&self, data: &str) -> Vec<OscParseResult> {
        let mut results = Vec::new();
        let mut search_start = 0;

        while let Some(osc_start) = data[search_start..].find(OSC_START) {
            let absolute_start = search_start + osc_start;

            let content_start = absolute_start + OSC_START.len();
            if content_start >= data.len() {
                break;
            }

            let remaining = &data[content_start..];

            let bel_pos = remaining.find(BEL);
            let st_pos = remaining.find(ST);

            // 选择最近的终止符
            let (end_offset, terminator_len) = match (bel_pos, st_pos) {
                (Some(b), Some(s)) => {
                    if b <= s {
                        (b, 1)
                    } else {
                        (s, ST.len())
                    }
                }
                (Some(b), None) => (b, 1),
                (None, Some(s)) => (s, ST.len()),
                (None, None) => {
                    search_start = content_start;
                    continue;
                }
            };

            // 终止符之前出现了新的序列，当前序列视为被截断
            if let Some(next) = remaining.find(OSC_START) {
                if next < end_offset {
                    search_start = content_start + next;
                    continue;
                }
            }

            let osc_content = &remaining[..end_offset];
            let absolute_end = content_start + end_offset + terminator_len;

            results.push(OscParseResult {
                sequence: self.parse(osc_content),
                start: absolute_start,
                end: absolute_end,
            });

            search_start = absolute_end;
        }

        results
    }

    /// 查找 `from` 之后未终止序列的起始位置
    ///
    /// 末尾单独的 ESC 也算作可能的序列开头。
    pub fn unterminated_start(&self, data: &str, from: usize) -> Option<usize> {
        let tail = data.get(from..)?;

        if let Some(pos) = tail.rfind(OSC_START) {
            let content = &tail[pos + OSC_START.len()..];
            if !content.contains(BEL) && !content.contains(ST) {
                return Some(from + pos);
            }
        }

        if tail.ends_with('\x1b') {
            return Some(data.len() - 1);
        }

        None
    }

    /// 解析 file:// URL
    fn parse_file_url(&self, url: &str) -> Option<String> {
        let rest = url.strip_prefix("file://")?;
        // 跳过主机名部分（可能为空或 localhost）
        let path_start = rest.find('/')?;
        Some(urlencoding_decode(&rest[path_start..]))
    }
}

/// URL 解码
///
/// 支持 %XX 格式的编码，解码后的字节按 UTF-8 重组。
pub fn urlencoding_decode(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut result = Vec::with_capacity(bytes.len());
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            if let (Some(h), Some(l)) = (hex_value(bytes[i + 1]), hex_value(bytes[i + 2])) {
                result.push(h << 4 | l);
                i += 3;
                continue;
            }
        }
        result.push(bytes[i]);
        i += 1;
    }

    String::from_utf8_lossy(&result).into_owned()
}

fn hex_value(b: u8) -> Option<u8> {
    (b as char).to_digit(16).map(|d| d as u8)
}
