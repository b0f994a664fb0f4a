//! 转录文件尾部读取
//!
//! 转录文件是 JSONL，可能很大。只读最后 64 KiB，从最新的行开始找元数据。

use serde_json::Value;
use std::io::SeekFrom;
use std::path::Path;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

use crate::gateway::types::TranscriptMeta;
use crate::utils::error::TerminalError;
use crate::utils::text::truncate_chars;

/// 读取的尾部字节数
pub const TAIL_BYTES: u64 = 64 * 1024;
/// 预览文本的最大字符数
pub const PREVIEW_CHARS: usize = 160;

/// 读取文件尾部；从中间开始读时丢弃第一行残片
pub async fn read_tail(path: &Path, max_bytes: u64) -> Result<String, TerminalError> {
    let mut file = tokio::fs::File::open(path).await?;
    let len = file.metadata().await?.len();
    let offset = len.saturating_sub(max_bytes);

    file.seek(SeekFrom::Start(offset)).await?;
    let mut buf = Vec::with_capacity((len - offset) as usize);
    file.read_to_end(&mut buf).await?;

    let text = String::from_utf8_lossy(&buf).into_owned();
    if offset > 0 {
        Ok(match text.find('\n') {
            Some(pos) => text[pos + 1..].to_string(),
            None => String::new(),
        })
    } else {
        Ok(text)
    }
}

/// 从尾部文本中提取元数据，会话 ID 缺失时使用文件名
pub fn extract_meta(path: &Path, tail: &str) -> TranscriptMeta {
    let mut session_id = None;
    let mut model = None;
    let mut preview = None;

    for line in tail.lines().rev() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let Ok(entry) = serde_json::from_str::<Value>(line) else {
            continue;
        };

        if session_id.is_none() {
            session_id = entry
                .get("sessionId")
                .and_then(Value::as_str)
                .filter(|s| !s.is_empty())
                .map(str::to_string);
        }
        if model.is_none() {
            model = entry
                .pointer("/message/model")
                .and_then(Value::as_str)
                .map(str::to_string);
        }
        if preview.is_none() && is_assistant(&entry) {
            preview = assistant_text(&entry).map(|text| truncate_chars(&text, PREVIEW_CHARS));
        }

        if session_id.is_some() && model.is_some() && preview.is_some() {
            break;
        }
    }

    TranscriptMeta {
        session_id: session_id.unwrap_or_else(|| file_stem(path)),
        model,
        preview,
    }
}

/// 读取文件并提取元数据
pub async fn read_meta(path: &Path) -> Result<TranscriptMeta, TerminalError> {
    let tail = read_tail(path, TAIL_BYTES).await?;
    Ok(extract_meta(path, &tail))
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default()
}

fn is_assistant(entry: &Value) -> bool {
    entry.get("type").and_then(Value::as_str) == Some("assistant")
        || entry.pointer("/message/role").and_then(Value::as_str) == Some("assistant")
}

/// `message.content` 可能是字符串，也可能是内容块数组
fn assistant_text(entry: &Value) -> Option<String> {
    let content = entry.pointer("/message/content")?;
    let text = match content {
        Value::String(s) => s.clone(),
        Value::Array(blocks) => blocks
            .iter()
            .filter(|b| b.get("type").and_then(Value::as_str) == Some("text"))
            .filter_map(|b| b.get("text").and_then(Value::as_str))
            .collect::<Vec<_>>()
            .join(" "),
        _ => return None,
    };

    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.is_empty() {
        None
    } else {
        Some(collapsed)
    }
}
