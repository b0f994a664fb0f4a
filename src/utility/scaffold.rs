//! 项目脚手架
//!
//! 在指定目录下生成 `.claude` 目录结构和说明文件。已存在的文件和目录一律保留。

use std::path::{Path, PathBuf};

use crate::utils::error::TerminalError;

const DIRECTORIES: &[&str] = &[".claude/agents", ".claude/commands", ".claude/skills"];

const SETTINGS_JSON: &str = r#"{
  "permissions": {
    "allow": [],
    "deny": []
  }
}
"#;

const CLAUDE_MD: &str = "# CLAUDE.md\n\n\
Project notes for the coding assistant.\n\n\
## Commands\n\n\
## Architecture\n\n\
## Conventions\n";

/// 生成脚手架，返回新创建的条目（相对路径）
pub async fn init_project(path: &str) -> Result<Vec<String>, TerminalError> {
    let root = PathBuf::from(path);
    if !root.is_absolute() {
        return Err(TerminalError::InvalidRequest(format!("需要绝对路径: {}", path)));
    }
    if !tokio::fs::metadata(&root)
        .await
        .map(|m| m.is_dir())
        .unwrap_or(false)
    {
        return Err(TerminalError::InvalidRequest(format!("目录不存在: {}", path)));
    }

    let mut created = Vec::new();

    for dir in DIRECTORIES {
        let target = root.join(dir);
        if !exists(&target).await {
            tokio::fs::create_dir_all(&target).await?;
            created.push(dir.to_string());
        }
    }

    for (name, content) in [(".claude/settings.json", SETTINGS_JSON), ("CLAUDE.md", CLAUDE_MD)] {
        if write_new(&root.join(name), content).await? {
            created.push(name.to_string());
        }
    }

    tracing::info!("脚手架 {}: 新建 {} 项", root.display(), created.len());
    Ok(created)
}

async fn exists(path: &Path) -> bool {
    tokio::fs::try_exists(path).await.unwrap_or(false)
}

/// 只在文件不存在时写入
async fn write_new(path: &Path, content: &str) -> Result<bool, TerminalError> {
    use tokio::io::AsyncWriteExt;

    let mut file = match tokio::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .await
    {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => return Ok(false),
        Err(e) => return Err(e.into()),
    };
    file.write_all(content.as_bytes()).await?;
    file.flush().await?;
    Ok(true)
}
