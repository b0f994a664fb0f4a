//! Shell 集成
//!
//! 为新进程准备环境变量，并生成让 shell 上报工作目录 (OSC 7) 的钩子。
//! bash 通过 `PROMPT_COMMAND` 在启动时注入；zsh 的启动文件会覆盖启动时注入的钩子，
//! 所以在第一次输出后再以输入的方式安装 `precmd` 钩子。

use std::collections::HashMap;

use super::detect::ShellKind;

/// 终端类型
pub const TERM: &str = "xterm-256color";
/// 真彩色支持
pub const COLORTERM: &str = "truecolor";
/// 暴露给子进程的终端 ID 变量名
pub const TERMINAL_ID_VAR: &str = "TERMHUB_TERMINAL_ID";

/// bash 每次显示提示符前上报当前目录
pub const BASH_PROMPT_COMMAND: &str =
    r#"printf '\033]7;file://%s%s\007' "${HOSTNAME:-localhost}" "$PWD""#;

/// zsh 的 precmd 钩子（行首空格让命令不进入历史），安装后清屏
pub const ZSH_HOOK: &str = " __termhub_osc7() { printf '\\e]7;file://%s%s\\a' \"${HOST:-localhost}\" \"$PWD\" }; \
precmd_functions+=(__termhub_osc7); clear\n";

/// 构建子进程环境变量
///
/// 用户提供的变量先写入，集成变量随后覆盖。
pub fn build_env(
    terminal_id: &str,
    kind: ShellKind,
    user_env: Option<&HashMap<String, String>>,
) -> Vec<(String, String)> {
    let mut env: Vec<(String, String)> = user_env
        .map(|vars| {
            vars.iter()
                .filter(|(k, _)| !is_reserved(k))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect()
        })
        .unwrap_or_default();

    env.push(("TERM".to_string(), TERM.to_string()));
    env.push(("COLORTERM".to_string(), COLORTERM.to_string()));
    env.push((TERMINAL_ID_VAR.to_string(), terminal_id.to_string()));

    if kind == ShellKind::Bash {
        env.push(("PROMPT_COMMAND".to_string(), BASH_PROMPT_COMMAND.to_string()));
    }

    env
}

/// 是否需要在首次输出后安装钩子
pub fn needs_lazy_hook(kind: ShellKind) -> bool {
    kind == ShellKind::Zsh
}

fn is_reserved(key: &str) -> bool {
    matches!(key, "TERM" | "COLORTERM" | TERMINAL_ID_VAR)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lookup<'a>(env: &'a [(String, String)], key: &str) -> Option<&'a str> {
        env.iter()
            .rev()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    #[test]
    fn test_base_env() {
        let env = build_env("t1", ShellKind::Other, None);
        assert_eq!(lookup(&env, "TERM"), Some("xterm-256color"));
        assert_eq!(lookup(&env, "COLORTERM"), Some("truecolor"));
        assert_eq!(lookup(&env, TERMINAL_ID_VAR), Some("t1"));
        assert_eq!(lookup(&env, "PROMPT_COMMAND"), None);
    }

    #[test]
    fn test_bash_gets_prompt_command() {
        let env = build_env("t1", ShellKind::Bash, None);
        let prompt = lookup(&env, "PROMPT_COMMAND").unwrap();
        assert!(prompt.contains("]7;file://"));
    }

    #[test]
    fn test_user_env_cannot_override_reserved() {
        let mut user = HashMap::new();
        user.insert("TERM".to_string(), "dumb".to_string());
        user.insert("EDITOR".to_string(), "vim".to_string());

        let env = build_env("t1", ShellKind::Zsh, Some(&user));
        assert_eq!(env.iter().filter(|(k, _)| k == "TERM").count(), 1);
        assert_eq!(lookup(&env, "TERM"), Some("xterm-256color"));
        assert_eq!(lookup(&env, "EDITOR"), Some("vim"));
    }

    #[test]
    fn test_zsh_hook() {
        assert!(needs_lazy_hook(ShellKind::Zsh));
        assert!(!needs_lazy_hook(ShellKind::Bash));
        assert!(ZSH_HOOK.starts_with(' '));
        assert!(ZSH_HOOK.contains("precmd_functions"));
        assert!(ZSH_HOOK.ends_with("clear\n"));
    }
}
