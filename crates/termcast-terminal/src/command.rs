//! Turns a user-supplied command string into a program plus arguments.

use regex::Regex;
use std::sync::OnceLock;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedCommand {
    pub program: String,
    pub args: Vec<String>,
}

fn token_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r#""([^"]*)"|'([^']*)'|\S+"#).expect("valid token pattern"))
}

/// Split on whitespace, keeping quoted tokens together (quotes removed)
pub fn tokenize(command: &str) -> Vec<String> {
    token_pattern()
        .captures_iter(command)
        .filter_map(|caps| {
            caps.get(1)
                .or_else(|| caps.get(2))
                .or_else(|| caps.get(0))
                .map(|m| m.as_str().to_string())
        })
        .collect()
}

/// Resolve a command string; an empty one launches the default shell
pub fn resolve_command(command: &str) -> ResolvedCommand {
    let mut tokens = tokenize(command.trim()).into_iter();
    match tokens.next() {
        Some(program) => ResolvedCommand {
            program,
            args: tokens.collect(),
        },
        None => default_shell(),
    }
}

fn default_shell() -> ResolvedCommand {
    let program = if cfg!(windows) {
        std::env::var("COMSPEC").unwrap_or_else(|_| "cmd.exe".to_string())
    } else {
        std::env::var("SHELL").unwrap_or_else(|_| "/bin/bash".to_string())
    };

    ResolvedCommand {
        program,
        args: Vec::new(),
    }
}
