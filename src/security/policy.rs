// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Compiled per-server policy.

use std::path::{Path, PathBuf};

use globset::{Glob, GlobSet, GlobSetBuilder};
use serde_json::Value;

use super::paths;
use crate::config::{LaunchSpec, ServerConfig};
use crate::error::ConfigError;

/// Argument keys whose values are treated as command lines.
const COMMAND_KEYS: &[&str] = &["command", "cmd", "commandLine", "command_line", "script", "shell"];


/// The policy inputs of one server, with patterns compiled once.
#[derive(Debug, Clone)]
pub struct ServerPolicy {
    server_id: String,
    allowed_tools: Vec<String>,
    allowed_commands: Option<GlobSet>,
    denied_commands: Option<GlobSet>,
    path_prefixes: Vec<PathBuf>,
    base_dir: PathBuf,
}

impl ServerPolicy {
    /// Compile the policy fields of `config`.
    pub fn compile(config: &ServerConfig) -> Result<Self, ConfigError> {
        let field = |name: &str| format!("{}.{}", config.id, name);
        let path_prefixes: Vec<PathBuf> = config
            .allowed_path_prefixes
            .iter()
            .map(|p| paths::normalize(Path::new(p)))
            .collect();

        // Relative arguments resolve against the launch directory when it is
        // absolute, otherwise against the first permitted prefix.
        let base_dir = match &config.launch {
            LaunchSpec::Process { cwd: Some(cwd), .. } if Path::new(cwd).is_absolute() => {
                paths::normalize(Path::new(cwd))
            }
            _ => path_prefixes
                .first()
                .cloned()
                .unwrap_or_else(|| PathBuf::from("/")),
        };

        Ok(Self {
            server_id: config.id.clone(),
            allowed_tools: config.allowed_tools.clone(),
            allowed_commands: build_set(&config.allowed_commands)
                .map_err(|e| ConfigError::invalid(field("allowedCommands"), e))?,
            denied_commands: build_set(&config.denied_commands)
                .map_err(|e| ConfigError::invalid(field("deniedCommands"), e))?,
            path_prefixes,
            base_dir,
        })
    }

    /// A policy that allows everything.
    pub fn permissive(server_id: impl Into<String>) -> Self {
        Self {
            server_id: server_id.into(),
            allowed_tools: Vec::new(),
            allowed_commands: None,
            denied_commands: None,
            path_prefixes: Vec::new(),
            base_dir: PathBuf::from("/"),
        }
    }

    pub fn server_id(&self) -> &str {
        &self.server_id
    }

    pub fn tool_allowed(&self, tool: &str) -> bool {
        self.allowed_tools.is_empty() || self.allowed_tools.iter().any(|t| t == tool)
    }

    pub fn restricts_paths(&self) -> bool {
        !self.path_prefixes.is_empty()
    }

    /// Check one command line. The deny list is consulted first and wins.
    pub fn check_command(&self, command: &str) -> Result<(), String> {
        if let Some(denied) = &self.denied_commands {
            if let Some(hit) = denied_hit(denied, command) {
                return Err(format!("command '{}' is denied", hit));
            }
        }

        if let Some(allowed) = &self.allowed_commands {
            if !substitutions(command).is_empty() {
                return Err("command substitution is not permitted".to_string());
            }
            let segments = split_chain(command);
            for segment in &segments {
                if !candidates(segment).iter().any(|c| allowed.is_match(c)) {
                    return Err(format!("command '{}' is not in the allow-list", program(segment)));
                }
            }
        }

        Ok(())
    }

    /// Check one path-shaped argument against the permitted prefixes.
    pub fn check_path(&self, raw: &str) -> Result<(), String> {
        if self.path_prefixes.is_empty() {
            return Ok(());
        }
        let resolved = paths::resolve(raw, &self.base_dir);
        if self
            .path_prefixes
            .iter()
            .any(|prefix| paths::is_within(&resolved, prefix))
        {
            Ok(())
        } else {
            Err(format!(
                "path '{}' resolves to '{}', outside permitted prefixes",
                raw,
                resolved.display()
            ))
        }
    }

    /// Command lines found in the top level of `args`.
    pub fn commands_in(args: &Value) -> Vec<String> {
        let Some(map) = args.as_object() else {
            return Vec::new();
        };
        COMMAND_KEYS
            .iter()
            .filter_map(|key| map.get(*key))
            .filter_map(|value| match value {
                Value::String(s) => Some(s.clone()),
                Value::Array(items) => {
                    let argv: Vec<&str> = items.iter().filter_map(Value::as_str).collect();
                    (!argv.is_empty()).then(|| argv.join(" "))
                }
                _ => None,
            })
            .collect()
    }
}

fn build_set(patterns: &[String]) -> Result<Option<GlobSet>, String> {
    if patterns.is_empty() {
        return Ok(None);
    }
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern).map_err(|e| format!("invalid pattern '{}': {}", pattern, e))?);
    }
    builder.build().map(Some).map_err(|e| e.to_string())
}

/// The first denied candidate in `command`, looking inside every
/// substitution as well as every chained segment.
fn denied_hit(denied: &GlobSet, command: &str) -> Option<String> {
    for segment in split_chain(command) {
        if let Some(hit) = candidates(&segment).into_iter().find(|c| denied.is_match(c)) {
            return Some(hit);
        }
    }
    substitutions(command)
        .iter()
        .find_map(|inner| denied_hit(denied, inner))
}

/// Split a shell line on `&&`, `||`, `;`, `|`, `&` and newlines. An `&` that
/// belongs to a redirection (`2>&1`, `&>file`) does not split.
fn split_chain(command: &str) -> Vec<String> {
    let chars: Vec<char> = command.chars().collect();
    let mut segments = Vec::new();
    let mut current = String::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        let next = chars.get(i + 1).copied();
        let split = match c {
            ';' | '\n' | '|' => true,
            '&' => {
                let prev = i.checked_sub(1).map(|p| chars[p]);
                !matches!(prev, Some('>') | Some('<')) && next != Some('>')
            }
            _ => false,
        };
        if split {
            segments.push(std::mem::take(&mut current));
            // `&&`, `||` and `|&` are one operator.
            if matches!((c, next), ('&', Some('&')) | ('|', Some('|')) | ('|', Some('&'))) {
                i += 1;
            }
        } else {
            current.push(c);
        }
        i += 1;
    }
    segments.push(current);
    segments
        .into_iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Inner text of every `$(...)`, `<(...)`, `>(...)` and backtick
/// substitution at the top level of `command`. An unterminated substitution
/// runs to the end of the line.
fn substitutions(command: &str) -> Vec<String> {
    let chars: Vec<char> = command.chars().collect();
    let mut found: Vec<String> = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let opens_paren =
            matches!(chars[i], '$' | '<' | '>') && chars.get(i + 1) == Some(&'(');
        if opens_paren {
            let start = i + 2;
            let mut depth = 1;
            let mut end = start;
            while end < chars.len() {
                match chars[end] {
                    '(' => depth += 1,
                    ')' => {
                        depth -= 1;
                        if depth == 0 {
                            break;
                        }
                    }
                    _ => {}
                }
                end += 1;
            }
            found.push(chars[start..end].iter().collect());
            i = end + 1;
        } else if chars[i] == '`' {
            let start = i + 1;
            let end = chars[start..]
                .iter()
                .position(|&c| c == '`')
                .map_or(chars.len(), |offset| start + offset);
            found.push(chars[start..end].iter().collect());
            i = end + 1;
        } else {
            i += 1;
        }
    }
    found
}

/// The program word of a segment, skipping leading `VAR=value` assignments.
fn program(segment: &str) -> &str {
    segment
        .split_whitespace()
        .find(|word| !word.contains('='))
        .unwrap_or(segment)
}

/// Strings a pattern may match: program basename, program as written, and
/// the whole segment.
fn candidates(segment: &str) -> Vec<String> {
    let program = program(segment);
    let basename = Path::new(program)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(program);
    let mut out = vec![basename.to_string()];
    if program != basename {
        out.push(program.to_string());
    }
    out.push(segment.to_string());
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn policy() -> ServerPolicy {
        let config = ServerConfig::stdio("shell", "shell-server")
            .with_allowed_commands(["ls", "cat", "git *"])
            .with_denied_commands(["rm", "git push*"])
            .with_allowed_path_prefixes(["/workspace"]);
        ServerPolicy::compile(&config).unwrap()
    }

    #[test]
    fn test_allow_list_by_program() {
        let policy = policy();
        assert!(policy.check_command("ls -la").is_ok());
        assert!(policy.check_command("/bin/cat notes.txt").is_ok());
        assert!(policy.check_command("git status").is_ok());
        assert!(policy.check_command("curl http://x").is_err());
    }

    #[test]
    fn test_deny_wins() {
        let policy = ServerPolicy::compile(
            &ServerConfig::stdio("s", "x")
                .with_allowed_commands(["*"])
                .with_denied_commands(["rm"]),
        )
        .unwrap();
        let err = policy.check_command("ls && rm -rf /").unwrap_err();
        assert!(err.contains("rm"));
        assert!(policy.check_command("git push origin main").is_ok());

        let push_denied =
            ServerPolicy::compile(&ServerConfig::stdio("s", "x").with_denied_commands(["git push*"]))
                .unwrap();
        assert!(push_denied.check_command("git push origin main").is_err());
    }

    #[test]
    fn test_chained_segments_checked() {
        let policy = policy();
        assert!(policy.check_command("ls; curl evil").is_err());
        assert!(policy.check_command("ls | cat").is_ok());
        assert!(policy.check_command("ls $(whoami)").is_err());
        assert!(policy.check_command("FOO=1 ls").is_ok());
    }

    #[test]
    fn test_background_operator_splits() {
        let policy = ServerPolicy::compile(
            &ServerConfig::stdio("s", "x")
                .with_allowed_commands(["ls"])
                .with_denied_commands(["rm"]),
        )
        .unwrap();
        let err = policy.check_command("ls & rm -rf /").unwrap_err();
        assert!(err.contains("rm"), "{}", err);
        assert!(policy.check_command("ls |& rm -rf /").is_err());
        assert!(policy.check_command("ls 2>&1").is_ok());
        assert!(policy.check_command("ls &>/dev/null").is_ok());
    }

    #[test]
    fn test_deny_only_inspects_substitutions() {
        let policy =
            ServerPolicy::compile(&ServerConfig::stdio("s", "x").with_denied_commands(["rm"])).unwrap();
        assert!(policy.check_command("ls $(rm -rf /)").is_err());
        assert!(policy.check_command("echo `rm -rf /`").is_err());
        assert!(policy.check_command("cat <(rm -rf /)").is_err());
        assert!(policy.check_command("echo $(echo $(rm -rf /))").is_err());
        assert!(policy.check_command("echo $(rm -rf /").is_err());
        assert!(policy.check_command("echo $(date)").is_ok());
    }

    #[test]
    fn test_split_chain_operators() {
        assert_eq!(
            split_chain("a && b || c; d | e & f\ng"),
            vec!["a", "b", "c", "d", "e", "f", "g"]
        );
        assert_eq!(split_chain("make 2>&1 | tee log"), vec!["make 2>&1", "tee log"]);
    }

    #[test]
    fn test_paths_against_prefixes() {
        let policy = policy();
        assert!(policy.check_path("/workspace/src/lib.rs").is_ok());
        assert!(policy.check_path("src/lib.rs").is_ok());
        assert!(policy.check_path("../../etc/passwd").is_err());
        assert!(policy.check_path("/workspace/../etc").is_err());
        assert!(policy.check_path("/workspace2/x").is_err());
    }

    #[test]
    fn test_launch_cwd_is_base() {
        let config = ServerConfig::stdio("fs", "fs-server")
            .with_cwd("/workspace/project")
            .with_allowed_path_prefixes(["/workspace"]);
        let policy = ServerPolicy::compile(&config).unwrap();
        assert!(policy.check_path("../other").is_ok());
        assert!(policy.check_path("../../etc").is_err());
    }

    #[test]
    fn test_commands_in_args() {
        let args = json!({"command": "ls -la", "cmd": ["git", "status"], "path": "/tmp"});
        assert_eq!(ServerPolicy::commands_in(&args), vec!["ls -la", "git status"]);
        assert!(ServerPolicy::commands_in(&json!("ls")).is_empty());
    }

    #[test]
    fn test_permissive() {
        let policy = ServerPolicy::permissive("any");
        assert!(policy.tool_allowed("whatever"));
        assert!(policy.check_command("rm -rf /").is_ok());
        assert!(policy.check_path("/etc/passwd").is_ok());
        assert!(!policy.restricts_paths());
    }
}
