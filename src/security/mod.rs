// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Policy gate for outbound tool calls.
//!
//! [`SecurityValidator::evaluate`] is a pure function of the tool name, the
//! call arguments, and the owning server's [`ServerPolicy`]. It is run on
//! every call, before a correlation id is allocated or anything is sent.
//!
//! Checks, in order:
//! 1. tool allow-list
//! 2. command deny-list (always wins), then command allow-list
//! 3. every path-shaped argument, after lexical `..` normalization, must
//!    fall under one of the permitted prefixes

pub mod paths;
pub mod policy;

use serde_json::Value;

pub use policy::ServerPolicy;

/// Outcome of a policy check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Allow,
    Deny(String),
}

impl Verdict {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Verdict::Allow)
    }

    /// The denial reason, if denied.
    pub fn reason(&self) -> Option<&str> {
        match self {
            Verdict::Allow => None,
            Verdict::Deny(reason) => Some(reason),
        }
    }
}

/// Stateless policy evaluator.
#[derive(Debug, Clone, Copy, Default)]
pub struct SecurityValidator;

impl SecurityValidator {
    pub fn new() -> Self {
        Self
    }

    /// Decide whether `tool` may be called with `args` under `policy`.
    pub fn evaluate(&self, tool: &str, args: &Value, policy: &ServerPolicy) -> Verdict {
        if !policy.tool_allowed(tool) {
            return Verdict::Deny(format!(
                "tool '{}' is not in the allow-list of '{}'",
                tool,
                policy.server_id()
            ));
        }

        for command in ServerPolicy::commands_in(args) {
            if let Err(reason) = policy.check_command(&command) {
                return Verdict::Deny(reason);
            }
        }

        if policy.restricts_paths() {
            for path in paths::collect_paths(args) {
                if let Err(reason) = policy.check_path(&path) {
                    return Verdict::Deny(reason);
                }
            }
        }

        Verdict::Allow
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use serde_json::json;

    fn fs_policy() -> ServerPolicy {
        ServerPolicy::compile(
            &ServerConfig::stdio("fs", "fs-server")
                .with_allowed_tools(["read_file", "run"])
                .with_denied_commands(["rm"])
                .with_allowed_path_prefixes(["/workspace"]),
        )
        .unwrap()
    }

    #[test]
    fn test_in_prefix_vs_out_of_prefix() {
        let validator = SecurityValidator::new();
        let policy = fs_policy();

        let inside = validator.evaluate("read_file", &json!({"path": "/workspace/a.txt"}), &policy);
        assert_eq!(inside, Verdict::Allow);

        let outside = validator.evaluate("read_file", &json!({"path": "../../etc/passwd"}), &policy);
        assert!(!outside.is_allowed());
        assert!(outside.reason().unwrap().contains("/etc/passwd"));
    }

    #[test]
    fn test_deterministic() {
        let validator = SecurityValidator::new();
        let policy = fs_policy();
        let args = json!({"path": "../x", "nested": {"target": "/tmp/y"}});
        let first = validator.evaluate("read_file", &args, &policy);
        for _ in 0..10 {
            assert_eq!(validator.evaluate("read_file", &args, &policy), first);
        }
    }

    #[test]
    fn test_tool_allow_list() {
        let verdict = SecurityValidator::new().evaluate("delete_all", &json!({}), &fs_policy());
        assert!(verdict.reason().unwrap().contains("delete_all"));
    }

    #[test]
    fn test_denied_command() {
        let verdict =
            SecurityValidator::new().evaluate("run", &json!({"command": "rm -rf build"}), &fs_policy());
        assert_eq!(verdict, Verdict::Deny("command 'rm' is denied".to_string()));
    }

    #[test]
    fn test_no_prefixes_no_path_check() {
        let policy = ServerPolicy::permissive("open");
        let verdict = SecurityValidator::new().evaluate("read", &json!({"path": "/etc/passwd"}), &policy);
        assert!(verdict.is_allowed());
    }
}
