// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Lexical path handling for the path-prefix policy.
//!
//! Nothing here touches the filesystem: symlinks are not followed and paths
//! need not exist. `..` is resolved purely by component arithmetic.

use std::path::{Component, Path, PathBuf};

use serde_json::Value;

/// Argument keys treated as paths regardless of their value.
const PATH_KEY_HINTS: &[&str] = &[
    "path", "file", "dir", "directory", "folder", "cwd", "root", "dest", "destination",
    "source", "src", "target", "location",
];

/// Resolve `.` and `..` components without consulting the filesystem.
/// `..` at the root stays at the root.
pub fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Prefix(p) => out.push(p.as_os_str()),
            Component::RootDir => out.push(Component::RootDir.as_os_str()),
            Component::CurDir => {}
            Component::ParentDir => match out.components().next_back() {
                Some(Component::Normal(_)) => {
                    out.pop();
                }
                Some(Component::RootDir) | Some(Component::Prefix(_)) => {}
                _ => out.push(".."),
            },
            Component::Normal(part) => out.push(part),
        }
    }
    out
}

/// Make `raw` absolute against `base` (expanding a leading `~/`), then
/// normalize it.
pub fn resolve(raw: &str, base: &Path) -> PathBuf {
    let raw = raw.strip_prefix("file://").unwrap_or(raw);
    let path = match raw.strip_prefix("~/").zip(dirs::home_dir()) {
        Some((rest, home)) => home.join(rest),
        None => PathBuf::from(raw),
    };
    if path.is_absolute() {
        normalize(&path)
    } else {
        normalize(&base.join(path))
    }
}

/// Component-wise prefix test, so `/workspace2` is not under `/workspace`.
pub fn is_within(path: &Path, prefix: &Path) -> bool {
    path.starts_with(prefix)
}

/// Whether an argument key names a path (`path`, `filePath`, `target_dir`,
/// `paths`).
pub fn is_path_key(key: &str) -> bool {
    let stem = key.strip_suffix('s').unwrap_or(key);
    let lower = stem.to_ascii_lowercase();
    PATH_KEY_HINTS.iter().any(|hint| {
        if lower == *hint
            || lower.starts_with(&format!("{hint}_"))
            || lower.ends_with(&format!("_{hint}"))
        {
            return true;
        }
        // camelCase suffix: the hint starts at an uppercase letter.
        lower.len() > hint.len()
            && lower.ends_with(hint)
            && stem
                .get(stem.len() - hint.len()..)
                .is_some_and(|tail| tail.starts_with(|c: char| c.is_ascii_uppercase()))
    })
}

/// Whether a string value looks like a path even under a neutral key.
pub fn looks_like_path(value: &str) -> bool {
    value.starts_with('/')
        || value.starts_with("./")
        || value.starts_with("../")
        || value.starts_with("~/")
        || value.starts_with("file://")
        || value == ".."
        || value.contains("/../")
}

/// Collect every path-shaped string in `args`, descending into nested
/// objects and arrays. Items of an array under a path key count as paths.
pub fn collect_paths(args: &Value) -> Vec<String> {
    let mut found = Vec::new();
    walk(args, false, &mut found);
    found
}

fn walk(value: &Value, under_path_key: bool, found: &mut Vec<String>) {
    match value {
        Value::String(s) => {
            if under_path_key || looks_like_path(s) {
                found.push(s.clone());
            }
        }
        Value::Array(items) => {
            for item in items {
                walk(item, under_path_key, found);
            }
        }
        Value::Object(map) => {
            for (key, item) in map {
                walk(item, is_path_key(key), found);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_normalize_parent_dirs() {
        assert_eq!(normalize(Path::new("/a/b/../c/./d")), PathBuf::from("/a/c/d"));
        assert_eq!(normalize(Path::new("/../../etc")), PathBuf::from("/etc"));
        assert_eq!(normalize(Path::new("a/../../b")), PathBuf::from("../b"));
        assert_eq!(normalize(Path::new("../..")), PathBuf::from("../.."));
    }

    #[test]
    fn test_resolve_relative_escape() {
        let base = Path::new("/workspace");
        assert_eq!(resolve("../../etc/passwd", base), PathBuf::from("/etc/passwd"));
        assert_eq!(resolve("src/main.rs", base), PathBuf::from("/workspace/src/main.rs"));
        assert_eq!(resolve("/workspace/a/../b", base), PathBuf::from("/workspace/b"));
    }

    #[test]
    fn test_is_within_is_component_wise() {
        assert!(is_within(Path::new("/workspace/a"), Path::new("/workspace")));
        assert!(is_within(Path::new("/workspace"), Path::new("/workspace")));
        assert!(!is_within(Path::new("/workspace2/a"), Path::new("/workspace")));
    }

    #[test]
    fn test_path_keys() {
        for key in ["path", "filePath", "file_path", "targetDir", "cwd", "destination"] {
            assert!(is_path_key(key), "{key}");
        }
        for key in ["query", "profile", "content", "pattern"] {
            assert!(!is_path_key(key), "{key}");
        }
    }

    #[test]
    fn test_collect_paths_nested() {
        let args = json!({
            "query": "hello",
            "path": "notes.txt",
            "options": {"output": "../../etc/shadow", "count": 3},
            "paths": ["a.txt", "b.txt"],
            "note": "plain words"
        });
        let mut paths = collect_paths(&args);
        paths.sort();
        assert_eq!(paths, vec!["../../etc/shadow", "a.txt", "b.txt", "notes.txt"]);
    }
}
