// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Benchmarks for the per-call policy gate.
//!
//! Run with: `cargo bench --bench security`

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use serde_json::json;
use std::hint::black_box;

use toolbridge::config::ServerConfig;
use toolbridge::security::{paths, SecurityValidator, ServerPolicy};

fn policy() -> ServerPolicy {
    ServerPolicy::compile(
        &ServerConfig::stdio("fs", "fs-server")
            .with_allowed_tools(["read_file", "write_file", "run"])
            .with_allowed_commands(["ls", "cat", "git *", "cargo *"])
            .with_denied_commands(["rm", "git push*"])
            .with_allowed_path_prefixes(["/workspace", "/tmp/scratch"]),
    )
    .unwrap()
}

fn bench_evaluate(c: &mut Criterion) {
    let validator = SecurityValidator::new();
    let policy = policy();

    let cases = [
        ("path_inside", "read_file", json!({"path": "/workspace/src/main.rs"})),
        ("path_escape", "read_file", json!({"path": "../../etc/passwd"})),
        ("command_chain", "run", json!({"command": "git status && cargo test | cat"})),
        (
            "nested_args",
            "write_file",
            json!({"target": {"filePath": "notes/today.md", "backups": ["/tmp/scratch/a", "/tmp/scratch/b"]}, "content": "x"}),
        ),
    ];

    let mut group = c.benchmark_group("security_evaluate");
    for (name, tool, args) in &cases {
        group.bench_with_input(BenchmarkId::from_parameter(name), args, |b, args| {
            b.iter(|| validator.evaluate(black_box(tool), black_box(args), black_box(&policy)))
        });
    }
    group.finish();
}

fn bench_paths(c: &mut Criterion) {
    let base = std::path::Path::new("/workspace/project");
    let mut group = c.benchmark_group("security_paths");

    group.bench_function("resolve_relative", |b| {
        b.iter(|| paths::resolve(black_box("../lib/./src/../mod.rs"), black_box(base)))
    });

    group.bench_function("collect_paths", |b| {
        let args = json!({"path": "a.txt", "options": {"output": "/tmp/out", "count": 3}, "query": "plain"});
        b.iter(|| paths::collect_paths(black_box(&args)))
    });

    group.bench_function("compile_policy", |b| b.iter(policy));

    group.finish();
}

criterion_group!(benches, bench_evaluate, bench_paths);
criterion_main!(benches);
