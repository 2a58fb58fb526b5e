// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Process-stdio transport.
//!
//! Spawns the tool-server as a child process and exchanges frames over its
//! stdin/stdout. stderr is drained into `debug` logs. The process is killed
//! on close and when the transport is dropped.

use std::process::Stdio;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::error::TransportError;
use super::framing::{encode_frame, read_frame};
use super::{report_closed, EventSender, TransportEvent, TransportSettings};
use crate::config::{LaunchSpec, ServerConfig};

/// Outbound frames buffered ahead of the stdin writer.
const WRITE_BUFFER: usize = 64;

/// A running child process and its I/O tasks.
pub struct StdioTransport {
    writer_tx: mpsc::Sender<Vec<u8>>,
    child: Arc<Mutex<Option<Child>>>,
    cancel: CancellationToken,
    pid: Option<u32>,
}

impl StdioTransport {
    /// Spawn the configured command and start the reader/writer tasks.
    pub async fn open(
        config: &ServerConfig,
        settings: &TransportSettings,
        events: EventSender,
    ) -> Result<Self, TransportError> {
        let LaunchSpec::Process { command, args, cwd } = &config.launch else {
            return Err(TransportError::Connect(format!(
                "server '{}' has no command to spawn",
                config.id
            )));
        };

        info!(server = %config.id, "Spawning: {} {}", command, args.join(" "));

        let mut cmd = Command::new(command);
        cmd.args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = cwd {
            cmd.current_dir(dir);
        }
        for (key, value) in config.expanded_env() {
            cmd.env(key, value);
        }

        let mut child = cmd.spawn().map_err(|e| TransportError::Spawn {
            command: command.clone(),
            message: e.to_string(),
        })?;

        let stdin = child.stdin.take().ok_or_else(|| spawn_error(command, "stdin"))?;
        let stdout = child.stdout.take().ok_or_else(|| spawn_error(command, "stdout"))?;
        let stderr = child.stderr.take().ok_or_else(|| spawn_error(command, "stderr"))?;
        let pid = child.id();

        let child = Arc::new(Mutex::new(Some(child)));
        let cancel = CancellationToken::new();
        let framing = settings.framing;
        let server = config.id.clone();

        // Writer task: frames to stdin.
        let (writer_tx, mut writer_rx) = mpsc::channel::<Vec<u8>>(WRITE_BUFFER);
        {
            let cancel = cancel.clone();
            let events = events.clone();
            let server = server.clone();
            let mut stdin = stdin;
            tokio::spawn(async move {
                loop {
                    let frame = tokio::select! {
                        biased;
                        _ = cancel.cancelled() => break,
                        frame = writer_rx.recv() => match frame {
                            Some(frame) => frame,
                            None => break,
                        },
                    };
                    let bytes = encode_frame(framing, &frame);
                    let result = async {
                        stdin.write_all(&bytes).await?;
                        stdin.flush().await
                    }
                    .await;
                    if let Err(e) = result {
                        warn!(server = %server, "stdin write error: {}", e);
                        report_closed(&events, &cancel, TransportError::Send(e.to_string())).await;
                        break;
                    }
                }
                debug!(server = %server, "Writer task exiting");
            });
        }

        // Reader task: frames from stdout.
        {
            let cancel = cancel.clone();
            let child = Arc::clone(&child);
            let server = server.clone();
            let mut reader = BufReader::new(stdout);
            tokio::spawn(async move {
                loop {
                    let result = tokio::select! {
                        biased;
                        _ = cancel.cancelled() => break,
                        result = read_frame(&mut reader, framing) => result,
                    };
                    match result {
                        Ok(Some(frame)) => {
                            if events.send(TransportEvent::Frame(frame)).await.is_err() {
                                break;
                            }
                        }
                        Ok(None) => {
                            let status = exit_status(&child).await;
                            info!(server = %server, "Stdout closed ({})", status);
                            report_closed(&events, &cancel, TransportError::ProcessExited(status))
                                .await;
                            break;
                        }
                        Err(e) => {
                            warn!(server = %server, "Read error: {}", e);
                            report_closed(&events, &cancel, e).await;
                            break;
                        }
                    }
                }
                debug!(server = %server, "Reader task exiting");
            });
        }

        // Stderr drain.
        {
            let server = server.clone();
            tokio::spawn(async move {
                let mut reader = BufReader::new(stderr);
                let mut line = String::new();
                loop {
                    line.clear();
                    match reader.read_line(&mut line).await {
                        Ok(0) => break,
                        Ok(_) => {
                            let trimmed = line.trim();
                            if !trimmed.is_empty() {
                                debug!(server = %server, stderr = true, "{}", trimmed);
                            }
                        }
                        Err(e) => {
                            debug!(server = %server, "stderr read error: {}", e);
                            break;
                        }
                    }
                }
            });
        }

        Ok(Self {
            writer_tx,
            child,
            cancel,
            pid,
        })
    }

    /// Queue a frame for stdin.
    pub async fn send(&self, frame: Vec<u8>) -> Result<(), TransportError> {
        if self.cancel.is_cancelled() {
            return Err(TransportError::Closed("process transport closed".into()));
        }
        self.writer_tx
            .send(frame)
            .await
            .map_err(|_| TransportError::Closed("stdin writer stopped".into()))
    }

    /// Stop the I/O tasks and kill the child process.
    pub async fn close(&self) {
        self.cancel.cancel();
        if let Some(mut child) = self.child.lock().await.take() {
            debug!(pid = ?self.pid, "Killing child process");
            let _ = child.kill().await;
        }
    }

    /// OS process id, if the child is still tracked.
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Check if the child process is still running.
    pub async fn is_alive(&self) -> bool {
        match self.child.lock().await.as_mut() {
            Some(child) => matches!(child.try_wait(), Ok(None)),
            None => false,
        }
    }
}

impl Drop for StdioTransport {
    fn drop(&mut self) {
        // kill_on_drop handles the process once the last Arc goes away.
        self.cancel.cancel();
    }
}

fn spawn_error(command: &str, stream: &str) -> TransportError {
    TransportError::Spawn {
        command: command.to_string(),
        message: format!("failed to open {}", stream),
    }
}

async fn exit_status(child: &Mutex<Option<Child>>) -> String {
    let mut guard = child.lock().await;
    let Some(child) = guard.as_mut() else {
        return "process already reaped".to_string();
    };
    // Give the process a moment to finish exiting after closing stdout.
    for _ in 0..10 {
        match child.try_wait() {
            Ok(Some(status)) => return status.to_string(),
            Ok(None) => tokio::time::sleep(std::time::Duration::from_millis(10)).await,
            Err(e) => return e.to_string(),
        }
    }
    "stdout closed".to_string()
}
