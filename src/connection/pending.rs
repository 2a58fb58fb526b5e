// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! In-flight request tracking.
//!
//! Every outbound request registers a [`PendingTicket`] before its frame is
//! sent. The entry is removed by exactly one of: a matching response
//! ([`PendingTable::complete`]), the caller's deadline
//! ([`PendingTable::cancel`]), or a connection transition
//! ([`PendingTable::fail_all`]). Removal and delivery happen under one lock,
//! so a caller that loses the race to remove its own entry can rely on the
//! outcome already sitting in its channel.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::protocol::{CorrelationId, RpcError};
use crate::transport::TransportError;

/// How a pending request ended.
#[derive(Debug)]
pub enum PendingOutcome {
    /// The server answered.
    Response(Result<Value, RpcError>),
    /// The connection failed or closed first.
    Failed(TransportError),
}

struct Entry {
    method: String,
    deadline: Instant,
    sender: oneshot::Sender<PendingOutcome>,
}

struct Inner {
    open: bool,
    entries: HashMap<CorrelationId, Entry>,
}

/// A connection's map of in-flight requests.
#[derive(Clone)]
pub struct PendingTable {
    inner: Arc<Mutex<Inner>>,
}

impl PendingTable {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                open: true,
                entries: HashMap::new(),
            })),
        }
    }

    /// Track a request about to be sent.
    ///
    /// Fails once the table was closed by [`fail_all`](Self::fail_all) and not
    /// yet reopened.
    pub fn register(
        &self,
        id: CorrelationId,
        method: &str,
        deadline: Instant,
    ) -> Result<PendingTicket, TransportError> {
        let (sender, receiver) = oneshot::channel();
        let mut inner = self.inner.lock();
        if !inner.open {
            return Err(TransportError::Closed("connection is not accepting requests".into()));
        }
        inner.entries.insert(
            id.clone(),
            Entry {
                method: method.to_string(),
                deadline,
                sender,
            },
        );
        Ok(PendingTicket {
            id,
            table: self.clone(),
            receiver,
        })
    }

    /// Deliver a response. Returns false when no request has this id.
    pub fn complete(&self, id: &CorrelationId, outcome: Result<Value, RpcError>) -> bool {
        let mut inner = self.inner.lock();
        match inner.entries.remove(id) {
            Some(entry) => {
                let _ = entry.sender.send(PendingOutcome::Response(outcome));
                true
            }
            None => false,
        }
    }

    /// Remove a request whose deadline passed. Returns false when another
    /// path already resolved it.
    pub fn cancel(&self, id: &CorrelationId) -> bool {
        self.inner.lock().entries.remove(id).is_some()
    }

    /// Fail every in-flight request and refuse new ones until
    /// [`reopen`](Self::reopen). Returns how many were failed.
    pub fn fail_all(&self, error: TransportError) -> usize {
        let mut inner = self.inner.lock();
        inner.open = false;
        let drained: Vec<_> = inner.entries.drain().collect();
        let count = drained.len();
        for (_, entry) in drained {
            let _ = entry.sender.send(PendingOutcome::Failed(error.clone()));
        }
        count
    }

    /// Accept requests again after a new transport is open.
    pub fn reopen(&self) {
        self.inner.lock().open = true;
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Method and deadline of an in-flight request.
    pub fn describe(&self, id: &CorrelationId) -> Option<(String, Instant)> {
        self.inner
            .lock()
            .entries
            .get(id)
            .map(|e| (e.method.clone(), e.deadline))
    }
}

impl Default for PendingTable {
    fn default() -> Self {
        Self::new()
    }
}

/// A registered request. Dropping it removes the entry if still present.
pub struct PendingTicket {
    id: CorrelationId,
    table: PendingTable,
    receiver: oneshot::Receiver<PendingOutcome>,
}

impl PendingTicket {
    pub fn id(&self) -> &CorrelationId {
        &self.id
    }

    /// Wait for the outcome until `deadline`. `None` means this caller won
    /// the timeout race and the entry is gone.
    pub async fn wait_until(&mut self, deadline: Instant) -> Option<PendingOutcome> {
        match tokio::time::timeout_at(deadline, &mut self.receiver).await {
            Ok(outcome) => Some(outcome.unwrap_or_else(|_| {
                PendingOutcome::Failed(TransportError::Closed("request dropped".into()))
            })),
            Err(_) => {
                if self.table.cancel(&self.id) {
                    return None;
                }
                // Resolved concurrently; the outcome is already in the channel.
                Some((&mut self.receiver).await.unwrap_or_else(|_| {
                    PendingOutcome::Failed(TransportError::Closed("request dropped".into()))
                }))
            }
        }
    }
}

impl Drop for PendingTicket {
    fn drop(&mut self) {
        self.table.cancel(&self.id);
    }
}
