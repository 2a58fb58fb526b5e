// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Correlation identifiers.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque identifier linking a request frame to its response frame.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(String);

impl CorrelationId {
    /// Wrap an existing id string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the id as a string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CorrelationId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for CorrelationId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Issues correlation ids that are unique for the lifetime of one bridge.
///
/// Ids are `<instance>-<sequence>`: the instance prefix is random per
/// generator, the sequence is shared by every connection the bridge creates,
/// so ids stay unique across connection recreation.
#[derive(Debug)]
pub struct CorrelationIdGenerator {
    prefix: String,
    next: AtomicU64,
}

impl CorrelationIdGenerator {
    /// Create a generator with a fresh random prefix.
    pub fn new() -> Self {
        let prefix = Uuid::new_v4().simple().to_string().chars().take(8).collect();
        Self {
            prefix,
            next: AtomicU64::new(1),
        }
    }

    /// Allocate the next id.
    pub fn next_id(&self) -> CorrelationId {
        let seq = self.next.fetch_add(1, Ordering::Relaxed);
        CorrelationId(format!("{}-{}", self.prefix, seq))
    }

    /// Number of ids handed out so far.
    pub fn issued(&self) -> u64 {
        self.next.load(Ordering::Relaxed) - 1
    }

    /// The per-instance prefix.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }
}

impl Default for CorrelationIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;

    #[test]
    fn test_ids_are_sequential_and_prefixed() {
        let ids = CorrelationIdGenerator::new();
        let first = ids.next_id();
        let second = ids.next_id();

        assert_ne!(first, second);
        assert!(first.as_str().starts_with(ids.prefix()));
        assert!(first.as_str().ends_with("-1"));
        assert!(second.as_str().ends_with("-2"));
        assert_eq!(ids.issued(), 2);
    }

    #[test]
    fn test_generators_do_not_collide() {
        let a = CorrelationIdGenerator::new();
        let b = CorrelationIdGenerator::new();
        assert_ne!(a.prefix(), b.prefix());
        assert_ne!(a.next_id(), b.next_id());
    }

    #[test]
    fn test_concurrent_allocation_is_unique() {
        let ids = Arc::new(CorrelationIdGenerator::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let ids = Arc::clone(&ids);
                std::thread::spawn(move || (0..500).map(|_| ids.next_id()).collect::<Vec<_>>())
            })
            .collect();

        let mut seen = HashSet::new();
        for handle in handles {
            for id in handle.join().unwrap() {
                assert!(seen.insert(id), "duplicate correlation id");
            }
        }
        assert_eq!(seen.len(), 4000);
    }

    #[test]
    fn test_serializes_as_plain_string() {
        let id = CorrelationId::new("abc-1");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"abc-1\"");
    }
}
