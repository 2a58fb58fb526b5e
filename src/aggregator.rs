// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Capability aggregator.
//!
//! Merges the tool lists of every Ready connection into one namespace. The
//! merged index is cached and rebuilt whenever the bridge epoch moves, which
//! happens on every Ready/non-Ready transition and every tool list refresh.
//!
//! Name collisions across servers are never hidden: colliding tools are
//! listed only under `serverId.toolName`, flagged as ambiguous, and a warning
//! is attached to the snapshot. The bare name still resolves, to the server
//! that became Ready most recently.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::connection::ConnectionEvent;
use crate::registry::ServerRegistry;
use crate::types::ToolDefinition;

/// One entry of a tool listing, as shown to the agent.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolListing {
    /// Name the agent should use: bare when unique, qualified when colliding.
    pub name: String,
    pub qualified_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub schema: Value,
    pub server_id: String,
    /// Set when another Ready server advertises the same bare name.
    pub ambiguous: bool,
}

/// Point-in-time view of the merged namespace.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolSnapshot {
    pub tools: Vec<ToolListing>,
    pub warnings: Vec<String>,
    pub epoch: u64,
}

impl ToolSnapshot {
    pub fn has_warnings(&self) -> bool {
        !self.warnings.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&ToolListing> {
        self.tools.iter().find(|t| t.name == name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.tools.iter().map(|t| t.name.as_str()).collect()
    }
}

/// A resolved tool name.
#[derive(Debug, Clone)]
pub struct Resolved {
    pub server_id: String,
    pub definition: ToolDefinition,
    /// Non-empty when the bare name was ambiguous.
    pub warnings: Vec<String>,
}

/// Tools of one Ready server, with its Ready stamp.
#[derive(Debug, Clone)]
pub(crate) struct Source {
    pub server_id: String,
    pub ready_stamp: u64,
    pub tools: Vec<ToolDefinition>,
}

struct Slot {
    definition: ToolDefinition,
    warning: Option<String>,
}

/// The merged name → tool map for one epoch.
struct Index {
    epoch: u64,
    listings: Vec<ToolListing>,
    warnings: Vec<String>,
    by_name: HashMap<String, Slot>,
}

impl Index {
    fn build(epoch: u64, sources: Vec<Source>) -> Self {
        let mut groups: BTreeMap<String, Vec<(u64, ToolDefinition)>> = BTreeMap::new();
        for source in sources {
            for tool in source.tools {
                groups
                    .entry(tool.name.clone())
                    .or_default()
                    .push((source.ready_stamp, tool));
            }
        }

        let mut listings = Vec::new();
        let mut warnings = Vec::new();
        let mut by_name = HashMap::new();

        for (name, mut owners) in groups {
            owners.sort_by(|a, b| a.1.server_id.cmp(&b.1.server_id));
            let ambiguous = owners.len() > 1;

            let warning = ambiguous.then(|| {
                // Most recently Ready wins the bare name; ties go to the
                // lexically last server id so the choice is stable.
                let winner = owners
                    .iter()
                    .max_by(|a, b| (a.0, &a.1.server_id).cmp(&(b.0, &b.1.server_id)))
                    .map(|(_, t)| t.server_id.clone())
                    .unwrap_or_default();
                let servers: Vec<&str> = owners.iter().map(|(_, t)| t.server_id.as_str()).collect();
                format!(
                    "tool '{}' is advertised by {}; listed under qualified names, bare name resolves to '{}'",
                    name,
                    servers.join(", "),
                    winner
                )
            });

            if let Some(message) = &warning {
                warn!(tool = %name, "{}", message);
                warnings.push(message.clone());
            }

            let mut bare_winner: Option<(u64, ToolDefinition)> = None;
            for (stamp, tool) in owners {
                let qualified = tool.qualified_name();
                listings.push(ToolListing {
                    name: if ambiguous { qualified.clone() } else { name.clone() },
                    qualified_name: qualified.clone(),
                    description: tool.description.clone(),
                    schema: tool.input_schema.clone(),
                    server_id: tool.server_id.clone(),
                    ambiguous,
                });
                by_name.insert(
                    qualified,
                    Slot {
                        definition: tool.clone(),
                        warning: None,
                    },
                );
                let newer = bare_winner.as_ref().map_or(true, |(best, current)| {
                    (stamp, &tool.server_id) > (*best, &current.server_id)
                });
                if newer {
                    bare_winner = Some((stamp, tool));
                }
            }

            if let Some((_, definition)) = bare_winner {
                // A qualified entry keeps priority over an identical bare name.
                by_name.entry(name).or_insert(Slot {
                    definition,
                    warning: warning.clone(),
                });
            }
        }

        // A bare name that reads like another server's qualified name
        // (`fs.x` advertised by `other` while `fs` has `x`) resolves to the
        // qualified entry, so list the shadowed tool under its own qualified
        // name instead.
        for listing in &mut listings {
            if listing.name == listing.qualified_name {
                continue;
            }
            let shadowed = by_name
                .get(&listing.name)
                .is_some_and(|slot| slot.definition.server_id != listing.server_id);
            if shadowed {
                let message = format!(
                    "tool '{}' of '{}' is shadowed by a qualified name; listed as '{}'",
                    listing.name, listing.server_id, listing.qualified_name
                );
                warn!(tool = %listing.name, server = %listing.server_id, "{}", message);
                warnings.push(message);
                listing.name = listing.qualified_name.clone();
                listing.ambiguous = true;
            }
        }

        listings.sort_by(|a, b| a.name.cmp(&b.name));
        Self {
            epoch,
            listings,
            warnings,
            by_name,
        }
    }
}

/// Read-only merged view over the registry's Ready connections.
pub struct CapabilityAggregator {
    registry: Arc<ServerRegistry>,
    cache: Mutex<Option<Arc<Index>>>,
}

impl CapabilityAggregator {
    pub fn new(registry: Arc<ServerRegistry>) -> Self {
        Self {
            registry,
            cache: Mutex::new(None),
        }
    }

    /// Snapshot of every tool currently callable.
    pub fn list_tools(&self) -> ToolSnapshot {
        let index = self.index();
        let ready = self.ready_servers();
        ToolSnapshot {
            tools: index
                .listings
                .iter()
                .filter(|t| ready.contains(&t.server_id))
                .cloned()
                .collect(),
            warnings: index.warnings.clone(),
            epoch: index.epoch,
        }
    }

    /// Map a bare or qualified tool name to its owner. `None` when unknown
    /// or the owner is no longer Ready.
    pub fn resolve(&self, name: &str) -> Option<Resolved> {
        let index = self.index();
        let slot = index.by_name.get(name)?;
        let server_id = &slot.definition.server_id;
        let live = self
            .registry
            .connection(server_id)
            .is_some_and(|c| c.is_ready());
        if !live {
            debug!(tool = %name, server = %server_id, "Resolved owner is not ready");
            return None;
        }
        Some(Resolved {
            server_id: server_id.clone(),
            definition: slot.definition.clone(),
            warnings: slot.warning.iter().cloned().collect(),
        })
    }

    /// Wait-able handle that fires when the merged tool list may have changed.
    pub fn watch(&self) -> ToolListWatcher {
        ToolListWatcher {
            events: self.registry.subscribe(),
        }
    }

    fn ready_servers(&self) -> HashSet<String> {
        self.registry
            .ready_connections()
            .iter()
            .map(|c| c.id().to_string())
            .collect()
    }

    fn index(&self) -> Arc<Index> {
        let epoch = self.registry.context().epoch();
        if let Some(index) = self.cache.lock().as_ref() {
            if index.epoch == epoch {
                return Arc::clone(index);
            }
        }

        let sources = self
            .registry
            .ready_connections()
            .into_iter()
            .map(|c| Source {
                server_id: c.id().to_string(),
                ready_stamp: c.ready_stamp(),
                tools: c.tools(),
            })
            .collect();
        let index = Arc::new(Index::build(epoch, sources));
        debug!(epoch, tools = index.listings.len(), "Tool index rebuilt");
        *self.cache.lock() = Some(Arc::clone(&index));
        index
    }
}

/// Notifies the agent that the merged tool list changed.
pub struct ToolListWatcher {
    events: broadcast::Receiver<ConnectionEvent>,
}

impl ToolListWatcher {
    /// Wait for the next event that adds or removes tools. Returns `false`
    /// once the bridge has shut down.
    pub async fn changed(&mut self) -> bool {
        loop {
            match self.events.recv().await {
                Ok(event) if event.affects_tools() => return true,
                Ok(_) => continue,
                // Missed events may have included a change.
                Err(broadcast::error::RecvError::Lagged(_)) => return true,
                Err(broadcast::error::RecvError::Closed) => return false,
            }
        }
    }
}
