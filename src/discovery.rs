// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Identity and peer-address resolution.
//!
//! Sync tasks never read the node id or server address from globals. They
//! are handed an [`Identification`] and a [`Discovery`] at construction,
//! which the embedding process backs with whatever it has: static config,
//! a provisioning agent, DNS, etc.

use crate::config::ReconcileConfig;
use std::sync::RwLock;

/// Resolves this node's identity (the owner id of the logs it produces).
pub trait Identification: Send + Sync + 'static {
    fn node_id(&self) -> String;
}

/// Resolves the address of the peer to reconcile against.
///
/// `None` means "no peer known right now"; the cycle is treated as if the
/// peer were unreachable.
pub trait Discovery: Send + Sync + 'static {
    fn server_url(&self) -> Option<String>;
}

/// Fixed identity.
#[derive(Debug, Clone)]
pub struct StaticIdentity {
    node_id: String,
}

impl StaticIdentity {
    pub fn new(node_id: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
        }
    }

    pub fn from_config(config: &ReconcileConfig) -> Self {
        Self::new(config.node_id.clone())
    }
}

impl Identification for StaticIdentity {
    fn node_id(&self) -> String {
        self.node_id.clone()
    }
}

/// Server address taken from config, replaceable at runtime.
#[derive(Debug, Default)]
pub struct StaticDiscovery {
    server_url: RwLock<Option<String>>,
}

impl StaticDiscovery {
    pub fn new(server_url: impl Into<String>) -> Self {
        Self {
            server_url: RwLock::new(Some(server_url.into())),
        }
    }

    pub fn from_config(config: &ReconcileConfig) -> Self {
        Self::new(config.server_url.clone())
    }

    /// Point at a different server (or none).
    pub fn set_server_url(&self, server_url: Option<String>) {
        match self.server_url.write() {
            Ok(mut guard) => *guard = server_url,
            Err(poisoned) => *poisoned.into_inner() = server_url,
        }
    }
}

impl Discovery for StaticDiscovery {
    fn server_url(&self) -> Option<String> {
        match self.server_url.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}
