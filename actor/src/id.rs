// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Actor identities
//!
//! The `id` module provides the identity types of the actor system: the [`NodeId`] of a
//! running system instance, the [`ActorId`] assigned to every actor spawned on it, and the
//! [`ActorAddress`] value type combining both.
//!
//! Addresses are plain values. Two handles referring to the same address refer to the
//! same actor, no matter how they were obtained.
//!

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use std::fmt::{Display, Formatter};
use std::sync::atomic::{AtomicU64, Ordering};

/// Identifier of one running actor-system instance.
///
/// A node id is derived from the host identity plus a boot token drawn when the
/// system is created, so two systems started in the same process (or two restarts
/// of the same program) never share an id. It is immutable once assigned.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId {
    host: String,
    boot: Uuid,
}

impl NodeId {
    /// Creates a node id for `host` with a fresh boot token.
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            boot: Uuid::new_v4(),
        }
    }

    /// Creates a node id for the current host.
    ///
    /// The host label is read from `HOSTNAME`, falling back to `localhost`.
    pub fn local() -> Self {
        let host = std::env::var("HOSTNAME")
            .ok()
            .filter(|host| !host.is_empty())
            .unwrap_or_else(|| "localhost".to_owned());
        Self::new(host)
    }

    /// Host label of the node.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Boot token of the node.
    pub fn boot(&self) -> &Uuid {
        &self.boot
    }
}

impl Display for NodeId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let boot = self.boot.simple().to_string();
        write!(f, "{}#{}", self.host, &boot[..8])
    }
}

/// Identifier of an actor, unique within the node that spawned it.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct ActorId(pub u64);

impl Display for ActorId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Monotonic actor id generator, one per actor system.
#[derive(Debug)]
pub(crate) struct ActorIdGenerator(AtomicU64);

impl ActorIdGenerator {
    pub(crate) fn new() -> Self {
        Self(AtomicU64::new(1))
    }

    pub(crate) fn next(&self) -> ActorId {
        ActorId(self.0.fetch_add(1, Ordering::Relaxed))
    }
}

/// Network-wide address of an actor.
///
/// Equality of addresses defines actor identity.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ActorAddress {
    node: NodeId,
    id: ActorId,
}

impl ActorAddress {
    pub fn new(node: NodeId, id: ActorId) -> Self {
        Self { node, id }
    }

    pub fn node(&self) -> &NodeId {
        &self.node
    }

    pub fn id(&self) -> ActorId {
        self.id
    }
}

impl Display for ActorAddress {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.id, self.node)
    }
}
