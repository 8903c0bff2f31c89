// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Links and monitors
//!
//! A link ties the lifetimes of two actors together: when one terminates, the other
//! receives an exit signal carrying the same reason. A monitor is one-directional: the
//! observer receives a `Down` notification and keeps running.
//!
//! Each actor keeps its half of every link in a [`LinkTable`]. A link entry moves from
//! [`LinkState::Established`] to [`LinkState::ExitPending`] when its owner terminates,
//! and is removed once the peer has been notified (or turned out to be gone).
//!

use crate::{
    Error,
    handle::ActorHandle,
    id::ActorAddress,
    message::ExitReason,
};

use tracing::debug;

use std::collections::HashMap;

/// State of one side of a link.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LinkState {
    Established,
    ExitPending,
}

struct LinkEntry {
    peer: ActorHandle,
    state: LinkState,
}

/// One actor's half of its links.
#[derive(Default)]
pub struct LinkTable {
    entries: HashMap<ActorAddress, LinkEntry>,
}

impl LinkTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `peer`. Returns `false` if the link already existed.
    pub fn insert(&mut self, peer: &ActorHandle) -> bool {
        if self.entries.contains_key(peer.address()) {
            return false;
        }
        self.entries.insert(
            peer.address().clone(),
            LinkEntry {
                peer: peer.clone(),
                state: LinkState::Established,
            },
        );
        true
    }

    pub fn remove(&mut self, peer: &ActorAddress) -> bool {
        self.entries.remove(peer).is_some()
    }

    pub fn contains(&self, peer: &ActorAddress) -> bool {
        self.entries.contains_key(peer)
    }

    pub fn state(&self, peer: &ActorAddress) -> Option<LinkState> {
        self.entries.get(peer).map(|entry| entry.state)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn peers(&self) -> Vec<ActorHandle> {
        self.entries.values().map(|entry| entry.peer.clone()).collect()
    }

    /// Marks every established link exit-pending and returns their peers.
    pub fn begin_exit(&mut self) -> Vec<ActorHandle> {
        self.entries
            .values_mut()
            .filter(|entry| entry.state == LinkState::Established)
            .map(|entry| {
                entry.state = LinkState::ExitPending;
                entry.peer.clone()
            })
            .collect()
    }
}

/// Observers of one actor.
#[derive(Default)]
pub struct MonitorTable {
    observers: HashMap<ActorAddress, ActorHandle>,
}

impl MonitorTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, observer: &ActorHandle) -> bool {
        if self.observers.contains_key(observer.address()) {
            return false;
        }
        self.observers
            .insert(observer.address().clone(), observer.clone());
        true
    }

    pub fn remove(&mut self, observer: &ActorAddress) -> bool {
        self.observers.remove(observer).is_some()
    }

    pub fn contains(&self, observer: &ActorAddress) -> bool {
        self.observers.contains_key(observer)
    }

    pub fn len(&self) -> usize {
        self.observers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observers.is_empty()
    }

    pub fn observers(&self) -> Vec<ActorHandle> {
        self.observers.values().cloned().collect()
    }
}

/// Links `a` and `b`. Linking is symmetric and idempotent.
///
/// Returns `Ok(true)` when a new link was established. If either actor has already
/// exited, the other one receives an exit signal with that reason right away.
pub fn link(a: &ActorHandle, b: &ActorHandle) -> Result<bool, Error> {
    if a == b {
        return Err(Error::InvalidLink(format!(
            "actor {} cannot link to itself",
            a.address()
        )));
    }
    if a.is_remote() && b.is_remote() {
        return Err(Error::InvalidLink(format!(
            "at least one of {} and {} must be local",
            a.address(),
            b.address()
        )));
    }
    let created = match a.inner().add_link(b) {
        Ok(created) => created,
        Err(reason) => {
            debug!("Link target {} already exited.", a.address());
            b.inner().enqueue_exit(a.address().clone(), reason, true);
            return Ok(false);
        }
    };
    if let Err(reason) = b.inner().add_link(a) {
        debug!("Link target {} already exited.", b.address());
        a.inner().unlink(b.address());
        a.inner().enqueue_exit(b.address().clone(), reason, true);
        return Ok(false);
    }
    if created {
        debug!("Linked {} and {}.", a.address(), b.address());
    }
    Ok(created)
}

/// Removes the link between `a` and `b`. Returns whether a link existed.
pub fn unlink(a: &ActorHandle, b: &ActorHandle) -> bool {
    let first = a.inner().unlink(b.address());
    let second = b.inner().unlink(a.address());
    first || second
}

/// Makes `observer` receive a `Down` notification when `observed` terminates.
pub fn monitor(observed: &ActorHandle, observer: &ActorHandle) -> Result<bool, Error> {
    if observed.is_remote() && observer.is_remote() {
        return Err(Error::InvalidLink(format!(
            "at least one of {} and {} must be local",
            observed.address(),
            observer.address()
        )));
    }
    match observed.inner().add_monitor(observer) {
        Ok(created) => Ok(created),
        Err(reason) => {
            observer
                .inner()
                .enqueue_down(observed.address().clone(), reason);
            Ok(false)
        }
    }
}

/// Cancels a monitor set up with [`monitor`].
pub fn demonitor(observed: &ActorHandle, observer: &ActorHandle) -> bool {
    observed.inner().demonitor(observer.address())
}

/// Notifies the links and monitors of a terminated actor.
///
/// `links` are the peers returned by [`LinkTable::begin_exit`] and `monitors` the
/// observers of `source`. Each link produces at most one exit signal: the peer is only
/// notified if it still held its half of the link. The exit-pending entries of
/// `source` are removed afterwards, as are its monitor registrations.
pub fn propagate_exit(
    source: &ActorHandle,
    reason: &ExitReason,
    links: Vec<ActorHandle>,
    monitors: Vec<ActorHandle>,
) {
    let address = source.address();
    for peer in links {
        if peer.inner().remove_link(address) {
            debug!(
                "Propagating exit of {} to linked actor {}: {}.",
                address,
                peer.address(),
                reason
            );
            peer.inner()
                .enqueue_exit(address.clone(), reason.clone(), true);
        }
        source.inner().remove_link(peer.address());
    }
    for observer in monitors {
        debug!(
            "Notifying monitor {} of {} termination: {}.",
            observer.address(),
            address,
            reason
        );
        observer.inner().enqueue_down(address.clone(), reason.clone());
        source.inner().remove_monitor(observer.address());
    }
}
