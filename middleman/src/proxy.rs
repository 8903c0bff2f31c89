// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Remote actor proxies
//!
//! A [`Proxy`] stands in for an actor living on another node. It implements
//! [`AbstractActor`], so local code sends, links and monitors through it exactly as it
//! would with a local actor. Every operation becomes a [`Frame`] queued on the
//! connection the proxy is bound to.
//!
//! A proxy keeps its own half of the links and monitors that cross the network. When
//! the remote actor terminates, or its connection is lost, [`Proxy::terminate`] runs the
//! regular exit propagation on those tables.
//!

use crate::{
    frame::Frame,
    node::{Connection, NodeRegistry},
};

use actor::{
    AbstractActor, ActorAddress, ActorHandle, ExitReason, LinkTable, MonitorTable,
    Value, propagate_exit,
};

use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::debug;

use std::{any::Any, sync::Arc};

struct ProxyState {
    exit_reason: Option<ExitReason>,
    links: LinkTable,
    monitors: MonitorTable,
}

pub struct Proxy {
    address: ActorAddress,
    connection: Arc<Connection>,
    nodes: Arc<NodeRegistry>,
    state: Mutex<ProxyState>,
    exit: watch::Sender<Option<ExitReason>>,
}

impl Proxy {
    pub fn new(
        address: ActorAddress,
        connection: Arc<Connection>,
        nodes: Arc<NodeRegistry>,
    ) -> Self {
        let (exit, _) = watch::channel(None);
        Self {
            address,
            connection,
            nodes,
            state: Mutex::new(ProxyState {
                exit_reason: None,
                links: LinkTable::new(),
                monitors: MonitorTable::new(),
            }),
            exit,
        }
    }

    pub fn handle(self: &Arc<Self>) -> ActorHandle {
        ActorHandle::new(self.clone())
    }

    pub fn connection(&self) -> &Arc<Connection> {
        &self.connection
    }

    pub fn link_count(&self) -> usize {
        self.state.lock().links.len()
    }

    pub fn monitor_count(&self) -> usize {
        self.state.lock().monitors.len()
    }

    pub fn is_exited(&self) -> bool {
        self.state.lock().exit_reason.is_some()
    }

    /// Whether the proxy can be dropped from its registry.
    pub fn is_unreferenced(&self) -> bool {
        let state = self.state.lock();
        state.links.is_empty() && state.monitors.is_empty()
    }

    /// Records a link the remote actor established, without telling it again.
    pub fn record_link(&self, peer: &ActorHandle) -> bool {
        let mut state = self.state.lock();
        if state.exit_reason.is_some() {
            return false;
        }
        state.links.insert(peer)
    }

    /// Moves the proxy to its terminal state and notifies links and monitors.
    ///
    /// Only the first call has an effect.
    pub fn terminate(self: &Arc<Self>, reason: ExitReason) -> bool {
        let (links, monitors) = {
            let mut state = self.state.lock();
            if state.exit_reason.is_some() {
                return false;
            }
            state.exit_reason = Some(reason.clone());
            (state.links.begin_exit(), state.monitors.observers())
        };
        debug!("Proxy for {} exited: {}.", self.address, reason);
        propagate_exit(&self.handle(), &reason, links, monitors);
        self.exit.send_replace(Some(reason));
        true
    }

    /// Records that the remote node now holds a reference to `address` if it is local.
    fn export(&self, address: &ActorAddress) {
        if address.node() == self.nodes.local() {
            self.nodes.export(self.address.node(), address.id());
        }
    }

    fn send(&self, frame: Frame) {
        if self.is_exited() {
            debug!("Dropping {:?} for exited proxy {}.", frame, self.address);
            return;
        }
        self.connection.send(frame);
    }
}

impl AbstractActor for Proxy {
    fn address(&self) -> &ActorAddress {
        &self.address
    }

    fn is_remote(&self) -> bool {
        true
    }

    fn enqueue(&self, sender: Option<ActorHandle>, payload: Value) {
        let from = sender.map(|sender| sender.address().clone());
        if let Some(from) = &from {
            self.export(from);
        }
        if let Some(address) = payload.address() {
            self.export(address);
        }
        self.send(Frame::Message {
            from,
            to: self.address.clone(),
            payload,
        });
    }

    fn enqueue_exit(&self, source: ActorAddress, reason: ExitReason, via_link: bool) {
        self.export(&source);
        self.send(Frame::Exit {
            from: source,
            to: self.address.clone(),
            reason,
            via_link,
        });
    }

    fn enqueue_down(&self, source: ActorAddress, reason: ExitReason) {
        self.send(Frame::Down {
            from: source,
            to: self.address.clone(),
            reason,
        });
    }

    fn add_link(&self, peer: &ActorHandle) -> Result<bool, ExitReason> {
        let created = {
            let mut state = self.state.lock();
            if let Some(reason) = &state.exit_reason {
                return Err(reason.clone());
            }
            state.links.insert(peer)
        };
        if created {
            self.export(peer.address());
            self.connection.send(Frame::Link {
                from: peer.address().clone(),
                to: self.address.clone(),
            });
        }
        Ok(created)
    }

    fn remove_link(&self, peer: &ActorAddress) -> bool {
        self.state.lock().links.remove(peer)
    }

    fn unlink(&self, peer: &ActorAddress) -> bool {
        let removed = self.remove_link(peer);
        if removed {
            self.send(Frame::Unlink {
                from: peer.clone(),
                to: self.address.clone(),
            });
        }
        removed
    }

    fn add_monitor(&self, observer: &ActorHandle) -> Result<bool, ExitReason> {
        let created = {
            let mut state = self.state.lock();
            if let Some(reason) = &state.exit_reason {
                return Err(reason.clone());
            }
            state.monitors.insert(observer)
        };
        if created {
            self.export(observer.address());
            self.connection.send(Frame::Monitor {
                from: observer.address().clone(),
                to: self.address.clone(),
            });
        }
        Ok(created)
    }

    fn remove_monitor(&self, observer: &ActorAddress) -> bool {
        self.state.lock().monitors.remove(observer)
    }

    fn demonitor(&self, observer: &ActorAddress) -> bool {
        let removed = self.remove_monitor(observer);
        if removed {
            self.send(Frame::Demonitor {
                from: observer.clone(),
                to: self.address.clone(),
            });
        }
        removed
    }

    fn exit_reason(&self) -> Option<ExitReason> {
        self.state.lock().exit_reason.clone()
    }

    fn subscribe_exit(&self) -> watch::Receiver<Option<ExitReason>> {
        self.exit.subscribe()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl std::fmt::Debug for Proxy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Proxy")
            .field("address", &self.address)
            .field("connection", &self.connection.id())
            .field("exited", &self.is_exited())
            .finish()
    }
}
