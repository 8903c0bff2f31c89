// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Connections and the node registry
//!
//! A [`Connection`] is one stream (TCP) or one peer of a datagram socket (UDP). It
//! learns which node sits on the other end during the handshake, and only then is it
//! registered in the [`NodeRegistry`].
//!
//! The registry keeps one primary connection per `(node, transport)` pair. Proxies send
//! through the primary connection of their node. Further handshakes with an already
//! known node leave their connections open as secondaries; a secondary is promoted
//! when the primary goes away.
//!

use crate::frame::Frame;

use actor::{ActorId, MailboxQueue, NodeId};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use std::{
    collections::{HashMap, HashSet},
    fmt::{Display, Formatter},
    net::SocketAddr,
    sync::{
        Arc, OnceLock,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    time::{Duration, Instant},
};

/// Transport a connection runs over.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransportKind {
    /// Reliable, ordered stream.
    Tcp,
    /// Best-effort datagrams.
    Udp,
}

impl TransportKind {
    pub fn is_reliable(&self) -> bool {
        matches!(self, TransportKind::Tcp)
    }
}

impl Display for TransportKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportKind::Tcp => write!(f, "tcp"),
            TransportKind::Udp => write!(f, "udp"),
        }
    }
}

static CONNECTION_IDS: AtomicU64 = AtomicU64::new(1);

pub struct Connection {
    id: u64,
    kind: TransportKind,
    peer: SocketAddr,
    /// Port of the published endpoint that accepted the connection.
    endpoint: Option<u16>,
    node: OnceLock<NodeId>,
    outbound: MailboxQueue<Frame>,
    last_activity: Mutex<Instant>,
    closed: AtomicBool,
    cancel: CancellationToken,
}

impl Connection {
    pub fn new(
        kind: TransportKind,
        peer: SocketAddr,
        endpoint: Option<u16>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            id: CONNECTION_IDS.fetch_add(1, Ordering::Relaxed),
            kind,
            peer,
            endpoint,
            node: OnceLock::new(),
            outbound: MailboxQueue::new(),
            last_activity: Mutex::new(Instant::now()),
            closed: AtomicBool::new(false),
            cancel,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn kind(&self) -> TransportKind {
        self.kind
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn endpoint(&self) -> Option<u16> {
        self.endpoint
    }

    /// Remote node, once the handshake told us.
    pub fn node(&self) -> Option<&NodeId> {
        self.node.get()
    }

    /// Assigns the remote node. Returns `false` if another node was already assigned.
    pub fn set_node(&self, node: NodeId) -> bool {
        let assigned = self.node.get_or_init(|| node.clone());
        assigned == &node
    }

    /// Queues `frame` for the writer. Frames for a closed connection are dropped.
    pub fn send(&self, frame: Frame) {
        if self.is_closed() {
            debug!("Dropping {:?} on closed connection {}.", frame, self.id);
            return;
        }
        if frame.is_control() {
            self.outbound.prepend(frame);
        } else {
            self.outbound.append(frame);
        }
    }

    pub fn outbound(&self) -> &MailboxQueue<Frame> {
        &self.outbound
    }

    pub fn touch(&self) {
        *self.last_activity.lock() = Instant::now();
    }

    pub fn idle_for(&self) -> Duration {
        self.last_activity.lock().elapsed()
    }

    /// Closes the outbound queue, which stops the writer, and cancels the connection
    /// tasks. Idempotent.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            debug!("Closing {} connection {} to {}.", self.kind, self.id, self.peer);
        }
        self.outbound.close();
        self.cancel.cancel();
    }

    /// Closed explicitly, or cancelled along with its endpoint or middleman.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire) || self.cancel.is_cancelled()
    }

    pub async fn closed(&self) {
        self.cancel.cancelled().await
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("peer", &self.peer)
            .field("node", &self.node.get())
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[derive(Default)]
struct NodeState {
    primaries: HashMap<(NodeId, TransportKind), Arc<Connection>>,
    secondaries: HashMap<(NodeId, TransportKind), Vec<Arc<Connection>>>,
    /// Local actors each node holds references to.
    exported: HashMap<NodeId, HashSet<ActorId>>,
}

pub struct NodeRegistry {
    local: NodeId,
    state: Mutex<NodeState>,
}

impl NodeRegistry {
    pub fn new(local: NodeId) -> Self {
        Self {
            local,
            state: Mutex::new(NodeState::default()),
        }
    }

    /// The local node.
    pub fn local(&self) -> &NodeId {
        &self.local
    }

    /// Registers a connection whose node is known. Returns `true` if it became the
    /// primary connection of its node.
    pub fn register(&self, connection: &Arc<Connection>) -> bool {
        let Some(node) = connection.node() else {
            return false;
        };
        let key = (node.clone(), connection.kind());
        let mut state = self.state.lock();
        match state.primaries.get(&key) {
            Some(primary) if primary.id() == connection.id() => true,
            Some(primary) if !primary.is_closed() => {
                let secondaries = state.secondaries.entry(key).or_default();
                if !secondaries.iter().any(|c| c.id() == connection.id()) {
                    secondaries.push(connection.clone());
                }
                false
            }
            _ => {
                state.primaries.insert(key, connection.clone());
                true
            }
        }
    }

    /// Removes a connection, promoting a live secondary if it was primary.
    pub fn remove(&self, connection: &Connection) -> Option<Arc<Connection>> {
        let node = connection.node()?;
        let key = (node.clone(), connection.kind());
        let mut state = self.state.lock();
        if let Some(secondaries) = state.secondaries.get_mut(&key) {
            secondaries.retain(|c| c.id() != connection.id() && !c.is_closed());
        }
        let mut promoted = None;
        if state
            .primaries
            .get(&key)
            .is_some_and(|primary| primary.id() == connection.id())
        {
            state.primaries.remove(&key);
            let next = state.secondaries.get_mut(&key).and_then(|s| s.pop());
            if let Some(next) = next {
                state.primaries.insert(key.clone(), next.clone());
                promoted = Some(next);
            }
        }
        if state.secondaries.get(&key).is_some_and(|s| s.is_empty()) {
            state.secondaries.remove(&key);
        }
        if !state.primaries.keys().any(|(n, _)| n == node) {
            state.exported.remove(node);
        }
        promoted
    }

    /// Live primary connection to `node`, preferring the reliable transport.
    pub fn primary(&self, node: &NodeId) -> Option<Arc<Connection>> {
        let state = self.state.lock();
        [TransportKind::Tcp, TransportKind::Udp]
            .into_iter()
            .filter_map(|kind| state.primaries.get(&(node.clone(), kind)))
            .find(|connection| !connection.is_closed())
            .cloned()
    }

    pub fn is_connected(&self, node: &NodeId) -> bool {
        self.primary(node).is_some()
    }

    /// Nodes with at least one live connection.
    pub fn nodes(&self) -> Vec<NodeId> {
        let state = self.state.lock();
        let nodes: HashSet<NodeId> = state
            .primaries
            .iter()
            .filter(|(_, connection)| !connection.is_closed())
            .map(|((node, _), _)| node.clone())
            .collect();
        nodes.into_iter().collect()
    }

    pub fn connection_count(&self) -> usize {
        let state = self.state.lock();
        state.primaries.len() + state.secondaries.values().map(Vec::len).sum::<usize>()
    }

    /// Records that `node` received a reference to the local actor `actor`.
    pub fn export(&self, node: &NodeId, actor: ActorId) {
        if node == &self.local {
            return;
        }
        self.state
            .lock()
            .exported
            .entry(node.clone())
            .or_default()
            .insert(actor);
    }

    /// Forgets every export of `actor` and returns the nodes that held it.
    pub fn take_exporters(&self, actor: ActorId) -> Vec<NodeId> {
        let mut state = self.state.lock();
        state
            .exported
            .iter_mut()
            .filter_map(|(node, actors)| actors.remove(&actor).then(|| node.clone()))
            .collect()
    }

    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.primaries.clear();
        state.secondaries.clear();
        state.exported.clear();
    }
}
