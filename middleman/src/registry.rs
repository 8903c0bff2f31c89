// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Proxy registry
//!
//! Maps remote actor addresses to their one and only local [`Proxy`]. Lookup and
//! creation happen under a single lock, so concurrent resolutions of the same address
//! always observe the same proxy object.
//!
//! Lock order: the proxy map is locked before the node registry.
//!

use crate::{
    Error,
    node::NodeRegistry,
    proxy::Proxy,
};

use actor::{ActorAddress, ExitReason};

use parking_lot::Mutex;
use tracing::debug;

use std::{collections::HashMap, sync::Arc};

pub struct ProxyRegistry {
    proxies: Mutex<HashMap<ActorAddress, Arc<Proxy>>>,
    nodes: Arc<NodeRegistry>,
}

impl ProxyRegistry {
    pub fn new(nodes: Arc<NodeRegistry>) -> Self {
        Self {
            proxies: Mutex::new(HashMap::new()),
            nodes,
        }
    }

    /// Returns the proxy for `address`, creating it if needed.
    ///
    /// # Error
    ///
    /// Returns `NodeUnreachable` if there is no live connection to the actor's node.
    ///
    pub fn get_or_create(&self, address: &ActorAddress) -> Result<Arc<Proxy>, Error> {
        let mut proxies = self.proxies.lock();
        if let Some(proxy) = proxies.get(address) {
            if !proxy.is_exited() {
                return Ok(proxy.clone());
            }
        }
        let connection = self.nodes.primary(address.node()).ok_or_else(|| {
            Error::NodeUnreachable(format!("no connection to node {}", address.node()))
        })?;
        debug!(
            "Creating proxy for {} over {} connection {}.",
            address,
            connection.kind(),
            connection.id()
        );
        let proxy = Arc::new(Proxy::new(
            address.clone(),
            connection,
            self.nodes.clone(),
        ));
        proxies.insert(address.clone(), proxy.clone());
        Ok(proxy)
    }

    pub fn get(&self, address: &ActorAddress) -> Option<Arc<Proxy>> {
        self.proxies.lock().get(address).cloned()
    }

    pub fn contains(&self, address: &ActorAddress) -> bool {
        self.proxies.lock().contains_key(address)
    }

    /// Exits the proxy for `address` and drops it from the registry.
    pub fn kill(&self, address: &ActorAddress, reason: ExitReason) -> bool {
        let proxy = self.proxies.lock().remove(address);
        match proxy {
            Some(proxy) => {
                proxy.terminate(reason);
                true
            }
            None => false,
        }
    }

    /// Drops the entry for `address` once its proxy has exited and is no longer part of
    /// any link or monitor.
    pub fn remove(&self, address: &ActorAddress) -> bool {
        let mut proxies = self.proxies.lock();
        let removable = proxies
            .get(address)
            .is_some_and(|proxy| proxy.is_exited() && proxy.is_unreferenced());
        if removable {
            proxies.remove(address);
        }
        removable
    }

    /// Drops the entry for `address` if no link, monitor, or handle outside the registry
    /// refers to the proxy.
    pub fn remove_if_unreferenced(&self, address: &ActorAddress) -> bool {
        let mut proxies = self.proxies.lock();
        let removable = proxies.get(address).is_some_and(|proxy| {
            Arc::strong_count(proxy) == 1 && proxy.is_unreferenced()
        });
        if removable {
            debug!("Releasing unreferenced proxy for {}.", address);
            proxies.remove(address);
        }
        removable
    }

    /// Exits every proxy bound to the torn-down connection `connection` with
    /// `NetworkError`. Returns how many proxies exited.
    pub fn exit_node(&self, connection: u64) -> usize {
        let bound: Vec<Arc<Proxy>> = {
            let mut proxies = self.proxies.lock();
            let addresses: Vec<ActorAddress> = proxies
                .iter()
                .filter(|(_, proxy)| proxy.connection().id() == connection)
                .map(|(address, _)| address.clone())
                .collect();
            addresses
                .iter()
                .filter_map(|address| proxies.remove(address))
                .collect()
        };
        bound
            .iter()
            .filter(|proxy| proxy.terminate(ExitReason::NetworkError))
            .count()
    }

    pub fn len(&self) -> usize {
        self.proxies.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.proxies.lock().is_empty()
    }

    /// Exits and drops every proxy.
    pub fn clear(&self) {
        let proxies: Vec<Arc<Proxy>> =
            self.proxies.lock().drain().map(|(_, proxy)| proxy).collect();
        for proxy in proxies {
            proxy.terminate(ExitReason::NetworkError);
        }
    }
}

#[cfg(test)]
mod tests {

    use super::*;
    use crate::node::{Connection, TransportKind};

    use actor::{AbstractActor, ActorId, NodeId};

    use tokio_util::sync::CancellationToken;

    use std::thread;

    fn setup() -> (ProxyRegistry, Arc<Connection>, NodeId) {
        let nodes = Arc::new(NodeRegistry::new(NodeId::new("local")));
        let remote = NodeId::new("remote");
        let connection = Arc::new(Connection::new(
            TransportKind::Tcp,
            "127.0.0.1:4000".parse().unwrap(),
            None,
            CancellationToken::new(),
        ));
        connection.set_node(remote.clone());
        nodes.register(&connection);
        (ProxyRegistry::new(nodes), connection, remote)
    }

    #[test]
    fn test_concurrent_resolution_yields_one_proxy() {
        let (registry, _connection, remote) = setup();
        let registry = Arc::new(registry);
        let address = ActorAddress::new(remote, ActorId(5));

        let workers: Vec<_> = (0..8)
            .map(|_| {
                let registry = registry.clone();
                let address = address.clone();
                thread::spawn(move || registry.get_or_create(&address).unwrap())
            })
            .collect();
        let proxies: Vec<Arc<Proxy>> =
            workers.into_iter().map(|w| w.join().unwrap()).collect();
        assert!(proxies.iter().all(|p| Arc::ptr_eq(p, &proxies[0])));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_unknown_node_is_unreachable() {
        let (registry, _connection, _remote) = setup();
        let address = ActorAddress::new(NodeId::new("elsewhere"), ActorId(1));
        assert!(matches!(
            registry.get_or_create(&address),
            Err(Error::NodeUnreachable(_))
        ));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_closed_connection_is_unreachable() {
        let (registry, connection, remote) = setup();
        connection.close();
        let address = ActorAddress::new(remote, ActorId(1));
        assert!(matches!(
            registry.get_or_create(&address),
            Err(Error::NodeUnreachable(_))
        ));
    }

    #[test]
    fn test_exit_node_exits_bound_proxies_once() {
        let (registry, connection, remote) = setup();
        let first = registry
            .get_or_create(&ActorAddress::new(remote.clone(), ActorId(1)))
            .unwrap();
        let second = registry
            .get_or_create(&ActorAddress::new(remote, ActorId(2)))
            .unwrap();

        assert_eq!(registry.exit_node(connection.id()), 2);
        assert_eq!(registry.exit_node(connection.id()), 0);
        assert!(registry.is_empty());
        assert_eq!(first.exit_reason(), Some(ExitReason::NetworkError));
        assert_eq!(second.exit_reason(), Some(ExitReason::NetworkError));
    }

    #[test]
    fn test_release_unreferenced() {
        let (registry, _connection, remote) = setup();
        let address = ActorAddress::new(remote, ActorId(1));
        let proxy = registry.get_or_create(&address).unwrap();
        assert!(!registry.remove_if_unreferenced(&address));
        drop(proxy);
        assert!(registry.remove_if_unreferenced(&address));
        assert!(!registry.contains(&address));

        let proxy = registry.get_or_create(&address).unwrap();
        assert!(!registry.remove(&address));
        proxy.terminate(ExitReason::Normal);
        assert!(registry.remove(&address));
    }

    #[test]
    fn test_kill() {
        let (registry, _connection, remote) = setup();
        let address = ActorAddress::new(remote, ActorId(1));
        let proxy = registry.get_or_create(&address).unwrap();
        assert!(registry.kill(&address, ExitReason::Unknown));
        assert!(!registry.kill(&address, ExitReason::Unknown));
        assert_eq!(proxy.exit_reason(), Some(ExitReason::Unknown));
    }
}
