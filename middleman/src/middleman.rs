// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Middleman
//!
//! The [`Middleman`] connects one actor system to the network. It owns the node
//! registry, the proxy registry, the pending handshakes and every published endpoint,
//! and it is the only network type application code talks to.
//!
//! ## Publish and connect
//!
//! [`Middleman::publish`] binds a new endpoint for a local actor. A remote caller runs
//! [`Middleman::connect`] against it: the caller sends `CONNECT` with its node id and
//! the endpoint answers with its own node id, the id of the published actor and the
//! actor's type signature. The caller then resolves the actor address through the proxy
//! registry, so every connect resolving to the same remote actor yields the very same
//! proxy, whatever port it went through.
//!
//! ## Failures
//!
//! When a connection goes away, every proxy bound to it exits with
//! [`ExitReason::NetworkError`], which in turn notifies the local actors linked to or
//! monitoring those proxies. Connections are never re-established automatically.
//!

use crate::{
    Error,
    config::MiddlemanConfig,
    frame::Frame,
    handshake::{HandshakeReply, HandshakeTable},
    node::{Connection, NodeRegistry, TransportKind},
    registry::ProxyRegistry,
    transport::{Dispatcher, Endpoint, EndpointInfo, TransportContext, tcp, udp},
};

use actor::{
    AbstractActor, ActorAddress, ActorCell, ActorHandle, ExitReason, NodeId, RemoteResolver, Sink,
    Subscriber, SystemEvent, SystemRef, TypeSignature, Value,
};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::{net::lookup_host, time::timeout};
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing::{Instrument, Span, debug, info, warn};

use std::{
    collections::HashMap,
    net::SocketAddr,
    sync::{Arc, Weak},
    time::Duration,
};

/// Options of [`Middleman::connect_with`].
#[derive(Clone, Debug, Default)]
pub struct ConnectOptions {
    /// Transport to use. Defaults to TCP when it is enabled, UDP otherwise.
    pub transport: Option<TransportKind>,
    /// Message types the remote actor must accept. Empty accepts any actor.
    pub expected: TypeSignature,
    /// Overrides the configured handshake timeout.
    pub timeout: Option<Duration>,
}

impl ConnectOptions {
    pub fn transport(mut self, transport: TransportKind) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn expect(mut self, expected: TypeSignature) -> Self {
        self.expected = expected;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// What [`Middleman::unpublish`] closes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Unpublish {
    /// Every endpoint of the actor.
    Actor(ActorAddress),
    /// The endpoints bound to the port, on any transport.
    Port(u16),
}

#[derive(Clone)]
pub struct Middleman {
    inner: Arc<MiddlemanInner>,
}

struct MiddlemanInner {
    system: SystemRef,
    config: Arc<MiddlemanConfig>,
    nodes: Arc<NodeRegistry>,
    proxies: ProxyRegistry,
    handshakes: HandshakeTable,
    endpoints: Mutex<HashMap<(TransportKind, u16), Arc<Endpoint>>>,
    transport: TransportContext,
    token: CancellationToken,
    tracker: TaskTracker,
    this: Weak<MiddlemanInner>,
}

impl Middleman {
    /// Validates `config` and attaches a new middleman to `system`.
    ///
    /// Must be called within a Tokio runtime.
    ///
    /// # Error
    ///
    /// Returns `Configuration` if the configuration is invalid. Nothing is registered
    /// in that case.
    ///
    pub fn start(system: &SystemRef, config: MiddlemanConfig) -> Result<Self, Error> {
        config.validate()?;
        let config = Arc::new(config);
        let token = system.child_token();
        let tracker = TaskTracker::new();
        let nodes = Arc::new(NodeRegistry::new(system.node().clone()));

        let inner = Arc::new_cyclic(|this: &Weak<MiddlemanInner>| {
            let dispatcher: Weak<dyn Dispatcher> = this.clone();
            MiddlemanInner {
                system: system.clone(),
                config: config.clone(),
                nodes: nodes.clone(),
                proxies: ProxyRegistry::new(nodes.clone()),
                handshakes: HandshakeTable::new(),
                endpoints: Mutex::new(HashMap::new()),
                transport: TransportContext {
                    config: config.clone(),
                    token: token.clone(),
                    tracker: tracker.clone(),
                    runtime: system.runtime().clone(),
                    dispatcher,
                },
                token: token.clone(),
                tracker: tracker.clone(),
                this: this.clone(),
            }
        });

        let resolver: Weak<MiddlemanInner> = Arc::downgrade(&inner);
        let resolver: Weak<dyn RemoteResolver> = resolver;
        system.set_remote_resolver(resolver);

        let mut sink = Sink::new(
            system.subscribe(),
            TerminationWatcher {
                inner: Arc::downgrade(&inner),
            },
        )
        .with_token(token);
        tracker.spawn(async move { sink.run().await }.in_current_span());

        info!(
            "Middleman started on node {} (tcp: {}, udp: {}).",
            system.node(),
            config.enable_tcp,
            config.enable_udp
        );
        Ok(Self { inner })
    }

    /// The local node.
    pub fn node(&self) -> &NodeId {
        self.inner.nodes.local()
    }

    pub fn system(&self) -> &SystemRef {
        &self.inner.system
    }

    pub fn config(&self) -> &MiddlemanConfig {
        &self.inner.config
    }

    /// Publishes a local actor on a new endpoint.
    ///
    /// `port` 0 picks an ephemeral port. Every call binds a new endpoint, even for an
    /// actor that is already published. `bind_address` overrides the configured one.
    ///
    /// # Error
    ///
    /// Returns `PortInUse` if an explicit port is taken and `TransportDisabled` if the
    /// requested transport is not enabled.
    ///
    pub async fn publish(
        &self,
        actor: &ActorHandle,
        port: u16,
        bind_address: Option<&str>,
        reliable: bool,
    ) -> Result<EndpointInfo, Error> {
        let inner = &self.inner;
        inner.ensure_running()?;
        let kind = if reliable {
            TransportKind::Tcp
        } else {
            TransportKind::Udp
        };
        inner.ensure_enabled(kind)?;
        let Some(signature) = actor
            .downcast_ref::<ActorCell>()
            .map(|cell| cell.signature().clone())
        else {
            return Err(Error::Actor(actor::Error::Functional(format!(
                "only local actors can be published, {} is remote",
                actor.address()
            ))));
        };
        if !actor.is_alive() {
            return Err(Error::Actor(actor::Error::ActorExited(
                actor.address().clone(),
            )));
        }
        let ip = match bind_address {
            Some(address) => address.parse().map_err(|_| {
                Error::Configuration(format!("invalid bind address {}", address))
            })?,
            None => inner.config.bind_ip()?,
        };

        let cancel = inner.token.child_token();
        let endpoint = match kind {
            TransportKind::Tcp => {
                let listener = tcp::bind(ip, port).await?;
                let local_addr = listener
                    .local_addr()
                    .map_err(|e| Error::NetworkError(e.to_string()))?;
                let endpoint = inner.register_endpoint(Endpoint {
                    kind,
                    port: local_addr.port(),
                    local_addr,
                    actor: actor.clone(),
                    signature: signature.clone(),
                    cancel: cancel.clone(),
                });
                tcp::serve(&inner.transport, listener, local_addr.port(), cancel);
                endpoint
            }
            TransportKind::Udp => {
                let socket = udp::bind(ip, port).await?;
                let local_addr = socket
                    .local_addr()
                    .map_err(|e| Error::NetworkError(e.to_string()))?;
                let endpoint = inner.register_endpoint(Endpoint {
                    kind,
                    port: local_addr.port(),
                    local_addr,
                    actor: actor.clone(),
                    signature: signature.clone(),
                    cancel: cancel.clone(),
                });
                udp::serve(&inner.transport, socket, local_addr.port(), cancel);
                endpoint
            }
        };
        info!(
            "Published {} on {} {}.",
            actor.address(),
            kind,
            endpoint.local_addr
        );
        Ok(endpoint.info())
    }

    /// Closes endpoints. Returns how many were closed.
    pub fn unpublish(&self, target: Unpublish) -> usize {
        self.inner.unpublish(&target)
    }

    /// Connects to the actor published on `host:port` with the default options.
    pub async fn connect(&self, host: &str, port: u16) -> Result<ActorHandle, Error> {
        self.connect_with(host, port, ConnectOptions::default()).await
    }

    /// Connects to the actor published on `host:port`.
    ///
    /// Connecting to an endpoint of the local node returns the local actor itself.
    ///
    /// # Error
    ///
    /// - `HandshakeTypeMismatch` if the actor does not accept every expected type.
    /// - `Timeout` if the endpoint does not answer in time.
    /// - `NodeUnreachable` if the endpoint cannot be reached.
    ///
    pub async fn connect_with(
        &self,
        host: &str,
        port: u16,
        options: ConnectOptions,
    ) -> Result<ActorHandle, Error> {
        let inner = &self.inner;
        inner.ensure_running()?;
        let kind = match options.transport {
            Some(kind) => kind,
            None if inner.config.enable_tcp => TransportKind::Tcp,
            None => TransportKind::Udp,
        };
        inner.ensure_enabled(kind)?;
        let limit = options
            .timeout
            .unwrap_or_else(|| inner.config.handshake_timeout());

        let peer = resolve_peer(host, port).await?;
        debug!("Connecting to {} over {}.", peer, kind);
        let connection = match kind {
            TransportKind::Tcp => tcp::connect(&inner.transport, peer, limit).await?,
            TransportKind::Udp => {
                udp::connect(&inner.transport, inner.config.bind_ip()?, peer).await?
            }
        };
        let reply = match inner.handshake(&connection, limit).await {
            Ok(reply) => reply,
            Err(e) => {
                connection.close();
                return Err(e);
            }
        };
        inner.complete_connect(&connection, reply, &options.expected)
    }

    /// Sends `payload` to `target` without a sender.
    pub fn send(&self, target: &ActorHandle, payload: Value) {
        self.inner.system.send(None, target, payload);
    }

    /// Sends `payload` to `target` on behalf of `sender`.
    pub fn send_as(&self, sender: &ActorHandle, target: &ActorHandle, payload: Value) {
        self.inner.system.send(Some(sender), target, payload);
    }

    pub fn send_exit(&self, target: &ActorHandle, reason: ExitReason) {
        self.inner.system.send_exit(target, reason);
    }

    /// Links two actors, at least one of them local.
    pub fn link(&self, a: &ActorHandle, b: &ActorHandle) -> Result<bool, Error> {
        Ok(self.inner.system.link(a, b)?)
    }

    pub fn unlink(&self, a: &ActorHandle, b: &ActorHandle) -> bool {
        self.inner.system.unlink(a, b)
    }

    /// Makes `observer` receive a down notification when `observed` terminates.
    pub fn monitor(&self, observed: &ActorHandle, observer: &ActorHandle) -> Result<bool, Error> {
        Ok(self.inner.system.monitor(observed, observer)?)
    }

    pub fn demonitor(&self, observed: &ActorHandle, observer: &ActorHandle) -> bool {
        self.inner.system.demonitor(observed, observer)
    }

    pub fn proxy_count(&self) -> usize {
        self.inner.proxies.len()
    }

    pub fn has_proxy(&self, address: &ActorAddress) -> bool {
        self.inner.proxies.contains(address)
    }

    /// Nodes with a live connection.
    pub fn connected_nodes(&self) -> Vec<NodeId> {
        self.inner.nodes.nodes()
    }

    /// Endpoints currently published, sorted by port.
    pub fn published_ports(&self) -> Vec<EndpointInfo> {
        let mut ports: Vec<EndpointInfo> = self
            .inner
            .endpoints
            .lock()
            .values()
            .map(|endpoint| endpoint.info())
            .collect();
        ports.sort_by_key(|info| (info.port, info.transport.is_reliable()));
        ports
    }

    /// Stops every endpoint and connection, waits for all network tasks, then clears
    /// the registries. Proxies exit with `NetworkError`.
    pub async fn shutdown(&self) {
        let inner = &self.inner;
        debug!("Shutting down middleman of {}.", inner.nodes.local());
        inner.token.cancel();
        let endpoints: Vec<Arc<Endpoint>> =
            inner.endpoints.lock().drain().map(|(_, e)| e).collect();
        for endpoint in endpoints {
            endpoint.close();
        }
        inner.tracker.close();
        inner.tracker.wait().await;
        inner.handshakes.clear();
        inner.proxies.clear();
        inner.nodes.clear();
        inner.system.clear_remote_resolver();
        info!("Middleman of {} stopped.", inner.nodes.local());
    }
}

impl MiddlemanInner {
    fn ensure_running(&self) -> Result<(), Error> {
        if self.token.is_cancelled() {
            return Err(Error::NetworkError("middleman is shut down".to_owned()));
        }
        Ok(())
    }

    fn ensure_enabled(&self, kind: TransportKind) -> Result<(), Error> {
        let enabled = match kind {
            TransportKind::Tcp => self.config.enable_tcp,
            TransportKind::Udp => self.config.enable_udp,
        };
        if enabled {
            Ok(())
        } else {
            Err(Error::TransportDisabled(kind))
        }
    }

    fn register_endpoint(&self, endpoint: Endpoint) -> Arc<Endpoint> {
        let endpoint = Arc::new(endpoint);
        self.endpoints
            .lock()
            .insert((endpoint.kind, endpoint.port), endpoint.clone());
        endpoint
    }

    fn unpublish(&self, target: &Unpublish) -> usize {
        let removed: Vec<Arc<Endpoint>> = {
            let mut endpoints = self.endpoints.lock();
            let keys: Vec<(TransportKind, u16)> = endpoints
                .iter()
                .filter(|(_, endpoint)| match target {
                    Unpublish::Actor(address) => endpoint.actor.address() == address,
                    Unpublish::Port(port) => endpoint.port == *port,
                })
                .map(|(key, _)| *key)
                .collect();
            keys.iter().filter_map(|key| endpoints.remove(key)).collect()
        };
        for endpoint in &removed {
            info!(
                "Unpublished {} from {} port {}.",
                endpoint.actor.address(),
                endpoint.kind,
                endpoint.port
            );
            endpoint.close();
        }
        removed.len()
    }

    /// Runs the client side of the handshake over a fresh connection.
    async fn handshake(
        &self,
        connection: &Arc<Connection>,
        limit: Duration,
    ) -> Result<HandshakeReply, Error> {
        let (token, mut receiver) = self.handshakes.register(connection.id());
        let hello = Frame::Connect {
            token,
            from: self.nodes.local().clone(),
        };
        let answered = if connection.kind().is_reliable() {
            connection.send(hello);
            timeout(limit, receiver).await
        } else {
            let mut strategy = self.config.handshake_strategy(limit);
            timeout(limit, async {
                for attempt in 1..=strategy.max_retries() {
                    debug!(
                        "Handshake {:016x} attempt {} to {}.",
                        token,
                        attempt,
                        connection.peer()
                    );
                    connection.send(hello.clone());
                    let wait = strategy.next_backoff().unwrap_or(limit);
                    if let Ok(answer) = timeout(wait, &mut receiver).await {
                        return answer;
                    }
                }
                receiver.await
            })
            .await
        };
        match answered {
            Ok(Ok(reply)) => reply,
            Ok(Err(_)) => Err(Error::NodeUnreachable(format!(
                "handshake with {} abandoned",
                connection.peer()
            ))),
            Err(_) => {
                self.handshakes.cancel(token);
                Err(Error::Timeout(format!(
                    "no handshake answer from {} within {:?}",
                    connection.peer(),
                    limit
                )))
            }
        }
    }

    /// Turns a handshake answer into a handle.
    fn complete_connect(
        &self,
        connection: &Arc<Connection>,
        reply: HandshakeReply,
        expected: &TypeSignature,
    ) -> Result<ActorHandle, Error> {
        if !reply.signature.is_compatible_with(expected) {
            connection.close();
            return Err(Error::HandshakeTypeMismatch {
                expected: expected.clone(),
                declared: reply.signature,
            });
        }
        let local = self.nodes.local();
        if &reply.from == local {
            connection.close();
            let address = ActorAddress::new(local.clone(), reply.actor);
            return self
                .system
                .get(reply.actor)
                .ok_or(Error::Actor(actor::Error::NotFound(address)));
        }
        if !connection.set_node(reply.from.clone()) {
            connection.close();
            return Err(Error::HandshakeRejected(format!(
                "{} answered for another node",
                connection.peer()
            )));
        }
        self.nodes.register(connection);
        let address = ActorAddress::new(reply.from, reply.actor);
        let proxy = self.proxies.get_or_create(&address)?;
        info!(
            "Connected to {} over {} {}.",
            address,
            connection.kind(),
            connection.peer()
        );
        Ok(proxy.handle())
    }

    /// Server side of the handshake.
    fn accept_handshake(&self, connection: &Arc<Connection>, token: u64, from: NodeId) {
        let endpoint = connection.endpoint().and_then(|port| {
            self.endpoints
                .lock()
                .get(&(connection.kind(), port))
                .cloned()
        });
        let Some(endpoint) = endpoint.filter(|endpoint| endpoint.actor.is_alive()) else {
            connection.send(Frame::ConnectNack {
                token,
                reason: "no actor published on this endpoint".to_owned(),
            });
            return;
        };
        let local = self.nodes.local();
        if &from != local {
            if !connection.set_node(from.clone()) {
                connection.send(Frame::ConnectNack {
                    token,
                    reason: format!("connection already bound to another node than {}", from),
                });
                return;
            }
            if self.nodes.register(connection) {
                debug!("Node {} connected from {}.", from, connection.peer());
            }
            self.nodes.export(&from, endpoint.actor.address().id());
        }
        connection.send(Frame::ConnectAck {
            token,
            from: local.clone(),
            actor: endpoint.actor.address().id(),
            signature: endpoint.signature.clone(),
        });
    }

    /// Local actor behind `address`, if it is local and alive.
    fn local_actor(&self, address: &ActorAddress) -> Option<ActorHandle> {
        if address.node() != self.nodes.local() {
            return None;
        }
        self.system.get(address.id())
    }

    /// Handle for an address read from the wire: the local actor or a proxy.
    fn resolve_inbound(&self, address: &ActorAddress) -> Option<ActorHandle> {
        if address.node() == self.nodes.local() {
            return self.system.get(address.id());
        }
        match self.proxies.get_or_create(address) {
            Ok(proxy) => Some(proxy.handle()),
            Err(e) => {
                debug!("Cannot resolve {}: {}", address, e);
                None
            }
        }
    }

    fn deliver_message(
        &self,
        connection: &Arc<Connection>,
        from: Option<ActorAddress>,
        to: ActorAddress,
        payload: Value,
    ) {
        let Some(target) = self.local_actor(&to) else {
            debug!("Message for unknown actor {}.", to);
            connection.send(Frame::KillProxy {
                actor: to,
                reason: ExitReason::Unknown,
            });
            return;
        };
        let sender = from.and_then(|from| self.resolve_inbound(&from));
        if let Some(address) = payload.address() {
            self.resolve_inbound(address);
        }
        target.inner().enqueue(sender, payload);
    }

    fn deliver_exit(&self, from: ActorAddress, to: ActorAddress, reason: ExitReason, via_link: bool) {
        let Some(target) = self.local_actor(&to) else {
            debug!("Exit signal for unknown actor {}.", to);
            return;
        };
        if !via_link {
            target.inner().enqueue_exit(from, reason, false);
            return;
        }
        if target.inner().remove_link(&from) {
            if let Some(proxy) = self.proxies.get(&from) {
                proxy.remove_link(&to);
            }
            target.inner().enqueue_exit(from.clone(), reason, true);
        }
        self.proxies.remove_if_unreferenced(&from);
    }

    fn deliver_down(&self, from: ActorAddress, to: ActorAddress, reason: ExitReason) {
        let Some(observer) = self.local_actor(&to) else {
            return;
        };
        let Some(proxy) = self.proxies.get(&from) else {
            return;
        };
        if proxy.remove_monitor(&to) {
            observer.inner().enqueue_down(from.clone(), reason);
        }
        self.proxies.remove_if_unreferenced(&from);
    }

    fn accept_link(&self, connection: &Arc<Connection>, from: ActorAddress, to: ActorAddress) {
        let Some(target) = self.local_actor(&to) else {
            connection.send(Frame::KillProxy {
                actor: to,
                reason: ExitReason::Unknown,
            });
            return;
        };
        let Ok(proxy) = self.proxies.get_or_create(&from) else {
            return;
        };
        match target.inner().add_link(&proxy.handle()) {
            Ok(_) => {
                if !proxy.record_link(&target) && target.inner().remove_link(&from) {
                    let reason = proxy.exit_reason().unwrap_or(ExitReason::NetworkError);
                    target.inner().enqueue_exit(from, reason, true);
                }
            }
            Err(reason) => connection.send(Frame::Exit {
                from: to,
                to: from,
                reason,
                via_link: true,
            }),
        }
    }

    fn accept_unlink(&self, from: ActorAddress, to: ActorAddress) {
        if let Some(target) = self.local_actor(&to) {
            target.inner().remove_link(&from);
        }
        if let Some(proxy) = self.proxies.get(&from) {
            proxy.remove_link(&to);
        }
        self.proxies.remove_if_unreferenced(&from);
    }

    fn accept_monitor(&self, connection: &Arc<Connection>, from: ActorAddress, to: ActorAddress) {
        let Some(target) = self.local_actor(&to) else {
            connection.send(Frame::Down {
                from: to,
                to: from,
                reason: ExitReason::Unknown,
            });
            return;
        };
        let Ok(proxy) = self.proxies.get_or_create(&from) else {
            return;
        };
        if let Err(reason) = target.inner().add_monitor(&proxy.handle()) {
            connection.send(Frame::Down {
                from: to,
                to: from,
                reason,
            });
        }
    }

    fn accept_demonitor(&self, from: ActorAddress, to: ActorAddress) {
        if let Some(target) = self.local_actor(&to) {
            target.inner().remove_monitor(&from);
        }
        self.proxies.remove_if_unreferenced(&from);
    }

    /// Tells every node holding a reference to the terminated local actor, and closes
    /// the actor's endpoints.
    fn on_actor_terminated(&self, address: &ActorAddress, reason: &ExitReason) {
        for node in self.nodes.take_exporters(address.id()) {
            if let Some(connection) = self.nodes.primary(&node) {
                debug!("Killing proxies of {} on {}.", address, node);
                connection.send(Frame::KillProxy {
                    actor: address.clone(),
                    reason: reason.clone(),
                });
            }
        }
        self.unpublish(&Unpublish::Actor(address.clone()));
    }

    /// Keeps an eye on a connection until it closes, then tears it down. Best-effort
    /// connections also send heartbeats and expire when idle.
    fn supervise(&self, connection: Arc<Connection>) {
        let this = self.this.clone();
        let local = self.nodes.local().clone();
        let heartbeat = self.config.heartbeat_interval();
        let idle = self.config.connection_idle_timeout();
        self.tracker.spawn(
            async move {
                if connection.kind().is_reliable() {
                    connection.closed().await;
                } else {
                    let mut ticker = tokio::time::interval(heartbeat);
                    ticker.tick().await;
                    loop {
                        tokio::select! {
                            _ = connection.closed() => break,
                            _ = ticker.tick() => {
                                if connection.idle_for() > idle {
                                    warn!(
                                        "Connection {} to {} idle for {:?}.",
                                        connection.id(),
                                        connection.peer(),
                                        idle
                                    );
                                    break;
                                }
                                if connection.node().is_some() {
                                    connection.send(Frame::Heartbeat { from: local.clone() });
                                }
                            }
                        }
                    }
                }
                connection.close();
                if let Some(inner) = this.upgrade() {
                    inner.teardown(&connection);
                }
            }
            .instrument(Span::current()),
        );
    }

    fn teardown(&self, connection: &Arc<Connection>) {
        let failed = self.handshakes.fail_connection(
            connection.id(),
            Error::NodeUnreachable(format!("connection to {} closed", connection.peer())),
        );
        let promoted = self.nodes.remove(connection);
        let exited = self.proxies.exit_node(connection.id());
        debug!(
            "Connection {} to {} torn down: {} proxies exited, {} handshakes failed.",
            connection.id(),
            connection.peer(),
            exited,
            failed
        );
        if let (Some(node), Some(promoted)) = (connection.node(), promoted) {
            debug!(
                "Connection {} is now the primary connection to {}.",
                promoted.id(),
                node
            );
        }
    }
}

impl Dispatcher for MiddlemanInner {
    fn on_connection(&self, connection: &Arc<Connection>) {
        self.supervise(connection.clone());
    }

    fn on_frame(&self, connection: &Arc<Connection>, frame: Frame) {
        connection.touch();
        match frame {
            Frame::Connect { token, from } => self.accept_handshake(connection, token, from),
            Frame::ConnectAck {
                token,
                from,
                actor,
                signature,
            } => {
                self.handshakes.complete(
                    token,
                    connection.id(),
                    Ok(HandshakeReply {
                        from,
                        actor,
                        signature,
                    }),
                );
            }
            Frame::ConnectNack { token, reason } => {
                self.handshakes.complete(
                    token,
                    connection.id(),
                    Err(Error::HandshakeRejected(reason)),
                );
            }
            frame if connection.node().is_none() => {
                debug!(
                    "Dropping {:?} received before the handshake on {}.",
                    frame,
                    connection.peer()
                );
            }
            Frame::Message { from, to, payload } => {
                self.deliver_message(connection, from, to, payload)
            }
            Frame::Exit {
                from,
                to,
                reason,
                via_link,
            } => self.deliver_exit(from, to, reason, via_link),
            Frame::Down { from, to, reason } => self.deliver_down(from, to, reason),
            Frame::Link { from, to } => self.accept_link(connection, from, to),
            Frame::Unlink { from, to } => self.accept_unlink(from, to),
            Frame::Monitor { from, to } => self.accept_monitor(connection, from, to),
            Frame::Demonitor { from, to } => self.accept_demonitor(from, to),
            Frame::KillProxy { actor, reason } => {
                self.proxies.kill(&actor, reason);
            }
            Frame::Heartbeat { .. } => {}
        }
    }
}

impl RemoteResolver for MiddlemanInner {
    fn resolve_remote(&self, address: &ActorAddress) -> Result<ActorHandle, actor::Error> {
        self.proxies
            .get_or_create(address)
            .map(|proxy| proxy.handle())
            .map_err(|_| actor::Error::NotFound(address.clone()))
    }
}

impl Drop for MiddlemanInner {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

/// Reacts to local actor terminations.
struct TerminationWatcher {
    inner: Weak<MiddlemanInner>,
}

#[async_trait]
impl Subscriber<SystemEvent> for TerminationWatcher {
    async fn notify(&self, event: SystemEvent) {
        let Some(inner) = self.inner.upgrade() else {
            return;
        };
        match event {
            SystemEvent::ActorTerminated { address, reason } => {
                inner.on_actor_terminated(&address, &reason)
            }
            SystemEvent::StopSystem => debug!("Actor system stopping."),
        }
    }
}

/// Resolves `host:port`, preferring IPv4.
async fn resolve_peer(host: &str, port: u16) -> Result<SocketAddr, Error> {
    let addresses: Vec<SocketAddr> = lookup_host((host, port))
        .await
        .map_err(|e| Error::NodeUnreachable(format!("cannot resolve {}: {}", host, e)))?
        .collect();
    addresses
        .iter()
        .find(|address| address.is_ipv4())
        .or_else(|| addresses.first())
        .copied()
        .ok_or_else(|| Error::NodeUnreachable(format!("{} has no address", host)))
}
