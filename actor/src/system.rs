// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Actor system
//!
//! The `system` module provides the `ActorSystem` type. The `ActorSystem` type is the responsible for
//! creating and managing the local actors of a node, and for resolving addresses of actors living
//! on other nodes through an installed [`RemoteResolver`].
//!

use crate::{
    Actor, Error, Handler,
    handle::ActorHandle,
    id::{ActorAddress, ActorId, ActorIdGenerator, NodeId},
    link,
    message::ExitReason,
    runner::ActorRunner,
    sink::{Event, Sink},
};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::{
    runtime::Handle,
    sync::{broadcast, mpsc, oneshot, watch},
};
use tokio_util::sync::CancellationToken;

use tracing::{Instrument, Span, debug, error};

use std::{
    collections::HashMap,
    sync::{Arc, Weak},
    time::Duration,
};

/// Resolves addresses of actors that live on other nodes.
///
/// The network layer installs itself into the actor system as its resolver.
pub trait RemoteResolver: Send + Sync {
    fn resolve_remote(&self, address: &ActorAddress) -> Result<ActorHandle, Error>;
}

/// Actor system configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct ActorSystemConfig {
    /// Host label of the node identifier. Defaults to the machine host name.
    pub host: Option<String>,
    /// How long an idle worker parks on its mailbox before checking it again.
    pub worker_idle_timeout_ms: u64,
}

impl Default for ActorSystemConfig {
    fn default() -> Self {
        Self {
            host: None,
            worker_idle_timeout_ms: 500,
        }
    }
}

impl ActorSystemConfig {
    pub fn worker_idle_timeout(&self) -> Duration {
        Duration::from_millis(self.worker_idle_timeout_ms.max(1))
    }
}

/// Actor system.
///
pub struct ActorSystem {}

/// Default implementation for `ActorSystem`.
impl ActorSystem {
    /// Create a new actor system. Must be called within a Tokio runtime.
    ///
    /// # Returns
    ///
    /// Returns a tuple with the system reference and the system runner.
    pub fn create(
        config: ActorSystemConfig,
        token: CancellationToken,
    ) -> (SystemRef, SystemRunner) {
        let (event_sender, event_receiver) = mpsc::channel(100);
        let system = SystemRef::new(config, event_sender, token);
        let runner = SystemRunner::new(event_receiver);
        (system, runner)
    }
}

/// System event.
///
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum SystemEvent {
    /// A local actor terminated.
    ActorTerminated {
        address: ActorAddress,
        reason: ExitReason,
    },
    /// Stop the actor system.
    StopSystem,
}

impl Event for SystemEvent {}

struct SystemInner {
    node: NodeId,
    config: ActorSystemConfig,
    ids: ActorIdGenerator,
    actors: RwLock<HashMap<ActorId, ActorHandle>>,
    count: watch::Sender<usize>,
    events: broadcast::Sender<SystemEvent>,
    resolver: RwLock<Option<Weak<dyn RemoteResolver>>>,
    runtime: Handle,
    token: CancellationToken,
    halt: CancellationToken,
}

/// System reference.
///
#[derive(Clone)]
pub struct SystemRef {
    inner: Arc<SystemInner>,
}

impl SystemRef {
    /// Create system reference.
    fn new(
        config: ActorSystemConfig,
        event_sender: mpsc::Sender<SystemEvent>,
        token: CancellationToken,
    ) -> Self {
        let node = match &config.host {
            Some(host) => NodeId::new(host),
            None => NodeId::local(),
        };
        let (events, _) = broadcast::channel(10000);
        let (count, _) = watch::channel(0);
        let halt = CancellationToken::new();
        let system = SystemRef {
            inner: Arc::new(SystemInner {
                node,
                config,
                ids: ActorIdGenerator::new(),
                actors: RwLock::new(HashMap::new()),
                count,
                events,
                resolver: RwLock::new(None),
                runtime: Handle::current(),
                token: token.clone(),
                halt: halt.clone(),
            }),
        };

        let weak = Arc::downgrade(&system.inner);
        // Halts idle workers once this task ends, also when a shutting down runtime drops it.
        let halt = halt.drop_guard();
        let stop = async move {
            let _halt = halt;
            token.cancelled().await;
            debug!("Stopping actor system...");
            if let Some(inner) = weak.upgrade() {
                let system = SystemRef { inner };
                system.kill_all();
                system.await_all_actors_done().await;
                system.publish(SystemEvent::StopSystem);
            }
            let _ = event_sender.send(SystemEvent::StopSystem).await;
        };
        tokio::spawn(stop.instrument(Span::current()));

        system
    }

    /// Identifier of the local node.
    pub fn node(&self) -> &NodeId {
        &self.inner.node
    }

    pub fn config(&self) -> &ActorSystemConfig {
        &self.inner.config
    }

    /// Pseudo address used as the source of signals sent by the system itself.
    pub fn address(&self) -> ActorAddress {
        ActorAddress::new(self.inner.node.clone(), ActorId(0))
    }

    /// Spawns a local actor and waits until it has started.
    ///
    /// # Arguments
    ///
    /// * `actor` - The type with `Actor` and `Handler` traits to run.
    ///
    /// # Returns
    ///
    /// Returns the handle of the started actor.
    ///
    /// # Error
    ///
    /// Returns an error if `pre_start` fails or the worker cannot be started.
    ///
    pub async fn spawn<A>(&self, actor: A) -> Result<ActorHandle, Error>
    where
        A: Actor + Handler,
    {
        let address = ActorAddress::new(self.inner.node.clone(), self.inner.ids.next());
        let (runner, handle) = ActorRunner::create(
            address.clone(),
            actor,
            self.inner.config.worker_idle_timeout(),
            self.inner.halt.clone(),
        );
        {
            let mut actors = self.inner.actors.write();
            actors.insert(address.id(), handle.clone());
            self.inner.count.send_replace(actors.len());
        }

        let (sender, receiver) = oneshot::channel();
        let system = self.clone();
        let runtime = self.inner.runtime.clone();
        let span = Span::current();
        self.inner.runtime.spawn_blocking(move || {
            let _span = span.enter();
            runner.init(system, runtime, Some(sender));
        });

        match receiver.await {
            Ok(Ok(())) => Ok(handle),
            Ok(Err(err)) => Err(err),
            Err(err) => {
                error!("Runner can not init {}: {}", address, err);
                Err(Error::Spawn(err.to_string()))
            }
        }
    }

    /// Retrieves a local actor. If the actor does not exist, a None is returned instead.
    pub fn get(&self, id: ActorId) -> Option<ActorHandle> {
        self.inner.actors.read().get(&id).cloned()
    }

    /// Resolves an address to a local actor or, through the installed resolver, to a
    /// proxy for a remote one.
    ///
    /// # Arguments
    ///
    /// * `address` - The address of the actor to resolve.
    ///
    /// # Returns
    ///
    /// Returns the handle of the local actor or of the remote actor's proxy.
    ///
    /// # Error
    ///
    /// Returns `Error::NotFound` if no local actor has the address, or if the address
    /// belongs to another node and no resolver can reach it.
    ///
    pub fn resolve(&self, address: &ActorAddress) -> Result<ActorHandle, Error> {
        if address.node() == &self.inner.node {
            return self
                .get(address.id())
                .ok_or_else(|| Error::NotFound(address.clone()));
        }
        let resolver = self.inner.resolver.read().as_ref().and_then(Weak::upgrade);
        match resolver {
            Some(resolver) => resolver.resolve_remote(address),
            None => Err(Error::NotFound(address.clone())),
        }
    }

    /// Installs the resolver for remote addresses. The system keeps a weak reference.
    pub fn set_remote_resolver(&self, resolver: Weak<dyn RemoteResolver>) {
        *self.inner.resolver.write() = Some(resolver);
    }

    pub fn clear_remote_resolver(&self) {
        *self.inner.resolver.write() = None;
    }

    /// Sends `payload` to `target` on behalf of `sender`.
    pub fn send(
        &self,
        sender: Option<&ActorHandle>,
        target: &ActorHandle,
        payload: crate::Value,
    ) {
        match sender {
            Some(sender) => target.tell_from(sender, payload),
            None => target.tell(payload),
        }
    }

    /// Sends an exit signal from the system to `target`.
    pub fn send_exit(&self, target: &ActorHandle, reason: ExitReason) {
        target.inner().enqueue_exit(self.address(), reason, false);
    }

    /// Links two actors. At least one of them must be local.
    pub fn link(&self, a: &ActorHandle, b: &ActorHandle) -> Result<bool, Error> {
        link::link(a, b)
    }

    pub fn unlink(&self, a: &ActorHandle, b: &ActorHandle) -> bool {
        link::unlink(a, b)
    }

    /// Makes `observer` receive a down notification when `observed` terminates.
    pub fn monitor(
        &self,
        observed: &ActorHandle,
        observer: &ActorHandle,
    ) -> Result<bool, Error> {
        link::monitor(observed, observer)
    }

    pub fn demonitor(&self, observed: &ActorHandle, observer: &ActorHandle) -> bool {
        link::demonitor(observed, observer)
    }

    /// Number of running local actors.
    pub fn actor_count(&self) -> usize {
        self.inner.actors.read().len()
    }

    /// Subscribes to system events.
    pub fn subscribe(&self) -> broadcast::Receiver<SystemEvent> {
        self.inner.events.subscribe()
    }

    pub(crate) fn publish(&self, event: SystemEvent) {
        if let Err(err) = self.inner.events.send(event) {
            debug!("No subscriber for system event: {:?}", err.0);
        }
    }

    /// Remove an actor from this actor system.
    /// If the actor does not exist, nothing happens.
    pub(crate) fn remove_actor(&self, id: ActorId) {
        let mut actors = self.inner.actors.write();
        actors.remove(&id);
        self.inner.count.send_replace(actors.len());
    }

    /// Waits until every local actor has terminated.
    pub async fn await_all_actors_done(&self) {
        let mut count = self.inner.count.subscribe();
        let _ = count.wait_for(|count| *count == 0).await;
    }

    pub fn stop_system(&self) {
        self.inner.token.cancel();
    }

    pub fn is_stopped(&self) -> bool {
        self.inner.token.is_cancelled()
    }

    /// Child token cancelled when the system stops.
    pub fn child_token(&self) -> CancellationToken {
        self.inner.token.child_token()
    }

    /// Runtime the system was created in.
    pub fn runtime(&self) -> &Handle {
        &self.inner.runtime
    }

    /// Run a sink. The sink will be run in a separate task.
    ///
    pub fn run_sink<E>(&self, mut sink: Sink<E>)
    where
        E: Event,
    {
        self.inner.runtime.spawn(
            async move {
                sink.run().await;
            }
            .in_current_span(),
        );
    }

    fn kill_all(&self) {
        let actors: Vec<ActorHandle> =
            self.inner.actors.read().values().cloned().collect();
        for actor in actors {
            self.send_exit(&actor, ExitReason::Kill);
        }
    }
}

/// System runner.
pub struct SystemRunner {
    /// The event receiver.
    event_receiver: mpsc::Receiver<SystemEvent>,
}

impl SystemRunner {
    /// Create a new system runner.
    pub(crate) fn new(event_receiver: mpsc::Receiver<SystemEvent>) -> Self {
        Self { event_receiver }
    }

    /// Run the actor system until it is stopped.
    pub async fn run(&mut self) {
        debug!("Running actor system...");
        while let Some(event) = self.event_receiver.recv().await {
            if let SystemEvent::StopSystem = event {
                debug!("Actor system stopped.");
                break;
            }
        }
    }
}
