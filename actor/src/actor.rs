// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Actors
//!
//! This module defines what an actor is ([`Actor`] and [`Handler`]), the [`ActorContext`]
//! handed to it while it runs, and the [`ActorCell`] that represents a local actor to the
//! rest of the system.
//!

use crate::{
    Error,
    handle::{AbstractActor, ActorHandle},
    id::ActorAddress,
    link::{self, LinkTable, MonitorTable},
    mailbox::MailboxQueue,
    message::{Envelope, ExitReason, TypeSignature, Value},
    system::SystemRef,
};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::watch;

use tracing::debug;

use std::any::Any;

/// Execution context of a running actor.
///
/// The context is created by the worker that drives the actor and passed to every hook
/// and handler invocation. It gives the actor access to its own identity, to the actor
/// system, and to the messaging, linking and monitoring primitives.
///
/// # Examples
///
/// ```ignore
/// async fn handle_message(
///     &mut self,
///     sender: Option<ActorHandle>,
///     msg: Value,
///     ctx: &mut ActorContext,
/// ) -> Result<Option<Value>, Error> {
///     if let Value::Address(address) = msg {
///         let peer = ctx.resolve(&address)?;
///         ctx.link_to(&peer)?;
///         ctx.send(&peer, Value::Int(42));
///     }
///     Ok(None)
/// }
/// ```
pub struct ActorContext {
    handle: ActorHandle,
    system: SystemRef,
    quit: Option<ExitReason>,
}

impl ActorContext {
    pub(crate) fn new(handle: ActorHandle, system: SystemRef) -> Self {
        Self {
            handle,
            system,
            quit: None,
        }
    }

    /// Address of the running actor.
    pub fn address(&self) -> &ActorAddress {
        self.handle.address()
    }

    /// Handle of the running actor.
    pub fn handle(&self) -> &ActorHandle {
        &self.handle
    }

    /// The actor system the actor runs in.
    pub fn system(&self) -> &SystemRef {
        &self.system
    }

    /// Sends `payload` to `target`. Replies come back to this actor.
    pub fn send(&self, target: &ActorHandle, payload: Value) {
        target.tell_from(&self.handle, payload);
    }

    /// Sends an exit signal to `target`.
    pub fn send_exit(&self, target: &ActorHandle, reason: ExitReason) {
        debug!(
            "Actor {} sends exit to {}: {}.",
            self.address(),
            target.address(),
            reason
        );
        target
            .inner()
            .enqueue_exit(self.address().clone(), reason, false);
    }

    /// Links this actor to `other`.
    pub fn link_to(&self, other: &ActorHandle) -> Result<bool, Error> {
        link::link(&self.handle, other)
    }

    /// Removes the link to `other`.
    pub fn unlink_from(&self, other: &ActorHandle) -> bool {
        link::unlink(&self.handle, other)
    }

    /// Starts observing `other`.
    pub fn monitor(&self, other: &ActorHandle) -> Result<bool, Error> {
        link::monitor(other, &self.handle)
    }

    /// Stops observing `other`.
    pub fn demonitor(&self, other: &ActorHandle) -> bool {
        link::demonitor(other, &self.handle)
    }

    /// Resolves an address received in a message.
    pub fn resolve(&self, address: &ActorAddress) -> Result<ActorHandle, Error> {
        self.system.resolve(address)
    }

    /// Terminates the actor with `reason` once the current handler returns.
    pub fn quit(&mut self, reason: ExitReason) {
        self.quit = Some(reason);
    }

    pub(crate) fn take_quit(&mut self) -> Option<ExitReason> {
        self.quit.take()
    }
}

/// Decision taken by an actor receiving an exit signal.
#[derive(Debug, Clone, PartialEq)]
pub enum ExitAction {
    /// Terminate with the given reason.
    Terminate(ExitReason),
    /// Keep running.
    Ignore,
}

/// Lifecycle of an actor.
///
/// The worker driving an actor walks through `Created → Started → Stopped →
/// Terminated`, or `Created → Failed → Terminated` when `pre_start` fails.
#[derive(Debug, Clone, PartialEq)]
pub enum ActorLifecycle {
    /// The actor is created.
    Created,
    /// The actor is started and processing its mailbox.
    Started,
    /// The actor failed to start.
    Failed,
    /// The actor stopped processing messages.
    Stopped,
    /// The actor is terminated and its links were notified.
    Terminated,
}

/// Lifecycle hooks of an actor.
///
/// Implementors also implement [`Handler`], which carries the message processing
/// logic. The type signature returned by [`Actor::type_signature`] is advertised to
/// remote callers during the connect handshake; messages outside of it are dropped.
///
/// # Examples
///
/// ```ignore
/// struct Pong;
///
/// #[async_trait]
/// impl Actor for Pong {
///     fn type_signature(&self) -> TypeSignature {
///         TypeSignature::of([TypeTag::Int])
///     }
/// }
///
/// #[async_trait]
/// impl Handler for Pong {
///     async fn handle_message(
///         &mut self,
///         _sender: Option<ActorHandle>,
///         msg: Value,
///         _ctx: &mut ActorContext,
///     ) -> Result<Option<Value>, Error> {
///         match msg {
///             Value::Int(value) => Ok(Some(Value::Int(value + 1))),
///             _ => Ok(None),
///         }
///     }
/// }
/// ```
#[async_trait]
pub trait Actor: Send + Sync + Sized + 'static + Handler {
    /// Message types accepted by the actor.
    fn type_signature(&self) -> TypeSignature {
        TypeSignature::all()
    }

    /// Called before the first message is processed. An error aborts the spawn.
    async fn pre_start(&mut self, _ctx: &mut ActorContext) -> Result<(), Error> {
        Ok(())
    }

    /// Called after the actor stopped processing messages, before its links are
    /// notified.
    async fn post_stop(&mut self, _ctx: &mut ActorContext) -> Result<(), Error> {
        Ok(())
    }
}

/// Message processing of an actor.
#[async_trait]
pub trait Handler: Send + Sync {
    /// Handles a regular message.
    ///
    /// A returned `Some(value)` is sent back to `sender` as an ordinary message. An
    /// error terminates the actor with [`ExitReason::UnhandledError`].
    async fn handle_message(
        &mut self,
        sender: Option<ActorHandle>,
        msg: Value,
        ctx: &mut ActorContext,
    ) -> Result<Option<Value>, Error>;

    /// Handles an exit signal. By default the actor terminates with the same reason.
    ///
    /// Signals with [`ExitReason::Kill`] never reach this hook.
    async fn on_exit(
        &mut self,
        source: ActorAddress,
        reason: ExitReason,
        _ctx: &mut ActorContext,
    ) -> ExitAction {
        debug!("Exit signal from {}: {}.", source, reason);
        ExitAction::Terminate(reason)
    }

    /// Handles the termination of a monitored actor.
    async fn on_down(
        &mut self,
        source: ActorAddress,
        reason: ExitReason,
        _ctx: &mut ActorContext,
    ) {
        debug!("Monitored actor {} is down: {}.", source, reason);
    }
}

struct CellState {
    exit_reason: Option<ExitReason>,
    links: LinkTable,
    monitors: MonitorTable,
}

/// Local actor as seen by the rest of the system: its address, its mailbox, and its
/// link and monitor bookkeeping. The actor's own state lives in its worker.
pub struct ActorCell {
    address: ActorAddress,
    signature: TypeSignature,
    mailbox: MailboxQueue<Envelope>,
    state: Mutex<CellState>,
    exit: watch::Sender<Option<ExitReason>>,
}

impl ActorCell {
    pub(crate) fn new(address: ActorAddress, signature: TypeSignature) -> Self {
        let (exit, _) = watch::channel(None);
        Self {
            address,
            signature,
            mailbox: MailboxQueue::new(),
            state: Mutex::new(CellState {
                exit_reason: None,
                links: LinkTable::new(),
                monitors: MonitorTable::new(),
            }),
            exit,
        }
    }

    pub fn signature(&self) -> &TypeSignature {
        &self.signature
    }

    pub fn mailbox(&self) -> &MailboxQueue<Envelope> {
        &self.mailbox
    }

    pub fn link_count(&self) -> usize {
        self.state.lock().links.len()
    }

    pub fn monitor_count(&self) -> usize {
        self.state.lock().monitors.len()
    }

    /// Moves the cell to its terminal state and returns the peers to notify.
    ///
    /// Returns `None` if the cell had already exited.
    pub(crate) fn begin_exit(
        &self,
        reason: &ExitReason,
    ) -> Option<(Vec<ActorHandle>, Vec<ActorHandle>)> {
        let mut state = self.state.lock();
        if state.exit_reason.is_some() {
            return None;
        }
        state.exit_reason = Some(reason.clone());
        let links = state.links.begin_exit();
        let monitors = state.monitors.observers();
        Some((links, monitors))
    }

    /// Publishes the exit reason to everybody waiting for the actor.
    pub(crate) fn notify_exit(&self, reason: ExitReason) {
        self.exit.send_replace(Some(reason));
    }

    fn is_exited(&self) -> bool {
        self.state.lock().exit_reason.is_some()
    }
}

impl AbstractActor for ActorCell {
    fn address(&self) -> &ActorAddress {
        &self.address
    }

    fn is_remote(&self) -> bool {
        false
    }

    fn enqueue(&self, sender: Option<ActorHandle>, payload: Value) {
        if self.is_exited() {
            debug!("Dropping message to exited actor {}.", self.address);
            return;
        }
        self.mailbox.append(Envelope::Message { sender, payload });
    }

    fn enqueue_exit(&self, source: ActorAddress, reason: ExitReason, via_link: bool) {
        if self.is_exited() {
            debug!("Dropping exit signal to exited actor {}.", self.address);
            return;
        }
        self.mailbox.prepend(Envelope::Exit {
            source,
            reason,
            via_link,
        });
    }

    fn enqueue_down(&self, source: ActorAddress, reason: ExitReason) {
        if self.is_exited() {
            return;
        }
        self.mailbox.prepend(Envelope::Down { source, reason });
    }

    fn add_link(&self, peer: &ActorHandle) -> Result<bool, ExitReason> {
        let mut state = self.state.lock();
        if let Some(reason) = &state.exit_reason {
            return Err(reason.clone());
        }
        Ok(state.links.insert(peer))
    }

    fn remove_link(&self, peer: &ActorAddress) -> bool {
        self.state.lock().links.remove(peer)
    }

    fn add_monitor(&self, observer: &ActorHandle) -> Result<bool, ExitReason> {
        let mut state = self.state.lock();
        if let Some(reason) = &state.exit_reason {
            return Err(reason.clone());
        }
        Ok(state.monitors.insert(observer))
    }

    fn remove_monitor(&self, observer: &ActorAddress) -> bool {
        self.state.lock().monitors.remove(observer)
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
