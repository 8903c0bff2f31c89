// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Actor handles
//!
//! [`AbstractActor`] is the seam between the local runtime and the network layer: local
//! actor cells implement it, and so do the proxies standing in for remote actors. Code
//! holding an [`ActorHandle`] sends messages, links, and monitors without knowing which
//! side of a network boundary the actor lives on.
//!

use crate::{
    id::ActorAddress,
    message::{ExitReason, Value},
};

use tokio::sync::watch;

use std::any::Any;
use std::fmt::{Debug, Formatter};
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// Operations shared by local actors and remote proxies.
pub trait AbstractActor: Send + Sync + 'static {
    /// Address of the actor.
    fn address(&self) -> &ActorAddress;

    /// Whether the actor lives on another node.
    fn is_remote(&self) -> bool;

    /// Enqueues a regular message. Messages to exited actors are dropped.
    fn enqueue(&self, sender: Option<ActorHandle>, payload: Value);

    /// Enqueues an exit signal with control priority.
    fn enqueue_exit(&self, source: ActorAddress, reason: ExitReason, via_link: bool);

    /// Enqueues a termination notification for a monitored actor with control priority.
    fn enqueue_down(&self, source: ActorAddress, reason: ExitReason);

    /// Records a link to `peer`.
    ///
    /// Returns `Ok(true)` for a new link, `Ok(false)` if the link already existed, and
    /// `Err(reason)` if this actor has already exited.
    fn add_link(&self, peer: &ActorHandle) -> Result<bool, ExitReason>;

    /// Drops the link bookkeeping for `peer`. Returns whether a link existed.
    fn remove_link(&self, peer: &ActorAddress) -> bool;

    /// Removes a link on explicit request. Proxies also tell the remote node.
    fn unlink(&self, peer: &ActorAddress) -> bool {
        self.remove_link(peer)
    }

    /// Registers `observer` to be notified when this actor terminates.
    ///
    /// Same return convention as [`AbstractActor::add_link`].
    fn add_monitor(&self, observer: &ActorHandle) -> Result<bool, ExitReason>;

    /// Drops the monitor bookkeeping for `observer`. Returns whether it was registered.
    fn remove_monitor(&self, observer: &ActorAddress) -> bool;

    /// Removes a monitor on explicit request. Proxies also tell the remote node.
    fn demonitor(&self, observer: &ActorAddress) -> bool {
        self.remove_monitor(observer)
    }

    /// Exit reason, once the actor has terminated.
    fn exit_reason(&self) -> Option<ExitReason>;

    /// Watch channel resolving to the exit reason.
    fn subscribe_exit(&self) -> watch::Receiver<Option<ExitReason>>;

    fn as_any(&self) -> &dyn Any;
}

/// Shared handle to a local actor or a remote proxy.
///
/// Handles compare equal when their addresses are equal. Use [`ActorHandle::ptr_eq`]
/// to check that two handles are the very same object.
#[derive(Clone)]
pub struct ActorHandle(Arc<dyn AbstractActor>);

impl ActorHandle {
    pub fn new(inner: Arc<dyn AbstractActor>) -> Self {
        Self(inner)
    }

    pub fn address(&self) -> &ActorAddress {
        self.0.address()
    }

    pub fn is_remote(&self) -> bool {
        self.0.is_remote()
    }

    /// Pointer identity of the underlying actor object.
    pub fn ptr_eq(&self, other: &ActorHandle) -> bool {
        std::ptr::addr_eq(Arc::as_ptr(&self.0), Arc::as_ptr(&other.0))
    }

    /// Sends `payload` without a sender.
    pub fn tell(&self, payload: Value) {
        self.0.enqueue(None, payload);
    }

    /// Sends `payload` on behalf of `sender`, which receives any reply.
    pub fn tell_from(&self, sender: &ActorHandle, payload: Value) {
        self.0.enqueue(Some(sender.clone()), payload);
    }

    pub fn is_alive(&self) -> bool {
        self.0.exit_reason().is_none()
    }

    pub fn exit_reason(&self) -> Option<ExitReason> {
        self.0.exit_reason()
    }

    /// Waits until the actor terminates and returns its exit reason.
    pub async fn wait_for_exit(&self) -> ExitReason {
        let mut receiver = self.0.subscribe_exit();
        let result = match receiver.wait_for(|reason| reason.is_some()).await {
            Ok(reason) => (*reason).clone(),
            Err(_) => self.0.exit_reason(),
        };
        result.unwrap_or(ExitReason::Unknown)
    }

    /// Downcasts the underlying actor object.
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.0.as_any().downcast_ref::<T>()
    }

    /// Underlying actor object.
    pub fn inner(&self) -> &Arc<dyn AbstractActor> {
        &self.0
    }
}

impl PartialEq for ActorHandle {
    fn eq(&self, other: &Self) -> bool {
        self.address() == other.address()
    }
}

impl Eq for ActorHandle {}

impl Hash for ActorHandle {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.address().hash(state);
    }
}

impl Debug for ActorHandle {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActorHandle")
            .field("address", self.address())
            .field("remote", &self.is_remote())
            .finish()
    }
}
