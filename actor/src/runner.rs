// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Actor worker
//!
//! Every local actor is driven by one [`ActorRunner`] on a dedicated blocking thread
//! taken from the runtime's blocking pool. The runner owns the actor state and walks it
//! through its [`ActorLifecycle`]:
//!
//! - **Created**: runs `pre_start` and reports the outcome to the spawner.
//! - **Started**: drains the mailbox until a handler error, an exit signal, or
//!   [`ActorContext::quit`] ends the actor.
//! - **Stopped**: closes the mailbox, runs `post_stop`, and notifies links and monitors.
//! - **Terminated**: the actor is removed from the system and its exit reason published.
//!
//! The mailbox is polled with a timed wait so that an idle worker parks on the queue's
//! condition variable instead of spinning. An idle worker whose actor system halted, for
//! instance because its runtime is shutting down, terminates with [`ExitReason::Kill`]. Asynchronous hooks are driven with the
//! runtime handle, which is why the runner lives on a blocking thread.
//!

use crate::{
    Error,
    actor::{Actor, ActorCell, ActorContext, ActorLifecycle, ExitAction, Handler},
    handle::ActorHandle,
    id::ActorAddress,
    link::propagate_exit,
    message::{Envelope, ExitReason},
    system::{SystemEvent, SystemRef},
};

use tokio::{runtime::Handle, sync::oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use std::{sync::Arc, time::Duration};

pub(crate) struct ActorRunner<A: Actor> {
    cell: Arc<ActorCell>,
    handle: ActorHandle,
    actor: A,
    lifecycle: ActorLifecycle,
    idle_timeout: Duration,
    halt: CancellationToken,
}

impl<A> ActorRunner<A>
where
    A: Actor + Handler,
{
    /// Creates the runner and the handle of a new actor.
    pub(crate) fn create(
        address: ActorAddress,
        actor: A,
        idle_timeout: Duration,
        halt: CancellationToken,
    ) -> (Self, ActorHandle) {
        debug!("Creating new actor runner for {}.", address);
        let cell = Arc::new(ActorCell::new(address, actor.type_signature()));
        let handle = ActorHandle::new(cell.clone());
        let runner = ActorRunner {
            cell,
            handle: handle.clone(),
            actor,
            lifecycle: ActorLifecycle::Created,
            idle_timeout,
            halt,
        };
        (runner, handle)
    }

    /// Runs the actor to completion. Must be called from a blocking thread.
    pub(crate) fn init(
        mut self,
        system: SystemRef,
        runtime: Handle,
        mut sender: Option<oneshot::Sender<Result<(), Error>>>,
    ) {
        let address = self.cell_address();
        debug!("Initializing actor {} runner.", address);
        let mut ctx = ActorContext::new(self.handle.clone(), system.clone());
        let mut reason = ExitReason::Normal;

        loop {
            match self.lifecycle {
                ActorLifecycle::Created => {
                    debug!("Actor {} is created.", address);
                    match runtime.block_on(self.actor.pre_start(&mut ctx)) {
                        Ok(()) => {
                            debug!("Actor {} has started successfully.", address);
                            if let Some(sender) = sender.take() {
                                if sender.send(Ok(())).is_err() {
                                    error!("Failed to send start signal for {}.", address);
                                }
                            }
                            self.lifecycle = ActorLifecycle::Started;
                        }
                        Err(err) => {
                            error!("Actor {} failed to start: {:?}", address, err);
                            reason = ExitReason::UnhandledError(err.to_string());
                            if let Some(sender) = sender.take() {
                                let _ = sender.send(Err(err));
                            }
                            self.lifecycle = ActorLifecycle::Failed;
                        }
                    }
                }
                ActorLifecycle::Started => {
                    debug!("Running actor {}.", address);
                    reason = self.run(&runtime, &mut ctx);
                    self.lifecycle = ActorLifecycle::Stopped;
                }
                ActorLifecycle::Failed => {
                    debug!("Actor {} is faulty.", address);
                    self.stop(&runtime, &mut ctx, &reason, false);
                    self.lifecycle = ActorLifecycle::Terminated;
                }
                ActorLifecycle::Stopped => {
                    debug!("Actor {} is stopped: {}.", address, reason);
                    self.stop(&runtime, &mut ctx, &reason, true);
                    self.lifecycle = ActorLifecycle::Terminated;
                }
                ActorLifecycle::Terminated => {
                    system.remove_actor(address.id());
                    system.publish(SystemEvent::ActorTerminated {
                        address: address.clone(),
                        reason: reason.clone(),
                    });
                    debug!("Actor {} is terminated.", address);
                    self.cell.notify_exit(reason.clone());
                    break;
                }
            }
        }
    }

    /// Processes the mailbox until the actor has to terminate.
    fn run(&mut self, runtime: &Handle, ctx: &mut ActorContext) -> ExitReason {
        loop {
            let Some(envelope) = self.cell.mailbox().try_take_head_for(self.idle_timeout)
            else {
                if self.cell.mailbox().is_closed() {
                    return ExitReason::UserShutdown;
                }
                if self.halt.is_cancelled() {
                    debug!("Actor {} halted by its actor system.", ctx.address());
                    return ExitReason::Kill;
                }
                continue;
            };

            match envelope {
                Envelope::Message { sender, payload } => {
                    if !self.cell.signature().accepts(&payload) {
                        warn!(
                            "Actor {} dropped a {} message outside of its signature.",
                            ctx.address(),
                            payload.tag()
                        );
                        continue;
                    }
                    let result = runtime.block_on(self.actor.handle_message(
                        sender.clone(),
                        payload,
                        ctx,
                    ));
                    match result {
                        Ok(Some(reply)) => match sender {
                            Some(sender) => sender.tell_from(ctx.handle(), reply),
                            None => debug!(
                                "Actor {} produced a reply without a sender.",
                                ctx.address()
                            ),
                        },
                        Ok(None) => {}
                        Err(err) => {
                            error!("Actor {} failed: {:?}", ctx.address(), err);
                            return ExitReason::UnhandledError(err.to_string());
                        }
                    }
                }
                Envelope::Exit { source, reason, .. } => {
                    if reason == ExitReason::Kill {
                        debug!("Actor {} killed by {}.", ctx.address(), source);
                        return ExitReason::Kill;
                    }
                    match runtime.block_on(self.actor.on_exit(source, reason, ctx)) {
                        ExitAction::Terminate(reason) => return reason,
                        ExitAction::Ignore => {}
                    }
                }
                Envelope::Down { source, reason } => {
                    runtime.block_on(self.actor.on_down(source, reason, ctx));
                }
            }

            if let Some(reason) = ctx.take_quit() {
                return reason;
            }
        }
    }

    /// Moves the actor to its terminal state and notifies everyone depending on it.
    fn stop(
        &mut self,
        runtime: &Handle,
        ctx: &mut ActorContext,
        reason: &ExitReason,
        started: bool,
    ) {
        let Some((links, monitors)) = self.cell.begin_exit(reason) else {
            return;
        };
        self.cell.mailbox().close();
        let dropped = self.cell.mailbox().drain();
        if !dropped.is_empty() {
            debug!(
                "Actor {} dropped {} pending envelopes.",
                ctx.address(),
                dropped.len()
            );
        }
        if started && !self.halt.is_cancelled() {
            if let Err(err) = runtime.block_on(self.actor.post_stop(ctx)) {
                error!("Actor {} failed to stop: {:?}", ctx.address(), err);
            }
        }
        propagate_exit(&self.handle, reason, links, monitors);
    }

    fn cell_address(&self) -> ActorAddress {
        self.handle.address().clone()
    }
}
