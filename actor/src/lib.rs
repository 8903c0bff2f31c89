// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Rush Remote Actor Runtime
//!
//! Local actor runtime of the rush remote transport. Every actor owns a [`MailboxQueue`]
//! of envelopes and is driven by a dedicated worker. Actors exchange dynamically typed
//! [`Value`] messages, declare the message types they accept through a
//! [`TypeSignature`], and tie their lifetimes together with links and monitors.
//!
//! ## Handles
//!
//! Code never talks to an actor directly. It holds an [`ActorHandle`], a shared reference
//! to something implementing [`AbstractActor`]. Local actors and the proxies the network
//! layer creates for remote actors both implement that trait, so sending, linking and
//! monitoring work the same on both sides of a network boundary.
//!
//! ## Exits
//!
//! When an actor terminates, every linked actor receives an exit signal carrying the same
//! [`ExitReason`], ahead of any regular message already queued, and every monitor receives a
//! down notification. By default an exit signal terminates its receiver with the same
//! reason; [`Handler::on_exit`] can decide otherwise, except for [`ExitReason::Kill`].
//!
//! ## Getting Started
//!
//! ```ignore
//! use actor::{Actor, ActorContext, ActorHandle, ActorSystem, ActorSystemConfig, Error, Handler, Value};
//! use async_trait::async_trait;
//! use tokio_util::sync::CancellationToken;
//!
//! struct Echo;
//!
//! #[async_trait]
//! impl Actor for Echo {}
//!
//! #[async_trait]
//! impl Handler for Echo {
//!     async fn handle_message(
//!         &mut self,
//!         _sender: Option<ActorHandle>,
//!         msg: Value,
//!         _ctx: &mut ActorContext,
//!     ) -> Result<Option<Value>, Error> {
//!         Ok(Some(msg))
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() {
//!     let (system, mut runner) =
//!         ActorSystem::create(ActorSystemConfig::default(), CancellationToken::new());
//!     let echo = system.spawn(Echo).await.unwrap();
//!     echo.tell(Value::Int(1));
//!     system.stop_system();
//!     runner.run().await;
//! }
//! ```
//!

mod actor;
mod error;
mod handle;
mod id;
mod link;
mod mailbox;
mod message;
mod runner;
mod sink;
mod system;

pub use actor::{
    Actor, ActorCell, ActorContext, ActorLifecycle, ExitAction, Handler,
};
pub use error::Error;
pub use handle::{AbstractActor, ActorHandle};
pub use id::{ActorAddress, ActorId, NodeId};
pub use link::{
    LinkState, LinkTable, MonitorTable, demonitor, link, monitor, propagate_exit,
    unlink,
};
pub use mailbox::MailboxQueue;
pub use message::{Envelope, ExitReason, TypeSignature, TypeTag, Value};
pub use sink::{Event, Sink, Subscriber};
pub use system::{
    ActorSystem, ActorSystemConfig, RemoteResolver, SystemEvent, SystemRef,
    SystemRunner,
};
