// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! Rush remote actor runtime.
//! Re-exports the local actor runtime and the middleman that connects actor systems
//! over TCP and UDP.

pub use actor::{
    AbstractActor, Actor, ActorAddress, ActorCell, ActorContext, ActorHandle,
    ActorId, ActorLifecycle, ActorSystem, ActorSystemConfig, Envelope,
    Error as ActorError, Event, ExitAction, ExitReason, Handler, MailboxQueue,
    NodeId, RemoteResolver, Sink, Subscriber, SystemEvent, SystemRef,
    SystemRunner, TypeSignature, TypeTag, Value,
};

pub use middleman::{
    ConnectOptions, EndpointInfo, Error as MiddlemanError, Middleman,
    MiddlemanConfig, TransportKind, Unpublish,
};
