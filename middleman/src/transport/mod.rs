// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Transport endpoints
//!
//! Published actors are reachable through endpoints: a TCP listener or a UDP socket
//! bound to a port and bound to one actor. Both transports share the same plumbing:
//!
//! - inbound bytes are decoded into [`Frame`]s and handed to a [`Dispatcher`];
//! - outbound frames are queued on the connection's [`MailboxQueue`] and drained by a
//!   dedicated blocking writer through a [`FrameWriter`].
//!
//! [`MailboxQueue`]: actor::MailboxQueue
//!

pub mod tcp;
pub mod udp;

use crate::{
    Error,
    config::MiddlemanConfig,
    frame::Frame,
    node::{Connection, TransportKind},
};

use actor::{ActorAddress, ActorHandle, TypeSignature};

use async_trait::async_trait;
use tokio::runtime::Handle;
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing::{Span, debug, warn};

use std::{
    net::SocketAddr,
    sync::{Arc, Weak},
    time::Duration,
};

/// Period the writer waits for frames before checking its connection again.
const WRITER_POLL: Duration = Duration::from_millis(500);

/// Receiver of everything the transports read.
pub trait Dispatcher: Send + Sync + 'static {
    /// A new connection is ready.
    fn on_connection(&self, connection: &Arc<Connection>);

    /// A frame arrived on `connection`.
    fn on_frame(&self, connection: &Arc<Connection>, frame: Frame);
}

/// Sink for encoded frames, one per connection.
#[async_trait]
pub trait FrameWriter: Send {
    /// Writes one frame.
    ///
    /// # Error
    ///
    /// `Codec` errors only concern the frame itself, which is dropped. Any other error
    /// closes the connection.
    ///
    async fn write_frame(&mut self, frame: &Frame) -> Result<(), Error>;

    async fn shutdown(&mut self) {}
}

/// Everything transport tasks need from their middleman.
#[derive(Clone)]
pub struct TransportContext {
    pub config: Arc<MiddlemanConfig>,
    pub token: CancellationToken,
    pub tracker: TaskTracker,
    pub runtime: Handle,
    pub dispatcher: Weak<dyn Dispatcher>,
}

impl TransportContext {
    /// Hands `frame` to the dispatcher. Returns `false` once the middleman is gone.
    pub(crate) fn dispatch(&self, connection: &Arc<Connection>, frame: Frame) -> bool {
        match self.dispatcher.upgrade() {
            Some(dispatcher) => {
                dispatcher.on_frame(connection, frame);
                true
            }
            None => false,
        }
    }

    pub(crate) fn announce(&self, connection: &Arc<Connection>) {
        if let Some(dispatcher) = self.dispatcher.upgrade() {
            dispatcher.on_connection(connection);
        }
    }

    /// Starts the blocking writer draining the outbound queue of `connection`.
    pub(crate) fn spawn_writer<W>(&self, connection: Arc<Connection>, mut writer: W)
    where
        W: FrameWriter + 'static,
    {
        let runtime = self.runtime.clone();
        let span = Span::current();
        self.tracker.spawn_blocking(move || {
            let _span = span.enter();
            loop {
                let Some(frame) = connection.outbound().try_take_head_for(WRITER_POLL)
                else {
                    if connection.outbound().is_closed() {
                        break;
                    }
                    continue;
                };
                match runtime.block_on(writer.write_frame(&frame)) {
                    Ok(()) => {}
                    Err(Error::Codec(e)) => {
                        warn!("Dropping frame for {}: {}", connection.peer(), e);
                    }
                    Err(e) => {
                        debug!("Writer for {} stopped: {}", connection.peer(), e);
                        connection.close();
                        break;
                    }
                }
            }
            runtime.block_on(writer.shutdown());
            debug!("Writer for connection {} finished.", connection.id());
        });
    }
}

/// A bound, published endpoint.
#[derive(Debug)]
pub struct Endpoint {
    pub kind: TransportKind,
    pub port: u16,
    pub local_addr: SocketAddr,
    pub actor: ActorHandle,
    pub signature: TypeSignature,
    pub cancel: CancellationToken,
}

impl Endpoint {
    pub fn info(&self) -> EndpointInfo {
        EndpointInfo {
            port: self.port,
            local_addr: self.local_addr,
            transport: self.kind,
            actor: self.actor.address().clone(),
        }
    }

    /// Stops accepting. Best-effort connections riding on the endpoint socket go too.
    pub fn close(&self) {
        debug!("Closing {} endpoint on port {}.", self.kind, self.port);
        self.cancel.cancel();
    }
}

/// What `publish` reports back.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EndpointInfo {
    pub port: u16,
    pub local_addr: SocketAddr,
    pub transport: TransportKind,
    pub actor: ActorAddress,
}
