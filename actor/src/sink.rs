// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! Event sink and subscriber.
//!
//! A [`Sink`] forwards the events of a broadcast channel to a [`Subscriber`] from its
//! own task. The network layer uses one to learn about local actor terminations.

use async_trait::async_trait;
use serde::{Serialize, de::DeserializeOwned};
use tokio::sync::broadcast::{Receiver as EventReceiver, error::RecvError};
use tokio_util::sync::CancellationToken;

use tracing::{debug, warn};

use std::fmt::Debug;

/// Events published on a broadcast channel.
pub trait Event:
    Serialize + DeserializeOwned + Debug + Clone + Send + Sync + 'static
{
}

/// Forwards events to a subscriber until the channel closes or the sink is cancelled.
pub struct Sink<E: Event> {
    subscriber: Box<dyn Subscriber<E>>,
    event_receiver: EventReceiver<E>,
    token: Option<CancellationToken>,
}

impl<E: Event> Sink<E> {
    /// Creates a new Sink with the given event receiver and subscriber.
    ///
    /// # Arguments
    ///
    /// * `event_receiver` - Broadcast receiver subscribed to an event channel.
    /// * `subscriber` - Implementation of the Subscriber trait that will process events.
    ///
    /// # Returns
    ///
    /// Returns a new Sink instance ready to be run.
    ///
    pub fn new(
        event_receiver: EventReceiver<E>,
        subscriber: impl Subscriber<E>,
    ) -> Self {
        Sink {
            subscriber: Box::new(subscriber),
            event_receiver,
            token: None,
        }
    }

    /// Stops the sink when `token` is cancelled.
    pub fn with_token(mut self, token: CancellationToken) -> Self {
        self.token = Some(token);
        self
    }

    /// Runs the sink's event processing loop. Should be spawned in a separate task.
    ///
    /// # Behavior
    ///
    /// - Notifies the subscriber of each received event.
    /// - Skips events missed because the subscriber lagged behind.
    ///
    /// # Returns
    ///
    /// Returns once the event channel is closed or the sink's token is cancelled.
    ///
    pub async fn run(&mut self) {
        let token = self.token.clone().unwrap_or_default();
        loop {
            let received = tokio::select! {
                _ = token.cancelled() => break,
                received = self.event_receiver.recv() => received,
            };
            match received {
                Ok(event) => {
                    debug!("Received event: {:?}. Notify to the subscriber.", event);
                    self.subscriber.notify(event).await;
                }
                Err(RecvError::Closed) => break,
                Err(RecvError::Lagged(skipped)) => {
                    warn!("Sink lagged behind, {} events skipped.", skipped);
                }
            }
        }
    }
}

/// Receives the events of a [`Sink`].
#[async_trait]
pub trait Subscriber<E: Event>: Send + Sync + 'static {
    async fn notify(&self, event: E);
}
