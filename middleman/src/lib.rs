// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Rush Remote Middleman
//!
//! Network layer of the rush remote actor runtime. A [`Middleman`] attached to an
//! actor system publishes local actors on TCP or UDP endpoints and connects to actors
//! published by other nodes. Remote actors are represented locally by proxies, which
//! implement the same [`actor::AbstractActor`] seam as local actors: sending, linking
//! and monitoring work unchanged across the network boundary.
//!
//! ## Getting Started
//!
//! ```ignore
//! use actor::{ActorSystem, ActorSystemConfig, Value};
//! use middleman::{Middleman, MiddlemanConfig};
//! use tokio_util::sync::CancellationToken;
//!
//! let (system, _runner) =
//!     ActorSystem::create(ActorSystemConfig::default(), CancellationToken::new());
//! let middleman = Middleman::start(&system, MiddlemanConfig::default())?;
//!
//! let echo = system.spawn(Echo).await?;
//! let endpoint = middleman.publish(&echo, 0, Some("127.0.0.1"), true).await?;
//!
//! // On another node:
//! let remote = middleman.connect("127.0.0.1", endpoint.port).await?;
//! middleman.send(&remote, Value::Int(1));
//! ```
//!

mod config;
mod error;
mod frame;
mod handshake;
mod middleman;
mod node;
mod proxy;
mod registry;
mod retry;
mod transport;

pub use config::{HandshakeBackoff, MAX_DATAGRAM_SIZE, MiddlemanConfig};
pub use error::Error;
pub use frame::Frame;
pub use handshake::{HandshakeReply, HandshakeTable};
pub use middleman::{ConnectOptions, Middleman, Unpublish};
pub use node::{Connection, NodeRegistry, TransportKind};
pub use proxy::Proxy;
pub use registry::ProxyRegistry;
pub use retry::{ExponentialBackoffStrategy, FixedIntervalStrategy, RetryStrategy};
pub use transport::EndpointInfo;
