// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Errors module
//!

use crate::node::TransportKind;

use actor::TypeSignature;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error type for the network layer.
#[derive(Clone, Debug, Error, PartialEq, Serialize, Deserialize)]
pub enum Error {
    /// The remote node cannot be reached, or no live connection to it exists.
    #[error("Node unreachable: {0}")]
    NodeUnreachable(String),
    /// The requested port is already bound.
    #[error("Port {0} is already in use.")]
    PortInUse(u16),
    /// The remote actor does not accept every message type the caller expects.
    #[error("Handshake type mismatch: expected {expected}, remote actor declares {declared}.")]
    HandshakeTypeMismatch {
        expected: TypeSignature,
        declared: TypeSignature,
    },
    /// The remote endpoint refused the handshake.
    #[error("Handshake rejected: {0}")]
    HandshakeRejected(String),
    /// No answer arrived within the allowed time.
    #[error("Timeout: {0}")]
    Timeout(String),
    /// I/O failure on an established connection.
    #[error("Network error: {0}")]
    NetworkError(String),
    /// Invalid middleman configuration.
    #[error("Configuration error: {0}")]
    Configuration(String),
    /// The requested transport is not enabled.
    #[error("Transport {0} is disabled.")]
    TransportDisabled(TransportKind),
    /// A frame could not be encoded or decoded.
    #[error("Codec error: {0}")]
    Codec(String),
    /// Nothing is published under the given target.
    #[error("Not published: {0}")]
    NotPublished(String),
    /// Error raised by the actor runtime.
    #[error(transparent)]
    Actor(#[from] actor::Error),
}

impl Error {
    /// Maps an I/O error raised while binding `port`.
    pub(crate) fn from_bind(port: u16, error: std::io::Error) -> Self {
        match error.kind() {
            std::io::ErrorKind::AddrInUse => Error::PortInUse(port),
            _ => Error::NetworkError(format!("cannot bind port {}: {}", port, error)),
        }
    }
}
