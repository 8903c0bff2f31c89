// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Wire frames
//!
//! Everything two nodes exchange is a [`Frame`], encoded with `bincode`. Stream
//! transports prefix each frame with its length as a 4-byte big-endian integer;
//! datagram transports carry exactly one frame per datagram.
//!

use crate::Error;

use actor::{ActorAddress, ActorId, ExitReason, NodeId, TypeSignature, Value};

use serde::{Deserialize, Serialize};

/// Unit of the wire protocol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Frame {
    /// Handshake request.
    Connect { token: u64, from: NodeId },
    /// Handshake answer naming the actor bound to the endpoint.
    ConnectAck {
        token: u64,
        from: NodeId,
        actor: ActorId,
        signature: TypeSignature,
    },
    /// Handshake refusal.
    ConnectNack { token: u64, reason: String },
    /// Application message.
    Message {
        from: Option<ActorAddress>,
        to: ActorAddress,
        payload: Value,
    },
    /// Exit signal. `via_link` marks signals caused by a linked actor terminating.
    Exit {
        from: ActorAddress,
        to: ActorAddress,
        reason: ExitReason,
        via_link: bool,
    },
    /// Termination of a monitored actor.
    Down {
        from: ActorAddress,
        to: ActorAddress,
        reason: ExitReason,
    },
    /// `from` linked itself to `to`.
    Link { from: ActorAddress, to: ActorAddress },
    Unlink { from: ActorAddress, to: ActorAddress },
    /// `from` started monitoring `to`.
    Monitor { from: ActorAddress, to: ActorAddress },
    Demonitor { from: ActorAddress, to: ActorAddress },
    /// The actor is gone; its proxies must exit with `reason`.
    KillProxy { actor: ActorAddress, reason: ExitReason },
    /// Keeps best-effort connections alive.
    Heartbeat { from: NodeId },
}

impl Frame {
    /// Control frames overtake regular traffic in the outbound queue.
    pub fn is_control(&self) -> bool {
        match self {
            Frame::Exit { .. } | Frame::Down { .. } | Frame::KillProxy { .. } => true,
            Frame::Connect { .. }
            | Frame::ConnectAck { .. }
            | Frame::ConnectNack { .. }
            | Frame::Message { .. }
            | Frame::Link { .. }
            | Frame::Unlink { .. }
            | Frame::Monitor { .. }
            | Frame::Demonitor { .. }
            | Frame::Heartbeat { .. } => false,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, Error> {
        bincode::serialize(self).map_err(|e| Error::Codec(e.to_string()))
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, Error> {
        bincode::deserialize(bytes).map_err(|e| Error::Codec(e.to_string()))
    }
}
