// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Message model
//!
//! Payloads exchanged between actors are values of the [`Value`] tagged union. Every
//! variant has a [`TypeTag`], and actors declare the set of tags they accept as their
//! [`TypeSignature`]. The signature is what a remote caller checks during the connect
//! handshake.
//!
//! Control traffic (exit signals and monitor notifications) travels in the same
//! mailbox as regular messages, wrapped in an [`Envelope`].
//!

use crate::{handle::ActorHandle, id::ActorAddress};

use serde::{Deserialize, Serialize};

use std::collections::BTreeSet;
use std::fmt::{Display, Formatter};

/// Payload of an application message.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Unit,
    Bool(bool),
    Int(i64),
    Text(String),
    IntList(Vec<i64>),
    Bytes(Vec<u8>),
    /// Reference to an actor, possibly living on another node.
    Address(ActorAddress),
}

impl Value {
    /// Type tag of the value.
    pub fn tag(&self) -> TypeTag {
        match self {
            Value::Unit => TypeTag::Unit,
            Value::Bool(_) => TypeTag::Bool,
            Value::Int(_) => TypeTag::Int,
            Value::Text(_) => TypeTag::Text,
            Value::IntList(_) => TypeTag::IntList,
            Value::Bytes(_) => TypeTag::Bytes,
            Value::Address(_) => TypeTag::Address,
        }
    }

    /// Actor address carried by the value, if any.
    pub fn address(&self) -> Option<&ActorAddress> {
        match self {
            Value::Address(address) => Some(address),
            Value::Unit
            | Value::Bool(_)
            | Value::Int(_)
            | Value::Text(_)
            | Value::IntList(_)
            | Value::Bytes(_) => None,
        }
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Text(value.to_owned())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Text(value)
    }
}

impl From<Vec<i64>> for Value {
    fn from(value: Vec<i64>) -> Self {
        Value::IntList(value)
    }
}

impl From<ActorAddress> for Value {
    fn from(value: ActorAddress) -> Self {
        Value::Address(value)
    }
}

/// Tag identifying the variant of a [`Value`].
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub enum TypeTag {
    Unit,
    Bool,
    Int,
    Text,
    IntList,
    Bytes,
    Address,
}

impl TypeTag {
    /// All tags, in declaration order.
    pub const ALL: [TypeTag; 7] = [
        TypeTag::Unit,
        TypeTag::Bool,
        TypeTag::Int,
        TypeTag::Text,
        TypeTag::IntList,
        TypeTag::Bytes,
        TypeTag::Address,
    ];
}

impl Display for TypeTag {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Set of message types an actor accepts.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeSignature(BTreeSet<TypeTag>);

impl TypeSignature {
    /// Signature accepting every tag.
    pub fn all() -> Self {
        Self(TypeTag::ALL.into_iter().collect())
    }

    /// Signature accepting exactly `tags`.
    pub fn of<I>(tags: I) -> Self
    where
        I: IntoIterator<Item = TypeTag>,
    {
        Self(tags.into_iter().collect())
    }

    /// Empty signature. As an expectation it is compatible with any actor.
    pub fn empty() -> Self {
        Self(BTreeSet::new())
    }

    pub fn contains(&self, tag: TypeTag) -> bool {
        self.0.contains(&tag)
    }

    /// Whether an actor with this signature accepts `value`.
    pub fn accepts(&self, value: &Value) -> bool {
        self.contains(value.tag())
    }

    /// Whether this declared signature satisfies the caller's `expected` one, i.e.
    /// every expected tag is declared.
    pub fn is_compatible_with(&self, expected: &TypeSignature) -> bool {
        expected.0.is_subset(&self.0)
    }

    pub fn tags(&self) -> impl Iterator<Item = &TypeTag> {
        self.0.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Display for TypeSignature {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let tags: Vec<String> =
            self.0.iter().map(TypeTag::to_string).collect();
        write!(f, "{{{}}}", tags.join(", "))
    }
}

/// Reason an actor terminated.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExitReason {
    /// Regular termination.
    Normal,
    /// Shutdown requested by the user.
    UserShutdown,
    /// Unconditional termination. Exit overrides cannot intercept it.
    Kill,
    /// The connection to the actor's node was lost.
    NetworkError,
    /// The actor is unknown to its node.
    Unknown,
    /// A message handler or lifecycle hook failed.
    UnhandledError(String),
    /// Application-defined reason.
    User(u32),
}

impl Display for ExitReason {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            ExitReason::Normal => write!(f, "normal"),
            ExitReason::UserShutdown => write!(f, "user_shutdown"),
            ExitReason::Kill => write!(f, "kill"),
            ExitReason::NetworkError => write!(f, "network_error"),
            ExitReason::Unknown => write!(f, "unknown"),
            ExitReason::UnhandledError(error) => {
                write!(f, "unhandled_error({})", error)
            }
            ExitReason::User(code) => write!(f, "user({})", code),
        }
    }
}

/// Item stored in an actor mailbox.
#[derive(Clone)]
pub enum Envelope {
    /// Application message. Replies go to `sender`, when present.
    Message {
        sender: Option<ActorHandle>,
        payload: Value,
    },
    /// Exit signal, either explicit or caused by a linked actor terminating.
    Exit {
        source: ActorAddress,
        reason: ExitReason,
        via_link: bool,
    },
    /// Termination notification for a monitored actor.
    Down {
        source: ActorAddress,
        reason: ExitReason,
    },
}

impl Envelope {
    /// Control envelopes are prepended to mailboxes.
    pub fn is_control(&self) -> bool {
        match self {
            Envelope::Message { .. } => false,
            Envelope::Exit { .. } | Envelope::Down { .. } => true,
        }
    }
}

impl std::fmt::Debug for Envelope {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Envelope::Message { sender, payload } => f
                .debug_struct("Message")
                .field("sender", &sender.as_ref().map(|s| s.address()))
                .field("payload", payload)
                .finish(),
            Envelope::Exit {
                source,
                reason,
                via_link,
            } => f
                .debug_struct("Exit")
                .field("source", source)
                .field("reason", reason)
                .field("via_link", via_link)
                .finish(),
            Envelope::Down { source, reason } => f
                .debug_struct("Down")
                .field("source", source)
                .field("reason", reason)
                .finish(),
        }
    }
}
