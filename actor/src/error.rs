// Copyright 2024 Antonio Estévez
// SPDX-License-Identifier: Apache-2.0

//! # Errors module
//!

use crate::ActorAddress;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error type for the actor system.
#[derive(Clone, Debug, Error, PartialEq, Serialize, Deserialize)]
pub enum Error {
    /// An error occurred while sending a message to an actor.
    #[error("An error occurred while sending a message to actor: {0}.")]
    Send(String),
    /// An error occurred while spawning an actor.
    #[error("An error occurred while spawning an actor: {0}.")]
    Spawn(String),
    /// An error occurred while starting an actor.
    #[error("Actor failed to start: {0}")]
    Start(String),
    /// The target actor has already terminated.
    #[error("Actor {0} has exited.")]
    ActorExited(ActorAddress),
    /// The address does not resolve to any known actor.
    #[error("Actor {0} not found.")]
    NotFound(ActorAddress),
    /// A link or monitor request that cannot be honored.
    #[error("Invalid link: {0}")]
    InvalidLink(String),
    /// Error that does not compromise the operation of the system.
    #[error("Error: {0}")]
    Functional(String),
}
