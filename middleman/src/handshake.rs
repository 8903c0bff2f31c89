// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Pending handshakes
//!
//! Every in-flight connect request is recorded in the [`HandshakeTable`] under a random
//! correlation token. The first answer carrying the token completes the request;
//! duplicates, which best-effort transports produce when a retried CONNECT is answered
//! twice, find no entry and are dropped.
//!

use crate::Error;

use actor::{ActorId, NodeId, TypeSignature};

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::debug;

use std::{collections::HashMap, time::Instant};

/// Successful handshake answer.
#[derive(Debug, Clone, PartialEq)]
pub struct HandshakeReply {
    pub from: NodeId,
    pub actor: ActorId,
    pub signature: TypeSignature,
}

struct PendingHandshake {
    connection: u64,
    started: Instant,
    reply: oneshot::Sender<Result<HandshakeReply, Error>>,
}

#[derive(Default)]
pub struct HandshakeTable {
    pending: Mutex<HashMap<u64, PendingHandshake>>,
}

impl HandshakeTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a handshake running over `connection` and returns its token.
    pub fn register(
        &self,
        connection: u64,
    ) -> (u64, oneshot::Receiver<Result<HandshakeReply, Error>>) {
        let (sender, receiver) = oneshot::channel();
        let mut pending = self.pending.lock();
        let mut token = rand::random::<u64>();
        while pending.contains_key(&token) {
            token = rand::random::<u64>();
        }
        pending.insert(
            token,
            PendingHandshake {
                connection,
                started: Instant::now(),
                reply: sender,
            },
        );
        (token, receiver)
    }

    /// Completes the handshake `token` if it is still pending on `connection`.
    ///
    /// Returns `false` for duplicates and for answers arriving on another connection.
    pub fn complete(
        &self,
        token: u64,
        connection: u64,
        result: Result<HandshakeReply, Error>,
    ) -> bool {
        let entry = {
            let mut pending = self.pending.lock();
            match pending.get(&token) {
                Some(entry) if entry.connection == connection => pending.remove(&token),
                _ => None,
            }
        };
        match entry {
            Some(entry) => {
                debug!(
                    "Handshake {:016x} answered after {:?}.",
                    token,
                    entry.started.elapsed()
                );
                let _ = entry.reply.send(result);
                true
            }
            None => {
                debug!("Ignoring handshake answer for unknown token {:016x}.", token);
                false
            }
        }
    }

    /// Forgets a handshake, e.g. after its caller timed out.
    pub fn cancel(&self, token: u64) -> bool {
        self.pending.lock().remove(&token).is_some()
    }

    /// Fails every handshake running over `connection`.
    pub fn fail_connection(&self, connection: u64, error: Error) -> usize {
        let failed: Vec<PendingHandshake> = {
            let mut pending = self.pending.lock();
            let tokens: Vec<u64> = pending
                .iter()
                .filter(|(_, entry)| entry.connection == connection)
                .map(|(token, _)| *token)
                .collect();
            tokens
                .into_iter()
                .filter_map(|token| pending.remove(&token))
                .collect()
        };
        let count = failed.len();
        for entry in failed {
            let _ = entry.reply.send(Err(error.clone()));
        }
        count
    }

    pub fn len(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.lock().is_empty()
    }

    pub fn clear(&self) {
        self.pending.lock().clear();
    }
}

#[cfg(test)]
mod tests {

    use super::*;

    fn reply() -> HandshakeReply {
        HandshakeReply {
            from: NodeId::new("remote"),
            actor: ActorId(1),
            signature: TypeSignature::all(),
        }
    }

    #[tokio::test]
    async fn test_first_answer_wins() {
        let table = HandshakeTable::new();
        let (token, receiver) = table.register(7);
        assert_eq!(table.len(), 1);
        assert!(table.complete(token, 7, Ok(reply())));
        assert!(!table.complete(token, 7, Err(Error::HandshakeRejected("late".into()))));
        assert_eq!(receiver.await.unwrap(), Ok(reply()));
        assert!(table.is_empty());
    }

    #[tokio::test]
    async fn test_answer_on_other_connection_is_ignored() {
        let table = HandshakeTable::new();
        let (token, _receiver) = table.register(1);
        assert!(!table.complete(token, 2, Ok(reply())));
        assert_eq!(table.len(), 1);
        assert!(table.cancel(token));
        assert!(!table.cancel(token));
    }

    #[tokio::test]
    async fn test_connection_failure() {
        let table = HandshakeTable::new();
        let (_, first) = table.register(1);
        let (_, second) = table.register(2);
        let error = Error::NodeUnreachable("gone".into());
        assert_eq!(table.fail_connection(1, error.clone()), 1);
        assert_eq!(first.await.unwrap(), Err(error));
        assert_eq!(table.len(), 1);
        drop(second);
    }
}
