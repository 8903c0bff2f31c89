// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

// Integration tests for local actors, links, and monitors.

use actor::{
    Actor, ActorAddress, ActorContext, ActorHandle, ActorSystem, ActorSystemConfig,
    Error, ExitAction, ExitReason, Handler, TypeSignature, TypeTag, Value,
};
use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use tracing_test::traced_test;

use std::time::Duration;

// Replies to every integer with its successor until it receives 3.
struct Pong;

#[async_trait]
impl Actor for Pong {
    fn type_signature(&self) -> TypeSignature {
        TypeSignature::of([TypeTag::Int])
    }
}

#[async_trait]
impl Handler for Pong {
    async fn handle_message(
        &mut self,
        _sender: Option<ActorHandle>,
        msg: Value,
        _ctx: &mut ActorContext,
    ) -> Result<Option<Value>, Error> {
        match msg {
            Value::Int(value) => Ok(Some(Value::Int(value + 1))),
            _ => Ok(None),
        }
    }
}

// Starts the exchange with the pong actor and records every value it sees.
struct Ping {
    pong: ActorHandle,
    seen: mpsc::UnboundedSender<i64>,
}

#[async_trait]
impl Actor for Ping {
    async fn pre_start(&mut self, ctx: &mut ActorContext) -> Result<(), Error> {
        ctx.link_to(&self.pong)?;
        ctx.send(&self.pong, Value::Int(0));
        Ok(())
    }
}

#[async_trait]
impl Handler for Ping {
    async fn handle_message(
        &mut self,
        _sender: Option<ActorHandle>,
        msg: Value,
        ctx: &mut ActorContext,
    ) -> Result<Option<Value>, Error> {
        if let Value::Int(value) = msg {
            let _ = self.seen.send(value);
            if value >= 3 {
                ctx.send_exit(&self.pong, ExitReason::User(1));
                return Ok(None);
            }
            return Ok(Some(Value::Int(value + 1)));
        }
        Ok(None)
    }
}

// Records exit and down signals instead of terminating.
struct Observer {
    signals: mpsc::UnboundedSender<(ActorAddress, ExitReason, bool)>,
}

#[async_trait]
impl Actor for Observer {}

#[async_trait]
impl Handler for Observer {
    async fn handle_message(
        &mut self,
        _sender: Option<ActorHandle>,
        _msg: Value,
        _ctx: &mut ActorContext,
    ) -> Result<Option<Value>, Error> {
        Ok(None)
    }

    async fn on_exit(
        &mut self,
        source: ActorAddress,
        reason: ExitReason,
        _ctx: &mut ActorContext,
    ) -> ExitAction {
        let _ = self.signals.send((source, reason, true));
        ExitAction::Ignore
    }

    async fn on_down(
        &mut self,
        source: ActorAddress,
        reason: ExitReason,
        _ctx: &mut ActorContext,
    ) {
        let _ = self.signals.send((source, reason, false));
    }
}

fn system() -> actor::SystemRef {
    let (system, _runner) =
        ActorSystem::create(ActorSystemConfig::default(), CancellationToken::new());
    system
}

async fn shutdown(system: &actor::SystemRef) {
    system.stop_system();
    tokio::time::timeout(Duration::from_secs(5), system.await_all_actors_done())
        .await
        .unwrap();
    assert_eq!(system.actor_count(), 0);
}

#[tokio::test(flavor = "multi_thread")]
#[traced_test]
async fn test_ping_pong_and_link_propagation() {
    let system = system();
    let pong = system.spawn(Pong).await.unwrap();
    let (seen, mut values) = mpsc::unbounded_channel();
    let ping = system
        .spawn(Ping {
            pong: pong.clone(),
            seen,
        })
        .await
        .unwrap();

    // Pong exits with user(1); the link takes ping down with the same reason.
    assert_eq!(pong.wait_for_exit().await, ExitReason::User(1));
    assert_eq!(ping.wait_for_exit().await, ExitReason::User(1));

    let mut received = vec![];
    while let Ok(value) = values.try_recv() {
        received.push(value);
    }
    assert_eq!(received, vec![1, 3]);
    system.await_all_actors_done().await;
    assert!(logs_contain("Propagating exit"));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_exit_and_down_signals() {
    let system = system();
    let (signals, mut received) = mpsc::unbounded_channel();
    let observer = system.spawn(Observer { signals }).await.unwrap();
    let linked = system.spawn(Pong).await.unwrap();
    let monitored = system.spawn(Pong).await.unwrap();

    assert!(system.link(&observer, &linked).unwrap());
    assert!(system.monitor(&monitored, &observer).unwrap());

    system.send_exit(&linked, ExitReason::User(2));
    system.send_exit(&monitored, ExitReason::Normal);

    let mut signals = vec![];
    for _ in 0..2 {
        let signal = tokio::time::timeout(Duration::from_secs(5), received.recv())
            .await
            .unwrap()
            .unwrap();
        signals.push(signal);
    }
    assert!(signals.contains(&(linked.address().clone(), ExitReason::User(2), true)));
    assert!(signals.contains(&(monitored.address().clone(), ExitReason::Normal, false)));
    assert!(observer.is_alive());

    let cell = observer.downcast_ref::<actor::ActorCell>().unwrap();
    assert_eq!(cell.link_count(), 0);
    shutdown(&system).await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_link_to_terminated_actor() {
    let system = system();
    let (signals, mut received) = mpsc::unbounded_channel();
    let observer = system.spawn(Observer { signals }).await.unwrap();
    let short_lived = system.spawn(Pong).await.unwrap();
    system.send_exit(&short_lived, ExitReason::UserShutdown);
    short_lived.wait_for_exit().await;

    assert!(!system.link(&observer, &short_lived).unwrap());
    let (source, reason, via_link) = received.recv().await.unwrap();
    assert_eq!(&source, short_lived.address());
    assert_eq!(reason, ExitReason::UserShutdown);
    assert!(via_link);
    shutdown(&system).await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_unlink_stops_propagation() {
    let system = system();
    let a = system.spawn(Pong).await.unwrap();
    let b = system.spawn(Pong).await.unwrap();
    system.link(&a, &b).unwrap();
    assert!(system.unlink(&a, &b));

    system.send_exit(&a, ExitReason::User(9));
    a.wait_for_exit().await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(b.is_alive());
    shutdown(&system).await;
    assert_eq!(b.wait_for_exit().await, ExitReason::Kill);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_exit_chain() {
    let system = system();
    let mut chain = vec![];
    for _ in 0..5 {
        chain.push(system.spawn(Pong).await.unwrap());
    }
    for pair in chain.windows(2) {
        system.link(&pair[0], &pair[1]).unwrap();
    }
    system.send_exit(&chain[0], ExitReason::User(4));
    for actor in &chain {
        assert_eq!(actor.wait_for_exit().await, ExitReason::User(4));
    }
    system.await_all_actors_done().await;
    assert_eq!(system.actor_count(), 0);
}
