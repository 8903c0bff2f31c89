// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

// Integration tests: two actor systems in one process talking over loopback.

use actor::{
    Actor, ActorAddress, ActorContext, ActorHandle, ActorSystem, ActorSystemConfig,
    Error as ActorError, ExitAction, ExitReason, Handler, SystemRef, TypeSignature,
    TypeTag, Value,
};
use middleman::{ConnectOptions, Error, Middleman, MiddlemanConfig, TransportKind, Unpublish};

use async_trait::async_trait;
use futures::future::join_all;
use tokio::{sync::mpsc, time::{sleep, timeout}};
use tokio_util::sync::CancellationToken;

use tracing_test::traced_test;

use std::time::Duration;

const WAIT: Duration = Duration::from_secs(5);

// Replies to every integer with its successor.
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
    ) -> Result<Option<Value>, ActorError> {
        match msg {
            Value::Int(value) => Ok(Some(Value::Int(value + 1))),
            _ => Ok(None),
        }
    }
}

// Sends 0 to the server, then bounces every reply back until it sees 3.
struct Ping {
    server: ActorHandle,
    seen: mpsc::UnboundedSender<i64>,
}

#[async_trait]
impl Actor for Ping {
    async fn pre_start(&mut self, ctx: &mut ActorContext) -> Result<(), ActorError> {
        ctx.link_to(&self.server)?;
        let _ = self.seen.send(0);
        ctx.send(&self.server, Value::Int(0));
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
    ) -> Result<Option<Value>, ActorError> {
        if let Value::Int(value) = msg {
            let _ = self.seen.send(value);
            if value >= 3 {
                ctx.send_exit(&self.server, ExitReason::User(1));
                return Ok(None);
            }
            return Ok(Some(Value::Int(value)));
        }
        Ok(None)
    }
}

// Sorts integer lists.
struct Sorter;

#[async_trait]
impl Actor for Sorter {
    fn type_signature(&self) -> TypeSignature {
        TypeSignature::of([TypeTag::IntList])
    }
}

#[async_trait]
impl Handler for Sorter {
    async fn handle_message(
        &mut self,
        _sender: Option<ActorHandle>,
        msg: Value,
        _ctx: &mut ActorContext,
    ) -> Result<Option<Value>, ActorError> {
        match msg {
            Value::IntList(mut values) => {
                values.sort_unstable();
                Ok(Some(Value::IntList(values)))
            }
            _ => Ok(None),
        }
    }
}

// Terminates on the first message.
struct Quitter(u32);

#[async_trait]
impl Actor for Quitter {}

#[async_trait]
impl Handler for Quitter {
    async fn handle_message(
        &mut self,
        _sender: Option<ActorHandle>,
        _msg: Value,
        ctx: &mut ActorContext,
    ) -> Result<Option<Value>, ActorError> {
        ctx.quit(ExitReason::User(self.0));
        Ok(None)
    }
}

// Greets the actor whose address it receives.
struct Greeter;

#[async_trait]
impl Actor for Greeter {}

#[async_trait]
impl Handler for Greeter {
    async fn handle_message(
        &mut self,
        _sender: Option<ActorHandle>,
        msg: Value,
        ctx: &mut ActorContext,
    ) -> Result<Option<Value>, ActorError> {
        if let Value::Address(address) = msg {
            let target = ctx.resolve(&address)?;
            ctx.send(&target, Value::from("hello"));
        }
        Ok(None)
    }
}

// Links to or monitors an actor, then records messages and signals.
struct Watcher {
    target: Option<(ActorHandle, bool)>,
    events: mpsc::UnboundedSender<Event>,
}

#[derive(Debug, PartialEq)]
enum Event {
    Message(Value),
    Exit(ActorAddress, ExitReason),
    Down(ActorAddress, ExitReason),
}

impl Watcher {
    fn new(events: mpsc::UnboundedSender<Event>) -> Self {
        Self {
            target: None,
            events,
        }
    }

    fn linked(target: ActorHandle, events: mpsc::UnboundedSender<Event>) -> Self {
        Self {
            target: Some((target, true)),
            events,
        }
    }

    fn monitoring(target: ActorHandle, events: mpsc::UnboundedSender<Event>) -> Self {
        Self {
            target: Some((target, false)),
            events,
        }
    }
}

#[async_trait]
impl Actor for Watcher {
    async fn pre_start(&mut self, ctx: &mut ActorContext) -> Result<(), ActorError> {
        match &self.target {
            Some((target, true)) => {
                ctx.link_to(target)?;
            }
            Some((target, false)) => {
                ctx.monitor(target)?;
            }
            None => {}
        }
        Ok(())
    }
}

#[async_trait]
impl Handler for Watcher {
    async fn handle_message(
        &mut self,
        _sender: Option<ActorHandle>,
        msg: Value,
        _ctx: &mut ActorContext,
    ) -> Result<Option<Value>, ActorError> {
        let _ = self.events.send(Event::Message(msg));
        Ok(None)
    }

    async fn on_exit(
        &mut self,
        source: ActorAddress,
        reason: ExitReason,
        _ctx: &mut ActorContext,
    ) -> ExitAction {
        let _ = self.events.send(Event::Exit(source, reason));
        ExitAction::Ignore
    }

    async fn on_down(
        &mut self,
        source: ActorAddress,
        reason: ExitReason,
        _ctx: &mut ActorContext,
    ) {
        let _ = self.events.send(Event::Down(source, reason));
    }
}

fn config() -> MiddlemanConfig {
    MiddlemanConfig {
        enable_tcp: true,
        enable_udp: true,
        bind_address: "127.0.0.1".to_owned(),
        handshake_timeout_ms: 2000,
        handshake_initial_backoff_ms: 50,
        heartbeat_interval_ms: 200,
        ..Default::default()
    }
}

fn node(host: &str) -> (SystemRef, Middleman) {
    let (system, _runner) = ActorSystem::create(
        ActorSystemConfig {
            host: Some(host.to_owned()),
            ..Default::default()
        },
        CancellationToken::new(),
    );
    let middleman = Middleman::start(&system, config()).unwrap();
    (system, middleman)
}

fn transport(reliable: bool) -> ConnectOptions {
    ConnectOptions::default().transport(if reliable {
        TransportKind::Tcp
    } else {
        TransportKind::Udp
    })
}

async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    for _ in 0..100 {
        if check() {
            return true;
        }
        sleep(Duration::from_millis(50)).await;
    }
    false
}

async fn next_event(events: &mut mpsc::UnboundedReceiver<Event>) -> Event {
    timeout(WAIT, events.recv())
        .await
        .expect("no event in time")
        .expect("event channel closed")
}

// Stops the middlemen, then their actor systems.
async fn shutdown(nodes: &[&Middleman]) {
    for middleman in nodes {
        middleman.shutdown().await;
    }
    for middleman in nodes {
        let system = middleman.system();
        system.stop_system();
        timeout(WAIT, system.await_all_actors_done())
            .await
            .expect("actors still running");
    }
}

async fn check_identity(reliable: bool) {
    let (server_system, server) = node("node-a");
    let (_client_system, client) = node("node-b");
    let pong = server_system.spawn(Pong).await.unwrap();

    let first = server.publish(&pong, 0, None, reliable).await.unwrap();
    let second = server.publish(&pong, 0, None, reliable).await.unwrap();
    assert_ne!(first.port, second.port);
    assert_eq!(first.actor, second.actor);

    let a = client
        .connect_with("127.0.0.1", first.port, transport(reliable))
        .await
        .unwrap();
    let b = client
        .connect_with("127.0.0.1", second.port, transport(reliable))
        .await
        .unwrap();
    assert!(a.is_remote());
    assert_eq!(a.address(), pong.address());
    assert!(a.ptr_eq(&b));

    let concurrent = join_all(
        (0..4).map(|_| client.connect_with("127.0.0.1", first.port, transport(reliable))),
    )
    .await;
    for handle in concurrent {
        assert!(handle.unwrap().ptr_eq(&a));
    }
    assert_eq!(client.proxy_count(), 1);
    assert_eq!(client.connected_nodes(), vec![server.node().clone()]);

    // Connecting to an endpoint of the local node yields the actor itself.
    let local = server
        .connect_with("127.0.0.1", first.port, transport(reliable))
        .await
        .unwrap();
    assert!(!local.is_remote());
    assert!(local.ptr_eq(&pong));
    assert_eq!(server.proxy_count(), 0);

    shutdown(&[&client, &server]).await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_tcp_identity() {
    check_identity(true).await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_udp_identity() {
    check_identity(false).await;
}

async fn check_ping_pong(reliable: bool) {
    let (server_system, server) = node("node-a");
    let (client_system, client) = node("node-b");
    let pong = server_system.spawn(Pong).await.unwrap();
    let endpoint = server.publish(&pong, 0, None, reliable).await.unwrap();

    let remote = client
        .connect_with("127.0.0.1", endpoint.port, transport(reliable))
        .await
        .unwrap();
    let (seen, mut values) = mpsc::unbounded_channel();
    let ping = client_system
        .spawn(Ping {
            server: remote.clone(),
            seen,
        })
        .await
        .unwrap();

    assert_eq!(timeout(WAIT, pong.wait_for_exit()).await.unwrap(), ExitReason::User(1));
    assert_eq!(timeout(WAIT, ping.wait_for_exit()).await.unwrap(), ExitReason::User(1));

    let mut received = vec![];
    while let Ok(value) = values.try_recv() {
        received.push(value);
    }
    assert_eq!(received, vec![0, 1, 2, 3]);

    // The terminated server actor takes its endpoint and the client proxy with it.
    assert!(eventually(|| server.published_ports().is_empty()).await);
    assert!(eventually(|| !client.has_proxy(pong.address())).await);
    assert!(eventually(|| remote.exit_reason() == Some(ExitReason::User(1))).await);

    shutdown(&[&client, &server]).await;
}

#[tokio::test(flavor = "multi_thread")]
#[traced_test]
async fn test_tcp_ping_pong() {
    check_ping_pong(true).await;
    assert!(logs_contain("Published"));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_udp_ping_pong() {
    check_ping_pong(false).await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_replies_reach_the_remote_sender() {
    let (server_system, server) = node("node-a");
    let (client_system, client) = node("node-b");
    let sorter = server_system.spawn(Sorter).await.unwrap();
    let endpoint = server.publish(&sorter, 0, None, true).await.unwrap();
    let remote = client.connect("127.0.0.1", endpoint.port).await.unwrap();

    let (events, mut received) = mpsc::unbounded_channel();
    let collector = client_system.spawn(Watcher::new(events)).await.unwrap();
    client.send_as(&collector, &remote, Value::IntList(vec![5, 3, 9, 1]));
    assert_eq!(
        next_event(&mut received).await,
        Event::Message(Value::IntList(vec![1, 3, 5, 9]))
    );

    // Messages outside the signature are dropped by the remote actor.
    client.send_as(&collector, &remote, Value::Int(4));
    client.send_as(&collector, &remote, Value::IntList(vec![2, 1]));
    assert_eq!(
        next_event(&mut received).await,
        Event::Message(Value::IntList(vec![1, 2]))
    );

    shutdown(&[&client, &server]).await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_addresses_in_payloads_resolve_to_proxies() {
    let (server_system, server) = node("node-a");
    let (client_system, client) = node("node-b");
    let greeter = server_system.spawn(Greeter).await.unwrap();
    let endpoint = server.publish(&greeter, 0, None, true).await.unwrap();
    let remote = client.connect("127.0.0.1", endpoint.port).await.unwrap();

    let (events, mut received) = mpsc::unbounded_channel();
    let collector = client_system.spawn(Watcher::new(events)).await.unwrap();
    client.send(&remote, Value::Address(collector.address().clone()));

    assert_eq!(
        next_event(&mut received).await,
        Event::Message(Value::from("hello"))
    );
    assert!(server.has_proxy(collector.address()));

    shutdown(&[&client, &server]).await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_remote_link_propagates_exit() {
    let (server_system, server) = node("node-a");
    let (client_system, client) = node("node-b");
    let quitter = server_system.spawn(Quitter(7)).await.unwrap();
    let endpoint = server.publish(&quitter, 0, None, true).await.unwrap();
    let remote = client.connect("127.0.0.1", endpoint.port).await.unwrap();

    let (events, mut received) = mpsc::unbounded_channel();
    let watcher = client_system
        .spawn(Watcher::linked(remote.clone(), events))
        .await
        .unwrap();
    client.send(&remote, Value::Unit);

    assert_eq!(
        timeout(WAIT, quitter.wait_for_exit()).await.unwrap(),
        ExitReason::User(7)
    );
    assert_eq!(
        next_event(&mut received).await,
        Event::Exit(quitter.address().clone(), ExitReason::User(7))
    );
    assert!(eventually(|| !client.has_proxy(quitter.address())).await);
    assert!(eventually(|| remote.exit_reason() == Some(ExitReason::User(7))).await);

    // Exactly one notification per link.
    sleep(Duration::from_millis(200)).await;
    assert!(received.try_recv().is_err());
    assert!(watcher.is_alive());

    shutdown(&[&client, &server]).await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_remote_link_terminates_local_actor() {
    let (server_system, server) = node("node-a");
    let (client_system, client) = node("node-b");
    let quitter = server_system.spawn(Quitter(3)).await.unwrap();
    let endpoint = server.publish(&quitter, 0, None, true).await.unwrap();
    let remote = client.connect("127.0.0.1", endpoint.port).await.unwrap();

    // The pong actor does not override exits, so the link takes it down.
    let local = client_system.spawn(Pong).await.unwrap();
    client.link(&local, &remote).unwrap();
    client.send(&remote, Value::Unit);

    assert_eq!(
        timeout(WAIT, local.wait_for_exit()).await.unwrap(),
        ExitReason::User(3)
    );

    shutdown(&[&client, &server]).await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_remote_monitor() {
    let (server_system, server) = node("node-a");
    let (client_system, client) = node("node-b");
    let quitter = server_system.spawn(Quitter(2)).await.unwrap();
    let endpoint = server.publish(&quitter, 0, None, true).await.unwrap();
    let remote = client.connect("127.0.0.1", endpoint.port).await.unwrap();

    let (events, mut received) = mpsc::unbounded_channel();
    let watcher = client_system
        .spawn(Watcher::monitoring(remote.clone(), events))
        .await
        .unwrap();
    client.send(&remote, Value::Unit);

    assert_eq!(
        next_event(&mut received).await,
        Event::Down(quitter.address().clone(), ExitReason::User(2))
    );
    sleep(Duration::from_millis(200)).await;
    assert!(received.try_recv().is_err());
    assert!(watcher.is_alive());

    // Monitoring an actor that is already gone reports it right away.
    let (events, mut late) = mpsc::unbounded_channel();
    let late_watcher = client_system.spawn(Watcher::new(events)).await.unwrap();
    client.monitor(&remote, &late_watcher).unwrap();
    assert!(matches!(next_event(&mut late).await, Event::Down(_, _)));

    shutdown(&[&client, &server]).await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_lost_connection_exits_proxies() {
    let (server_system, server) = node("node-a");
    let (client_system, client) = node("node-b");
    let pong = server_system.spawn(Pong).await.unwrap();
    let endpoint = server.publish(&pong, 0, None, true).await.unwrap();
    let remote = client.connect("127.0.0.1", endpoint.port).await.unwrap();

    let (events, mut received) = mpsc::unbounded_channel();
    let _watcher = client_system
        .spawn(Watcher::linked(remote.clone(), events))
        .await
        .unwrap();

    server.shutdown().await;

    assert_eq!(
        next_event(&mut received).await,
        Event::Exit(pong.address().clone(), ExitReason::NetworkError)
    );
    assert!(eventually(|| remote.exit_reason() == Some(ExitReason::NetworkError)).await);
    assert!(eventually(|| client.proxy_count() == 0).await);
    assert!(eventually(|| client.connected_nodes().is_empty()).await);

    // A shut down middleman refuses new work.
    assert!(server.publish(&pong, 0, None, true).await.is_err());

    shutdown(&[&client, &server]).await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_handshake_type_mismatch() {
    let (server_system, server) = node("node-a");
    let (_client_system, client) = node("node-b");
    let pong = server_system.spawn(Pong).await.unwrap();
    let endpoint = server.publish(&pong, 0, None, true).await.unwrap();

    let expected = TypeSignature::of([TypeTag::Int, TypeTag::IntList]);
    let result = client
        .connect_with(
            "127.0.0.1",
            endpoint.port,
            ConnectOptions::default().expect(expected.clone()),
        )
        .await;
    assert_eq!(
        result.unwrap_err(),
        Error::HandshakeTypeMismatch {
            expected,
            declared: TypeSignature::of([TypeTag::Int]),
        }
    );
    assert_eq!(client.proxy_count(), 0);
    assert!(eventually(|| client.connected_nodes().is_empty()).await);

    let compatible = client
        .connect_with(
            "127.0.0.1",
            endpoint.port,
            ConnectOptions::default().expect(TypeSignature::of([TypeTag::Int])),
        )
        .await;
    assert!(compatible.is_ok());

    shutdown(&[&client, &server]).await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_port_in_use() {
    let (system, middleman) = node("node-a");
    let pong = system.spawn(Pong).await.unwrap();
    for reliable in [true, false] {
        let endpoint = middleman.publish(&pong, 0, None, reliable).await.unwrap();
        assert_eq!(
            middleman
                .publish(&pong, endpoint.port, None, reliable)
                .await
                .unwrap_err(),
            Error::PortInUse(endpoint.port)
        );
    }
    assert_eq!(middleman.published_ports().len(), 2);
    shutdown(&[&middleman]).await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_handshake_timeout() {
    let (_system, middleman) = node("node-b");

    // Accepts at the kernel level but never answers.
    let silent = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = silent.local_addr().unwrap().port();
    let options = ConnectOptions::default().timeout(Duration::from_millis(300));
    assert!(matches!(
        middleman.connect_with("127.0.0.1", port, options).await,
        Err(Error::Timeout(_))
    ));

    let silent_udp = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
    let port = silent_udp.local_addr().unwrap().port();
    let options = transport(false).timeout(Duration::from_millis(300));
    assert!(matches!(
        middleman.connect_with("127.0.0.1", port, options).await,
        Err(Error::Timeout(_))
    ));
    assert_eq!(middleman.proxy_count(), 0);

    shutdown(&[&middleman]).await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_unreachable_node() {
    let (_system, middleman) = node("node-b");
    let closed = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = closed.local_addr().unwrap().port();
    drop(closed);
    assert!(matches!(
        middleman.connect("127.0.0.1", port).await,
        Err(Error::NodeUnreachable(_))
    ));
    shutdown(&[&middleman]).await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_unpublish() {
    let (server_system, server) = node("node-a");
    let (_client_system, client) = node("node-b");
    let pong = server_system.spawn(Pong).await.unwrap();
    let tcp = server.publish(&pong, 0, None, true).await.unwrap();
    let udp = server.publish(&pong, 0, None, false).await.unwrap();
    assert_eq!(server.published_ports().len(), 2);

    assert_eq!(server.unpublish(Unpublish::Port(tcp.port)), 1);
    assert_eq!(server.unpublish(Unpublish::Port(tcp.port)), 0);
    sleep(Duration::from_millis(100)).await;
    assert!(matches!(
        client.connect("127.0.0.1", tcp.port).await,
        Err(Error::NodeUnreachable(_))
    ));

    assert_eq!(
        server.unpublish(Unpublish::Actor(pong.address().clone())),
        1
    );
    assert!(server.published_ports().is_empty());
    let options = transport(false).timeout(Duration::from_millis(300));
    assert!(client.connect_with("127.0.0.1", udp.port, options).await.is_err());

    shutdown(&[&client, &server]).await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_invalid_configuration_prevents_start() {
    let (system, _runner) =
        ActorSystem::create(ActorSystemConfig::default(), CancellationToken::new());
    let config = MiddlemanConfig {
        enable_tcp: false,
        enable_udp: false,
        ..Default::default()
    };
    assert!(matches!(
        Middleman::start(&system, config),
        Err(Error::Configuration(_))
    ));

    let remote = ActorAddress::new(actor::NodeId::new("elsewhere"), actor::ActorId(1));
    assert!(system.resolve(&remote).is_err());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_disabled_transport() {
    let (system, _runner) =
        ActorSystem::create(ActorSystemConfig::default(), CancellationToken::new());
    let middleman = Middleman::start(&system, MiddlemanConfig::default()).unwrap();
    let pong = system.spawn(Pong).await.unwrap();
    assert_eq!(
        middleman.publish(&pong, 0, Some("127.0.0.1"), false).await.unwrap_err(),
        Error::TransportDisabled(TransportKind::Udp)
    );
    shutdown(&[&middleman]).await;
}
