// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! Best-effort transport: one frame per datagram.
//!
//! A published UDP endpoint multiplexes every peer over its single socket. A peer
//! becomes a connection when its first CONNECT arrives; datagrams from unknown peers
//! are dropped. Client connections use a socket of their own, connected to the peer.

use super::{FrameWriter, TransportContext};
use crate::{
    Error,
    frame::Frame,
    node::{Connection, TransportKind},
};

use async_trait::async_trait;
use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, Span, debug, warn};

use std::{
    collections::HashMap,
    io::ErrorKind,
    net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr},
    sync::Arc,
};

struct UdpFrameWriter {
    socket: Arc<UdpSocket>,
    /// Destination of an endpoint socket. Client sockets are connected.
    peer: Option<SocketAddr>,
    max_datagram_size: usize,
}

#[async_trait]
impl FrameWriter for UdpFrameWriter {
    async fn write_frame(&mut self, frame: &Frame) -> Result<(), Error> {
        let bytes = frame.encode()?;
        if bytes.len() > self.max_datagram_size {
            return Err(Error::Codec(format!(
                "frame of {} bytes exceeds max-datagram-size {}",
                bytes.len(),
                self.max_datagram_size
            )));
        }
        let sent = match self.peer {
            Some(peer) => self.socket.send_to(&bytes, peer).await,
            None => self.socket.send(&bytes).await,
        };
        match sent {
            Ok(_) => Ok(()),
            // Nobody listens yet; the datagram is lost like any other.
            Err(e) if e.kind() == ErrorKind::ConnectionRefused => {
                debug!("Datagram refused: {}", e);
                Ok(())
            }
            Err(e) => Err(Error::NetworkError(e.to_string())),
        }
    }
}

fn decode(bytes: &[u8], peer: SocketAddr) -> Option<Frame> {
    match Frame::decode(bytes) {
        Ok(frame) => Some(frame),
        Err(e) => {
            warn!("Dropping undecodable datagram from {}: {}", peer, e);
            None
        }
    }
}

fn start_peer(
    ctx: &TransportContext,
    socket: &Arc<UdpSocket>,
    peer: SocketAddr,
    port: u16,
    cancel: &CancellationToken,
) -> Arc<Connection> {
    debug!("New UDP peer {} on port {}.", peer, port);
    let connection = Arc::new(Connection::new(
        TransportKind::Udp,
        peer,
        Some(port),
        cancel.child_token(),
    ));
    ctx.announce(&connection);
    ctx.spawn_writer(
        connection.clone(),
        UdpFrameWriter {
            socket: socket.clone(),
            peer: Some(peer),
            max_datagram_size: ctx.config.max_datagram_size,
        },
    );
    connection
}

/// Binds a datagram socket on `ip:port`. Port 0 picks an ephemeral port.
pub async fn bind(ip: IpAddr, port: u16) -> Result<UdpSocket, Error> {
    UdpSocket::bind((ip, port))
        .await
        .map_err(|e| Error::from_bind(port, e))
}

/// Receives datagrams on `socket` until `cancel` fires. Cancelling also tears down
/// every connection riding on the socket.
pub fn serve(ctx: &TransportContext, socket: UdpSocket, port: u16, cancel: CancellationToken) {
    let ctx = ctx.clone();
    let tracker = ctx.tracker.clone();
    let socket = Arc::new(socket);
    tracker.spawn(
        async move {
            let mut peers: HashMap<SocketAddr, Arc<Connection>> = HashMap::new();
            let mut buffer = vec![0u8; ctx.config.max_datagram_size];
            loop {
                let (size, peer) = tokio::select! {
                    _ = cancel.cancelled() => break,
                    received = socket.recv_from(&mut buffer) => match received {
                        Ok(received) => received,
                        Err(e) => {
                            debug!("Receive on port {} failed: {}", port, e);
                            continue;
                        }
                    }
                };
                let Some(frame) = decode(&buffer[..size], peer) else {
                    continue;
                };
                peers.retain(|_, connection| !connection.is_closed());
                let connection = match peers.get(&peer) {
                    Some(connection) => connection.clone(),
                    None if matches!(frame, Frame::Connect { .. }) => {
                        let connection = start_peer(&ctx, &socket, peer, port, &cancel);
                        peers.insert(peer, connection.clone());
                        connection
                    }
                    None => {
                        debug!("Dropping {:?} from unknown peer {}.", frame, peer);
                        continue;
                    }
                };
                if !ctx.dispatch(&connection, frame) {
                    break;
                }
            }
            for connection in peers.values() {
                connection.close();
            }
            debug!("UDP endpoint on port {} stopped.", port);
        }
        .instrument(Span::current()),
    );
}

/// Opens a socket connected to `peer` and starts receiving on it.
pub async fn connect(
    ctx: &TransportContext,
    bind_ip: IpAddr,
    peer: SocketAddr,
) -> Result<Arc<Connection>, Error> {
    let local = match (bind_ip, peer) {
        (IpAddr::V4(_), SocketAddr::V4(_)) | (IpAddr::V6(_), SocketAddr::V6(_)) => bind_ip,
        (_, SocketAddr::V4(_)) => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
        (_, SocketAddr::V6(_)) => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
    };
    let socket = UdpSocket::bind((local, 0))
        .await
        .map_err(|e| Error::NodeUnreachable(format!("{}: {}", peer, e)))?;
    socket
        .connect(peer)
        .await
        .map_err(|e| Error::NodeUnreachable(format!("{}: {}", peer, e)))?;
    let socket = Arc::new(socket);
    let connection = Arc::new(Connection::new(
        TransportKind::Udp,
        peer,
        None,
        ctx.token.child_token(),
    ));
    ctx.announce(&connection);
    ctx.spawn_writer(
        connection.clone(),
        UdpFrameWriter {
            socket: socket.clone(),
            peer: None,
            max_datagram_size: ctx.config.max_datagram_size,
        },
    );

    let reader_ctx = ctx.clone();
    let reader = connection.clone();
    ctx.tracker.spawn(
        async move {
            let mut buffer = vec![0u8; reader_ctx.config.max_datagram_size];
            loop {
                tokio::select! {
                    _ = reader.closed() => break,
                    received = socket.recv(&mut buffer) => match received {
                        Ok(size) => {
                            if let Some(frame) = decode(&buffer[..size], peer) {
                                if !reader_ctx.dispatch(&reader, frame) {
                                    break;
                                }
                            }
                        }
                        Err(e) if e.kind() == ErrorKind::ConnectionRefused => {
                            debug!("Peer {} refused a datagram.", peer);
                        }
                        Err(e) => {
                            debug!("Receive from {} failed: {}", peer, e);
                            break;
                        }
                    }
                }
            }
            reader.close();
        }
        .instrument(Span::current()),
    );
    Ok(connection)
}
