// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! Reliable transport: one TCP stream per connection, frames prefixed with their
//! length as a 4-byte big-endian integer.

use super::{FrameWriter, TransportContext};
use crate::{
    Error,
    frame::Frame,
    node::{Connection, TransportKind},
};

use async_trait::async_trait;
use bytes::{BufMut, BytesMut};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{
        TcpListener, TcpStream,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
    time::timeout,
};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, Span, debug, warn};

use std::{
    net::{IpAddr, SocketAddr},
    sync::Arc,
    time::Duration,
};

struct TcpFrameWriter {
    stream: OwnedWriteHalf,
    buffer: BytesMut,
    max_frame_size: usize,
}

#[async_trait]
impl FrameWriter for TcpFrameWriter {
    async fn write_frame(&mut self, frame: &Frame) -> Result<(), Error> {
        let bytes = frame.encode()?;
        if bytes.len() > self.max_frame_size {
            return Err(Error::Codec(format!(
                "frame of {} bytes exceeds max-frame-size {}",
                bytes.len(),
                self.max_frame_size
            )));
        }
        self.buffer.clear();
        self.buffer.reserve(4 + bytes.len());
        self.buffer.put_u32(bytes.len() as u32);
        self.buffer.put_slice(&bytes);
        self.stream
            .write_all(&self.buffer)
            .await
            .map_err(|e| Error::NetworkError(e.to_string()))?;
        self.stream
            .flush()
            .await
            .map_err(|e| Error::NetworkError(e.to_string()))
    }

    async fn shutdown(&mut self) {
        let _ = self.stream.shutdown().await;
    }
}

/// Reads one length-prefixed frame.
///
/// Returns `Ok(None)` on a clean end of stream. A frame that fails to decode is
/// reported as `Codec` with the stream still in sync.
async fn read_frame(
    stream: &mut OwnedReadHalf,
    buffer: &mut BytesMut,
    max_frame_size: usize,
) -> Result<Option<Frame>, Error> {
    let length = match stream.read_u32().await {
        Ok(length) => length as usize,
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(Error::NetworkError(e.to_string())),
    };
    if length > max_frame_size {
        return Err(Error::NetworkError(format!(
            "incoming frame of {} bytes exceeds max-frame-size {}",
            length, max_frame_size
        )));
    }
    buffer.clear();
    buffer.resize(length, 0);
    stream
        .read_exact(&mut buffer[..])
        .await
        .map_err(|e| Error::NetworkError(e.to_string()))?;
    Frame::decode(&buffer[..]).map(Some)
}

/// Wires a connected stream to `connection`: a reader task feeding the dispatcher and
/// a blocking writer draining the outbound queue.
fn start_stream(ctx: &TransportContext, connection: Arc<Connection>, stream: TcpStream) {
    if let Err(e) = stream.set_nodelay(true) {
        debug!("Cannot disable Nagle on {}: {}", connection.peer(), e);
    }
    let (mut reader, writer) = stream.into_split();
    ctx.announce(&connection);
    ctx.spawn_writer(
        connection.clone(),
        TcpFrameWriter {
            stream: writer,
            buffer: BytesMut::with_capacity(4096),
            max_frame_size: ctx.config.max_frame_size,
        },
    );

    let reader_ctx = ctx.clone();
    let max_frame_size = ctx.config.max_frame_size;
    ctx.tracker.spawn(
        async move {
            let mut buffer = BytesMut::with_capacity(4096);
            loop {
                tokio::select! {
                    _ = connection.closed() => break,
                    result = read_frame(&mut reader, &mut buffer, max_frame_size) => {
                        match result {
                            Ok(Some(frame)) => {
                                if !reader_ctx.dispatch(&connection, frame) {
                                    break;
                                }
                            }
                            Ok(None) => {
                                debug!("Peer {} closed the stream.", connection.peer());
                                break;
                            }
                            Err(Error::Codec(e)) => {
                                warn!("Undecodable frame from {}: {}", connection.peer(), e);
                            }
                            Err(e) => {
                                debug!("Reading from {} failed: {}", connection.peer(), e);
                                break;
                            }
                        }
                    }
                }
            }
            connection.close();
        }
        .instrument(Span::current()),
    );
}

/// Binds a listener on `ip:port`. Port 0 picks an ephemeral port.
pub async fn bind(ip: IpAddr, port: u16) -> Result<TcpListener, Error> {
    TcpListener::bind((ip, port))
        .await
        .map_err(|e| Error::from_bind(port, e))
}

/// Accepts connections on `listener` until `cancel` fires.
pub fn serve(
    ctx: &TransportContext,
    listener: TcpListener,
    port: u16,
    cancel: CancellationToken,
) {
    let ctx = ctx.clone();
    let tracker = ctx.tracker.clone();
    tracker.spawn(
        async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    accepted = listener.accept() => match accepted {
                        Ok((stream, peer)) => {
                            debug!("Accepted {} on port {}.", peer, port);
                            let connection = Arc::new(Connection::new(
                                TransportKind::Tcp,
                                peer,
                                Some(port),
                                ctx.token.child_token(),
                            ));
                            start_stream(&ctx, connection, stream);
                        }
                        Err(e) => warn!("Accept failed on port {}: {}", port, e),
                    }
                }
            }
            debug!("TCP endpoint on port {} stopped.", port);
        }
        .instrument(Span::current()),
    );
}

/// Opens a stream to `peer`.
///
/// # Error
///
/// `Timeout` if the peer does not accept within `limit`, `NodeUnreachable` on any
/// other failure.
///
pub async fn connect(
    ctx: &TransportContext,
    peer: SocketAddr,
    limit: Duration,
) -> Result<Arc<Connection>, Error> {
    let stream = match timeout(limit, TcpStream::connect(peer)).await {
        Ok(Ok(stream)) => stream,
        Ok(Err(e)) => {
            return Err(Error::NodeUnreachable(format!("{}: {}", peer, e)));
        }
        Err(_) => {
            return Err(Error::Timeout(format!("connecting to {}", peer)));
        }
    };
    let connection = Arc::new(Connection::new(
        TransportKind::Tcp,
        peer,
        None,
        ctx.token.child_token(),
    ));
    start_stream(ctx, connection.clone(), stream);
    Ok(connection)
}
