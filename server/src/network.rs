//! Server network layer handling TCP connections.
//!
//! Frames are a big-endian `u16` payload length followed by the payload. Every accepted connection
//! gets a reader task that hands complete frames to the simulation thread and a writer task that
//! drains the connection's outbound queue. Neither task touches game state: a failing socket only
//! closes its [`ConnectionHandle`], and the simulation thread tears the connection down later.

use crate::connection::{ConnectionHandle, ConnectionId, DisconnectNotifier};
use crate::game_loop::ShutdownHandle;
use log::{debug, info, warn};
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

/// Events sent from network tasks to the simulation thread
#[derive(Debug)]
pub enum NetEvent {
    /// Sent before any frame of the connection
    Connected(ConnectionHandle),
    Received { id: ConnectionId, data: Vec<u8> },
}

pub struct NetworkServer {
    listener: TcpListener,
    local_addr: SocketAddr,
    notifier: Arc<DisconnectNotifier>,
    events: mpsc::UnboundedSender<NetEvent>,
    max_frame_size: usize,
    next_id: ConnectionId,
}

impl NetworkServer {
    pub async fn bind(
        addr: &str,
        notifier: Arc<DisconnectNotifier>,
        events: mpsc::UnboundedSender<NetEvent>,
        max_frame_size: usize,
    ) -> io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        Ok(Self {
            listener,
            local_addr,
            notifier,
            events,
            max_frame_size,
            next_id: 0,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Accepts connections until shutdown is requested. Connections that are already open keep
    /// running until they are closed.
    pub async fn run(mut self, shutdown: ShutdownHandle) {
        info!("Accepting connections on {}", self.local_addr);

        loop {
            tokio::select! {
                _ = shutdown.wait() => {
                    info!("Stopped accepting connections");
                    break;
                }
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, addr)) => self.accept(stream, addr),
                    Err(e) => {
                        warn!("Error accepting connection: {}", e);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    }
                },
            }
        }
    }

    fn accept(&mut self, stream: TcpStream, addr: SocketAddr) {
        self.next_id += 1;
        let id = self.next_id;
        if let Err(e) = stream.set_nodelay(true) {
            debug!("Could not disable Nagle for {}: {}", addr, e);
        }

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let handle = ConnectionHandle::new(id, addr, outbound_tx, Arc::clone(&self.notifier));
        if self.events.send(NetEvent::Connected(handle.clone())).is_err() {
            handle.close();
            return;
        }

        let (reader, writer) = stream.into_split();
        tokio::spawn(write_frames(writer, outbound_rx, handle.clone()));
        tokio::spawn(read_frames(
            reader,
            handle,
            self.events.clone(),
            self.max_frame_size,
        ));
    }
}

/// Reads frames until EOF, a socket error, an oversized frame or a close from elsewhere.
async fn read_frames(
    mut reader: OwnedReadHalf,
    handle: ConnectionHandle,
    events: mpsc::UnboundedSender<NetEvent>,
    max_frame_size: usize,
) {
    let id = handle.id();

    loop {
        let len = tokio::select! {
            _ = handle.closed() => break,
            len = reader.read_u16() => match len {
                Ok(len) => usize::from(len),
                Err(e) => {
                    if e.kind() != io::ErrorKind::UnexpectedEof {
                        debug!("Read error on connection {}: {}", id, e);
                    }
                    break;
                }
            },
        };
        if len == 0 {
            continue;
        }
        if len > max_frame_size {
            warn!(
                "Connection {} sent a {} byte frame (limit {}), closing",
                id, len, max_frame_size
            );
            break;
        }

        let mut data = vec![0u8; len];
        tokio::select! {
            _ = handle.closed() => break,
            read = reader.read_exact(&mut data) => {
                if let Err(e) = read {
                    debug!("Connection {} ended mid-frame: {}", id, e);
                    break;
                }
            }
        }
        if events.send(NetEvent::Received { id, data }).is_err() {
            break;
        }
    }

    handle.close();
}

/// Writes queued payloads until the connection closes, flushing whatever was queued before the
/// close.
async fn write_frames(
    mut writer: OwnedWriteHalf,
    mut outbound: mpsc::UnboundedReceiver<Vec<u8>>,
    handle: ConnectionHandle,
) {
    loop {
        tokio::select! {
            biased;
            payload = outbound.recv() => match payload {
                Some(payload) => {
                    if let Err(e) = write_frame(&mut writer, &payload).await {
                        debug!("Write error on connection {}: {}", handle.id(), e);
                        break;
                    }
                }
                None => break,
            },
            _ = handle.closed() => {
                while let Ok(payload) = outbound.try_recv() {
                    if write_frame(&mut writer, &payload).await.is_err() {
                        break;
                    }
                }
                break;
            }
        }
    }

    if let Err(e) = writer.shutdown().await {
        debug!("Shutdown of connection {} failed: {}", handle.id(), e);
    }
    handle.close();
}

pub async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, payload: &[u8]) -> io::Result<()> {
    let len = u16::try_from(payload.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "frame too large"))?;
    writer.write_u16(len).await?;
    writer.write_all(payload).await
}

/// Reads one frame, skipping empty ones. `Ok(None)` means the peer closed the stream.
pub async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> io::Result<Option<Vec<u8>>> {
    loop {
        let len = match reader.read_u16().await {
            Ok(len) => usize::from(len),
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e),
        };
        if len == 0 {
            continue;
        }
        let mut data = vec![0u8; len];
        reader.read_exact(&mut data).await?;
        return Ok(Some(data));
    }
}
