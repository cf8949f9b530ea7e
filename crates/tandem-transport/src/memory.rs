//! In-memory transport.
//!
//! [`pair`] returns a server-side [`MemoryTransport`] and the [`MemoryPeer`]
//! that plays the remote client. Used by tests and benchmarks to drive a
//! connection without sockets.

use async_trait::async_trait;
use bytes::Bytes;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::traits::{Incoming, Transport, TransportError, TransportReader, TransportWriter};

/// What the peer injects into the server's reading half.
#[derive(Debug)]
enum PeerFrame {
    Incoming(Incoming),
    Close,
    Fail(String),
}

/// A message written by the server, as seen by the peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outgoing {
    /// Application payload.
    Data(Bytes),
    /// Keepalive ping.
    Ping,
    /// Close frame.
    Close,
}

/// Create a connected transport/peer pair.
#[must_use]
pub fn pair() -> (MemoryTransport, MemoryPeer) {
    let (peer_tx, peer_rx) = mpsc::unbounded_channel();
    let (server_tx, server_rx) = mpsc::unbounded_channel();
    let stalled = Arc::new(AtomicBool::new(false));

    let transport = MemoryTransport {
        inbound: peer_rx,
        outbound: server_tx,
        stalled: Arc::clone(&stalled),
    };
    let peer = MemoryPeer {
        tx: peer_tx,
        rx: server_rx,
        stalled,
    };
    (transport, peer)
}

/// Server side of an in-memory session.
pub struct MemoryTransport {
    inbound: mpsc::UnboundedReceiver<PeerFrame>,
    outbound: mpsc::UnboundedSender<Outgoing>,
    stalled: Arc<AtomicBool>,
}

impl Transport for MemoryTransport {
    type Reader = MemoryReader;
    type Writer = MemoryWriter;

    fn split(self) -> (Self::Reader, Self::Writer) {
        (
            MemoryReader {
                inbound: self.inbound,
            },
            MemoryWriter {
                outbound: self.outbound,
                stalled: self.stalled,
            },
        )
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

/// Reading half of a [`MemoryTransport`].
pub struct MemoryReader {
    inbound: mpsc::UnboundedReceiver<PeerFrame>,
}

#[async_trait]
impl TransportReader for MemoryReader {
    async fn recv(&mut self) -> Result<Option<Incoming>, TransportError> {
        match self.inbound.recv().await {
            Some(PeerFrame::Incoming(incoming)) => Ok(Some(incoming)),
            Some(PeerFrame::Close) => Ok(None),
            Some(PeerFrame::Fail(reason)) => Err(TransportError::ReceiveFailed(reason)),
            None => Err(TransportError::ConnectionClosed),
        }
    }
}

/// Writing half of a [`MemoryTransport`].
pub struct MemoryWriter {
    outbound: mpsc::UnboundedSender<Outgoing>,
    stalled: Arc<AtomicBool>,
}

impl MemoryWriter {
    async fn write(&mut self, message: Outgoing) -> Result<(), TransportError> {
        if self.stalled.load(Ordering::SeqCst) {
            // A peer that stopped reading: the write never completes.
            futures_util::future::pending::<()>().await;
        }
        self.outbound
            .send(message)
            .map_err(|_| TransportError::ConnectionClosed)
    }
}

#[async_trait]
impl TransportWriter for MemoryWriter {
    async fn send(&mut self, data: Bytes) -> Result<(), TransportError> {
        self.write(Outgoing::Data(data)).await
    }

    async fn ping(&mut self) -> Result<(), TransportError> {
        self.write(Outgoing::Ping).await
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.write(Outgoing::Close).await
    }
}

/// Remote end of an in-memory session.
pub struct MemoryPeer {
    tx: mpsc::UnboundedSender<PeerFrame>,
    rx: mpsc::UnboundedReceiver<Outgoing>,
    stalled: Arc<AtomicBool>,
}

impl MemoryPeer {
    /// Send a text payload to the server.
    pub fn send_text(&self, text: impl Into<String>) -> bool {
        self.send_data(Bytes::from(text.into()))
    }

    /// Send a raw payload to the server.
    pub fn send_data(&self, data: Bytes) -> bool {
        self.push(PeerFrame::Incoming(Incoming::Data(data)))
    }

    /// Send a keepalive ping to the server.
    pub fn send_ping(&self) -> bool {
        self.push(PeerFrame::Incoming(Incoming::Ping))
    }

    /// Acknowledge a server ping.
    pub fn send_pong(&self) -> bool {
        self.push(PeerFrame::Incoming(Incoming::Pong))
    }

    /// Close the session cleanly.
    pub fn close(&self) -> bool {
        self.push(PeerFrame::Close)
    }

    /// Make the server's next read fail.
    pub fn fail(&self, reason: impl Into<String>) -> bool {
        self.push(PeerFrame::Fail(reason.into()))
    }

    /// Stop (or resume) accepting server writes. Stalled writes never finish.
    pub fn stall_writes(&self, stalled: bool) {
        self.stalled.store(stalled, Ordering::SeqCst);
    }

    /// Receive the next message written by the server.
    ///
    /// Returns `None` once the server's writing half is gone.
    pub async fn recv(&mut self) -> Option<Outgoing> {
        self.rx.recv().await
    }

    /// Receive the next message if one is already buffered.
    pub fn try_recv(&mut self) -> Option<Outgoing> {
        self.rx.try_recv().ok()
    }

    /// Receive the next payload, skipping pings.
    ///
    /// Returns `None` on a close frame or when the server's writing half is
    /// gone.
    pub async fn recv_data(&mut self) -> Option<Bytes> {
        loop {
            match self.rx.recv().await? {
                Outgoing::Data(data) => return Some(data),
                Outgoing::Ping => continue,
                Outgoing::Close => return None,
            }
        }
    }

    fn push(&self, frame: PeerFrame) -> bool {
        self.tx.send(frame).is_ok()
    }
}
