//! A live collaboration connection.
//!
//! A [`Connection`] owns one transport and drives it with two pumps:
//!
//! - the **inbound pump** reads client frames under a rolling idle
//!   deadline and forwards cursor updates to the [`RoomRegistry`];
//! - the **outbound pump** drains the bounded outbound queue to the
//!   transport and sends keepalive pings.
//!
//! Other components never touch the queue directly. They hold a
//! [`ConnectionHandle`] whose [`enqueue`](ConnectionHandle::enqueue) never
//! blocks and drops the payload when the queue is full.

use bytes::Bytes;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tandem_protocol::{codec, Event};
use tandem_transport::{
    ConnectionId, Incoming, Transport, TransportError, TransportReader, TransportWriter,
};
use tokio::sync::{mpsc, watch};
use tokio::time::{interval_at, timeout, Instant, MissedTickBehavior};
use tracing::{debug, trace, warn};

use crate::auth::Identity;
use crate::registry::RoomRegistry;
use crate::room::DocumentId;

/// Default outbound queue capacity.
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

/// Default idle deadline for reads.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(60);

/// Default deadline for a single write.
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(10);

/// Connection tuning.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Outbound queue capacity. Must be non-zero.
    pub queue_capacity: usize,
    /// Interval between keepalive pings.
    pub ping_interval: Duration,
    /// Maximum silence on the read side before the connection is dropped.
    pub idle_timeout: Duration,
    /// Deadline for each write (payload, ping or close).
    pub write_timeout: Duration,
}

impl ConnectionConfig {
    /// Config with the given idle deadline and a ping interval of 9/10 of it.
    #[must_use]
    pub fn with_idle_timeout(idle_timeout: Duration) -> Self {
        Self {
            idle_timeout,
            ping_interval: idle_timeout * 9 / 10,
            ..Self::default()
        }
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            ping_interval: DEFAULT_IDLE_TIMEOUT * 9 / 10,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            write_timeout: DEFAULT_WRITE_TIMEOUT,
        }
    }
}

/// Connection lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Both pumps are running.
    Active,
    /// A pump hit a terminal condition; teardown in progress.
    Closing,
    /// Both pumps exited and the transport was released.
    Closed,
}

/// Why a connection ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// The peer closed the session.
    PeerClosed,
    /// A read failed.
    ReadFailed,
    /// Nothing was read within the idle deadline.
    IdleTimeout,
    /// A write failed or missed its deadline.
    WriteFailed,
}

impl CloseReason {
    /// Short label for logs and metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            CloseReason::PeerClosed => "peer_closed",
            CloseReason::ReadFailed => "read_failed",
            CloseReason::IdleTimeout => "idle_timeout",
            CloseReason::WriteFailed => "write_failed",
        }
    }
}

/// What happened over a connection's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionSummary {
    /// Why the connection ended.
    pub reason: CloseReason,
    /// Payload frames read from the client.
    pub frames_received: u64,
    /// Frames that failed to decode and were dropped.
    pub malformed_frames: u64,
    /// Payload bytes read from the client.
    pub bytes_received: u64,
    /// Payloads written to the client.
    pub messages_sent: u64,
    /// Payload bytes written to the client.
    pub bytes_sent: u64,
}

/// Registry-side reference to a connection.
///
/// Holds a weak sender to the outbound queue, so an index entry never keeps
/// a finished connection's queue open.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: ConnectionId,
    identity: Identity,
    document_id: DocumentId,
    sender: mpsc::WeakSender<Bytes>,
}

impl ConnectionHandle {
    /// Create a handle delivering into `sender`'s queue.
    #[must_use]
    pub fn new(
        id: ConnectionId,
        identity: Identity,
        document_id: impl Into<DocumentId>,
        sender: &mpsc::Sender<Bytes>,
    ) -> Self {
        Self {
            id,
            identity,
            document_id: document_id.into(),
            sender: sender.downgrade(),
        }
    }

    /// Connection ID.
    #[must_use]
    pub fn id(&self) -> &ConnectionId {
        &self.id
    }

    /// Identity of the connected user.
    #[must_use]
    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    /// Document whose room this connection belongs to.
    #[must_use]
    pub fn document_id(&self) -> &DocumentId {
        &self.document_id
    }

    /// Hand bytes to the outbound queue without waiting.
    ///
    /// Returns `false` if the payload was dropped because the queue is full
    /// or the connection is gone.
    pub fn enqueue(&self, data: Bytes) -> bool {
        let Some(sender) = self.sender.upgrade() else {
            trace!(connection = %self.id, "Connection gone, dropping payload");
            return false;
        };

        match sender.try_send(data) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                trace!(connection = %self.id, "Outbound queue full, dropping payload");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                trace!(connection = %self.id, "Outbound queue closed, dropping payload");
                false
            }
        }
    }
}

/// A live connection bound to one document room.
pub struct Connection<T: Transport> {
    transport: T,
    handle: ConnectionHandle,
    sender: mpsc::Sender<Bytes>,
    receiver: mpsc::Receiver<Bytes>,
    registry: Arc<RoomRegistry>,
    config: ConnectionConfig,
    state: watch::Sender<ConnectionState>,
}

impl<T: Transport> Connection<T> {
    /// Create a connection for an authenticated, authorized user.
    ///
    /// # Panics
    ///
    /// Panics if `config.queue_capacity` is zero.
    #[must_use]
    pub fn new(
        transport: T,
        identity: Identity,
        document_id: impl Into<DocumentId>,
        registry: Arc<RoomRegistry>,
        config: ConnectionConfig,
    ) -> Self {
        let (sender, receiver) = mpsc::channel(config.queue_capacity);
        let handle = ConnectionHandle::new(ConnectionId::generate(), identity, document_id, &sender);
        let (state, _) = watch::channel(ConnectionState::Active);

        Self {
            transport,
            handle,
            sender,
            receiver,
            registry,
            config,
            state,
        }
    }

    /// Connection ID.
    #[must_use]
    pub fn id(&self) -> &ConnectionId {
        self.handle.id()
    }

    /// The handle the registry indexes this connection by.
    #[must_use]
    pub fn handle(&self) -> &ConnectionHandle {
        &self.handle
    }

    /// Watch lifecycle transitions.
    #[must_use]
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Hand bytes to the outbound queue without waiting.
    pub fn enqueue(&self, data: Bytes) -> bool {
        self.handle.enqueue(data)
    }

    /// Join the room and run both pumps until the connection closes.
    ///
    /// Resolves once both pumps have exited, the connection has left its room
    /// and the transport has been released.
    pub async fn start(self) -> ConnectionSummary {
        let Self {
            transport,
            handle,
            sender,
            receiver,
            registry,
            config,
            state,
        } = self;

        debug!(
            connection = %handle.id(),
            document = %handle.document_id(),
            user = %handle.identity().user_id,
            transport = transport.name(),
            "Connection active"
        );

        let (reader, writer) = transport.split();
        registry.register(handle.clone());

        let outbound_config = config.clone();
        let outbound_id = handle.id().clone();
        let mut outbound = tokio::spawn(async move {
            let mut written = WriteCounts::default();
            let result =
                outbound_pump(writer, receiver, outbound_config, outbound_id, &mut written).await;
            (written, result)
        });
        let mut written = None;
        let mut frames = FrameCounts::default();

        let reason = tokio::select! {
            reason = inbound_pump(reader, &handle, &registry, &config, &mut frames) => reason,
            result = &mut outbound => {
                match result {
                    Ok((counts, result)) => {
                        if let Err(e) = result {
                            warn!(connection = %handle.id(), error = %e, "Write failed");
                        }
                        written = Some(counts);
                    }
                    Err(e) => {
                        warn!(connection = %handle.id(), error = %e, "Outbound pump aborted");
                        written = Some(WriteCounts::default());
                    }
                }
                CloseReason::WriteFailed
            }
        };

        state.send_replace(ConnectionState::Closing);

        // Dropping the only strong sender closes the queue; the outbound pump
        // drains it and sends a close frame.
        drop(sender);
        registry.unregister(&handle);

        let written = match written {
            Some(counts) => counts,
            None => match outbound.await {
                Ok((counts, result)) => {
                    if let Err(e) = result {
                        debug!(connection = %handle.id(), error = %e, "Close frame not sent");
                    }
                    counts
                }
                Err(e) => {
                    warn!(connection = %handle.id(), error = %e, "Outbound pump aborted");
                    WriteCounts::default()
                }
            },
        };

        state.send_replace(ConnectionState::Closed);
        debug!(
            connection = %handle.id(),
            document = %handle.document_id(),
            reason = reason.as_str(),
            "Connection closed"
        );

        ConnectionSummary {
            reason,
            frames_received: frames.received,
            malformed_frames: frames.malformed,
            bytes_received: frames.bytes,
            messages_sent: written.messages,
            bytes_sent: written.bytes,
        }
    }
}

#[derive(Default)]
struct FrameCounts {
    received: u64,
    malformed: u64,
    bytes: u64,
}

/// Payloads the outbound pump handed to the transport. Pings and the close
/// frame are not counted.
#[derive(Default)]
struct WriteCounts {
    messages: u64,
    bytes: u64,
}

async fn inbound_pump<R: TransportReader>(
    mut reader: R,
    handle: &ConnectionHandle,
    registry: &RoomRegistry,
    config: &ConnectionConfig,
    frames: &mut FrameCounts,
) -> CloseReason {
    loop {
        // Every successful read, pongs included, restarts the deadline.
        let incoming = match timeout(config.idle_timeout, reader.recv()).await {
            Err(_) => {
                debug!(connection = %handle.id(), "Idle deadline elapsed");
                return CloseReason::IdleTimeout;
            }
            Ok(Err(e)) => {
                warn!(connection = %handle.id(), error = %e, "Read failed");
                return CloseReason::ReadFailed;
            }
            Ok(Ok(None)) => {
                debug!(connection = %handle.id(), "Peer closed connection");
                return CloseReason::PeerClosed;
            }
            Ok(Ok(Some(incoming))) => incoming,
        };

        match incoming {
            Incoming::Data(data) => {
                frames.received += 1;
                frames.bytes += data.len() as u64;
                match codec::decode(&data) {
                    Ok(Event::Cursor { position, .. }) => registry.route_cursor(handle, position),
                    Ok(event) => {
                        debug!(connection = %handle.id(), kind = %event.kind(), "Ignoring client event");
                    }
                    Err(e) => {
                        frames.malformed += 1;
                        debug!(connection = %handle.id(), error = %e, "Dropping malformed frame");
                    }
                }
            }
            Incoming::Ping | Incoming::Pong => {
                trace!(connection = %handle.id(), "Keepalive received");
            }
        }
    }
}

async fn outbound_pump<W: TransportWriter>(
    mut writer: W,
    mut queue: mpsc::Receiver<Bytes>,
    config: ConnectionConfig,
    id: ConnectionId,
    written: &mut WriteCounts,
) -> Result<(), TransportError> {
    let mut keepalive = interval_at(Instant::now() + config.ping_interval, config.ping_interval);
    keepalive.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            next = queue.recv() => match next {
                Some(data) => {
                    let len = data.len() as u64;
                    with_deadline(config.write_timeout, writer.send(data)).await?;
                    written.messages += 1;
                    written.bytes += len;
                }
                None => {
                    debug!(connection = %id, "Outbound queue closed, sending close frame");
                    return with_deadline(config.write_timeout, writer.close()).await;
                }
            },
            _ = keepalive.tick() => {
                trace!(connection = %id, "Sending keepalive ping");
                with_deadline(config.write_timeout, writer.ping()).await?;
            }
        }
    }
}

async fn with_deadline<F>(limit: Duration, write: F) -> Result<(), TransportError>
where
    F: Future<Output = Result<(), TransportError>>,
{
    timeout(limit, write)
        .await
        .map_err(|_| TransportError::Timeout)?
}
