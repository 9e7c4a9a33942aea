//! One client's identity, write path and reconnection gate.

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use broadside_core::Role;
use broadside_protocol::{encode_envelope, Envelope, GameId, PlayerId, SessionId, WireError};
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, warn};

use crate::resilience::{classify, write_with_retry, FailureClass, RetryPolicy};
use crate::transport::{Connection, FrameSink, FrameStream, TransportError};

/// The match slot a session plays.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MatchBinding {
    pub game_id: GameId,
    pub player_id: PlayerId,
    pub role: Role,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LinkStatus {
    Live,
    /// A writer saw the socket die; the owning task has not reacted yet.
    Broken,
    /// Held open for the client to reconnect.
    Grace,
    Closed,
}

/// Transport state observed by everything waiting on this session.
///
/// `generation` counts transports: it goes up each time a reconnection swaps the sink in.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Link {
    pub generation: u64,
    pub status: LinkStatus,
}

/// A frame another session queued for this client.
#[derive(Clone, Debug, PartialEq)]
pub enum Relayed {
    /// Held across a dropped connection and re-sent once the client is back.
    Durable(Envelope),
    /// Delivered only if the link is up when its turn comes.
    Notice(Envelope),
}

#[derive(Debug, thiserror::Error)]
pub enum SendError {
    #[error(transparent)]
    Encode(#[from] WireError),

    /// The transport of `generation` vanished; the frame may be re-sent after a reconnection.
    #[error("connection lost (transport generation {generation})")]
    Broken { generation: u64 },

    #[error("write failed: {0}")]
    Failed(TransportError),

    #[error("session is closed")]
    Closed,
}

pub struct Session {
    id: SessionId,
    created_at: Instant,
    policy: RetryPolicy,
    /// The only write entry point: every frame for this client goes through this lock.
    sink: tokio::sync::Mutex<Box<dyn FrameSink>>,
    binding: Mutex<Option<MatchBinding>>,
    link: watch::Sender<Link>,
    /// Armed while a grace wait is running; taken by the reconnection that ends it.
    gate: Mutex<Option<oneshot::Sender<Box<dyn FrameStream>>>>,
    /// Frames from the opponent, drained in order by the session's relay worker.
    relay: mpsc::UnboundedSender<Relayed>,
    relay_queue: Mutex<Option<mpsc::UnboundedReceiver<Relayed>>>,
}

fn guard<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Session {
    pub fn new(id: SessionId, sink: Box<dyn FrameSink>, policy: RetryPolicy) -> Self {
        let (link, _) = watch::channel(Link {
            generation: 0,
            status: LinkStatus::Live,
        });
        let (relay, relay_queue) = mpsc::unbounded_channel();
        Self {
            id,
            created_at: Instant::now(),
            policy,
            sink: tokio::sync::Mutex::new(sink),
            binding: Mutex::new(None),
            link,
            gate: Mutex::new(None),
            relay,
            relay_queue: Mutex::new(Some(relay_queue)),
        }
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    pub fn link(&self) -> Link {
        *self.link.borrow()
    }

    pub fn binding(&self) -> Option<MatchBinding> {
        guard(&self.binding).clone()
    }

    pub fn bind(&self, binding: MatchBinding) {
        *guard(&self.binding) = Some(binding);
    }

    /// Encodes and writes one frame, retrying transient failures.
    pub async fn send(&self, envelope: &Envelope) -> Result<(), SendError> {
        let text = encode_envelope(envelope)?;
        let mut sink = self.sink.lock().await;

        // Read under the sink lock so the generation matches the sink in hand.
        let link = self.link();
        match link.status {
            LinkStatus::Live => {}
            LinkStatus::Broken | LinkStatus::Grace => {
                return Err(SendError::Broken {
                    generation: link.generation,
                })
            }
            LinkStatus::Closed => return Err(SendError::Closed),
        }

        write_with_retry(sink.as_mut(), &text, &self.policy)
            .await
            .map_err(|err| match classify(&err) {
                FailureClass::AbnormalClosure => SendError::Broken {
                    generation: link.generation,
                },
                _ => SendError::Failed(err),
            })
    }

    /// Queues a frame for the relay worker. `false` once the worker has stopped.
    pub fn enqueue(&self, frame: Relayed) -> bool {
        self.relay.send(frame).is_ok()
    }

    /// Hands out the relay queue; only the first caller gets it.
    pub fn take_relay_queue(&self) -> Option<mpsc::UnboundedReceiver<Relayed>> {
        guard(&self.relay_queue).take()
    }

    /// Flags the transport of `generation` as dead so the owning task starts a grace wait.
    pub fn report_broken(&self, generation: u64) {
        self.link.send_if_modified(|link| {
            if link.generation == generation && link.status == LinkStatus::Live {
                link.status = LinkStatus::Broken;
                true
            } else {
                false
            }
        });
    }

    /// Resolves once another task reports the transport broken or the session is closed.
    pub async fn severed(&self) -> LinkStatus {
        let mut link = self.link.subscribe();
        let result = link
            .wait_for(|link| matches!(link.status, LinkStatus::Broken | LinkStatus::Closed))
            .await;
        match result {
            Ok(link) => link.status,
            Err(_) => LinkStatus::Closed,
        }
    }

    pub async fn closed(&self) {
        let mut link = self.link.subscribe();
        let _ = link
            .wait_for(|link| link.status == LinkStatus::Closed)
            .await;
    }

    /// Waits until the transport of `generation` is replaced. `false` if the session closed.
    pub async fn await_relink(&self, generation: u64) -> bool {
        let mut link = self.link.subscribe();
        let result = link
            .wait_for(|link| link.generation > generation || link.status == LinkStatus::Closed)
            .await;
        matches!(result, Ok(link) if link.status != LinkStatus::Closed)
    }

    /// Arms a fresh reconnection gate and moves the link into the grace state.
    ///
    /// Returns `None` when a wait is already armed or the session is closed.
    pub fn enter_grace(&self) -> Option<oneshot::Receiver<Box<dyn FrameStream>>> {
        let mut gate = guard(&self.gate);
        if gate.is_some() || self.link().status == LinkStatus::Closed {
            return None;
        }
        let (tx, rx) = oneshot::channel();
        *gate = Some(tx);
        self.link.send_modify(|link| link.status = LinkStatus::Grace);
        Some(rx)
    }

    /// Ends a grace wait that timed out. `false` if a reconnection already claimed the gate.
    pub fn expire_grace(&self) -> bool {
        let mut gate = guard(&self.gate);
        if gate.take().is_none() {
            return false;
        }
        self.link.send_modify(|link| link.status = LinkStatus::Closed);
        true
    }

    /// Hands a new connection to the task waiting out this session's grace period.
    ///
    /// The new sink replaces the old one, the client is re-sent its session id, and every
    /// waiter sees the generation advance. Returns the connection untouched when the
    /// session is not waiting for a reconnection.
    pub async fn resume(&self, connection: Connection) -> Result<(), Connection> {
        let Some(gate) = guard(&self.gate).take() else {
            return Err(connection);
        };
        let Connection { sink, stream } = connection;

        let mut current = self.sink.lock().await;
        if let Err(stream) = gate.send(stream) {
            warn!(session = %self.id, "grace wait vanished before reconnection completed");
            return Err(Connection::new(sink, stream));
        }
        *current = sink;

        let ack = Envelope::session_issued(&self.id).and_then(|ack| encode_envelope(&ack));
        match ack {
            Ok(text) => {
                if let Err(err) = write_with_retry(current.as_mut(), &text, &self.policy).await {
                    debug!(session = %self.id, %err, "failed to acknowledge resumed session");
                }
            }
            Err(err) => warn!(session = %self.id, %err, "failed to encode session id"),
        }

        self.link.send_modify(|link| {
            link.generation += 1;
            link.status = LinkStatus::Live;
        });
        Ok(())
    }

    /// Marks the session closed, waking every waiter. Idempotent.
    pub fn close(&self) {
        guard(&self.gate).take();
        self.link.send_if_modified(|link| {
            let changed = link.status != LinkStatus::Closed;
            link.status = LinkStatus::Closed;
            changed
        });
    }

    /// Best-effort close handshake on the current transport.
    pub async fn shutdown_transport(&self) {
        let mut sink = self.sink.lock().await;
        if let Err(err) = sink.close().await {
            debug!(session = %self.id, %err, "close handshake failed");
        }
    }
}
