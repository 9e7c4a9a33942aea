//! Session registry and the cross-session relay.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use broadside_protocol::{Envelope, GameId, SessionId};
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::matches::MatchRegistry;
use crate::resilience::RetryPolicy;
use crate::session::{Relayed, SendError, Session};
use crate::transport::FrameSink;

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("session {0} not found")]
    SessionNotFound(SessionId),

    #[error("match {0} not found")]
    MatchNotFound(GameId),
}

#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("receiver {0} is gone")]
    ReceiverGone(SessionId),

    /// The receiver plays a different match than the message targets.
    #[error("receiver {receiver} is bound to {found:?}, not {expected}")]
    MatchMismatch {
        receiver: SessionId,
        expected: GameId,
        found: Option<GameId>,
    },
}

enum Slot {
    Live(Arc<Session>),
    /// Left behind by a terminated session; cleared by the next lookup or sweep.
    Tombstone,
}

pub struct SessionRegistry {
    sessions: RwLock<HashMap<SessionId, Slot>>,
    matches: Arc<MatchRegistry>,
    policy: RetryPolicy,
}

impl SessionRegistry {
    pub fn new(matches: Arc<MatchRegistry>, policy: RetryPolicy) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            matches,
            policy,
        }
    }

    /// Mints an identifier and stores a session writing to `sink`.
    ///
    /// Also starts the session's relay worker, which lives until the session closes.
    pub async fn register(&self, sink: Box<dyn FrameSink>) -> Arc<Session> {
        let id = SessionId::new(Uuid::new_v4().simple().to_string());
        let session = Arc::new(Session::new(id.clone(), sink, self.policy));
        if let Some(queue) = session.take_relay_queue() {
            tokio::spawn(run_relay(session.clone(), queue));
        }
        self.sessions
            .write()
            .await
            .insert(id.clone(), Slot::Live(session.clone()));
        info!(session = %id, "session registered");
        session
    }

    pub async fn find(&self, id: &SessionId) -> Result<Arc<Session>, RegistryError> {
        let mut sessions = self.sessions.write().await;
        match sessions.get(id) {
            Some(Slot::Live(session)) => Ok(session.clone()),
            Some(Slot::Tombstone) => {
                sessions.remove(id);
                Err(RegistryError::SessionNotFound(id.clone()))
            }
            None => Err(RegistryError::SessionNotFound(id.clone())),
        }
    }

    /// Sessions currently registered, tombstones excluded.
    pub async fn live_count(&self) -> usize {
        self.sessions
            .read()
            .await
            .values()
            .filter(|slot| matches!(slot, Slot::Live(_)))
            .count()
    }

    /// Removes a session, closes it and releases its match slot.
    ///
    /// Returns `None` when the session was already gone (terminated or swept).
    pub async fn terminate(&self, id: &SessionId) -> Option<Arc<Session>> {
        let session = {
            let mut sessions = self.sessions.write().await;
            let Some(Slot::Live(session)) = sessions.get(id) else {
                return None;
            };
            let session = session.clone();
            sessions.insert(id.clone(), Slot::Tombstone);
            session
        };
        self.retire(&session).await;
        info!(session = %id, "session terminated");
        Some(session)
    }

    async fn retire(&self, session: &Session) {
        session.close();
        let Some(binding) = session.binding() else {
            return;
        };
        if let Err(err) = self
            .matches
            .release_player(&binding.game_id, binding.role)
            .await
        {
            debug!(session = %session.id(), %err, "match already gone at release");
        }
    }

    /// Reaps sessions older than `max_age`, whatever their state, and clears tombstones.
    pub async fn cleanup_sweep(&self, max_age: Duration) -> usize {
        let expired: Vec<Arc<Session>> = {
            let mut sessions = self.sessions.write().await;
            let mut expired = Vec::new();
            sessions.retain(|_, slot| match slot {
                Slot::Live(session) if session.age() >= max_age => {
                    expired.push(session.clone());
                    false
                }
                Slot::Live(_) => true,
                Slot::Tombstone => false,
            });
            expired
        };

        for session in &expired {
            self.retire(session).await;
        }
        if !expired.is_empty() {
            info!(reaped = expired.len(), "cleanup sweep finished");
        }
        expired.len()
    }

    /// Queues `envelope` for `receiver` on behalf of `sender` and returns at once.
    ///
    /// The registry lock covers only the lookup. The receiver's relay worker writes the
    /// frame; if the receiver's connection dropped, the worker holds it through the grace
    /// period and re-sends it once the client reconnects.
    pub async fn communicate(
        &self,
        sender: &SessionId,
        receiver: &SessionId,
        game: &GameId,
        envelope: &Envelope,
    ) -> Result<(), RelayError> {
        let target = self
            .find(receiver)
            .await
            .map_err(|_| RelayError::ReceiverGone(receiver.clone()))?;

        let bound = target.binding().map(|binding| binding.game_id);
        if bound.as_ref() != Some(game) {
            return Err(RelayError::MatchMismatch {
                receiver: receiver.clone(),
                expected: game.clone(),
                found: bound,
            });
        }

        if !target.enqueue(Relayed::Durable(envelope.clone())) {
            return Err(RelayError::ReceiverGone(receiver.clone()));
        }
        debug!(%sender, %receiver, code = ?envelope.code, "relay queued");
        Ok(())
    }

    /// Queues a notice that is dropped rather than held if the receiver's link is down.
    pub async fn notify(&self, receiver: &SessionId, envelope: &Envelope) {
        let delivered = match self.find(receiver).await {
            Ok(target) => target.enqueue(Relayed::Notice(envelope.clone())),
            Err(_) => false,
        };
        if !delivered {
            debug!(session = %receiver, code = ?envelope.code, "notice dropped");
        }
    }
}

/// Drains one session's relay queue in order until the session closes.
async fn run_relay(session: Arc<Session>, mut queue: mpsc::UnboundedReceiver<Relayed>) {
    loop {
        let frame = tokio::select! {
            frame = queue.recv() => frame,
            () = session.closed() => None,
        };
        let Some(frame) = frame else {
            break;
        };
        if !write_relayed(&session, frame).await {
            break;
        }
    }
    debug!(session = %session.id(), "relay worker stopped");
}

/// Writes one queued frame. `false` once the session is closed.
async fn write_relayed(session: &Session, frame: Relayed) -> bool {
    let (envelope, durable) = match frame {
        Relayed::Durable(envelope) => (envelope, true),
        Relayed::Notice(envelope) => (envelope, false),
    };
    loop {
        match session.send(&envelope).await {
            Ok(()) => return true,
            Err(SendError::Broken { generation }) => {
                session.report_broken(generation);
                if !durable {
                    debug!(session = %session.id(), code = ?envelope.code, "link down, notice dropped");
                    return true;
                }
                debug!(
                    session = %session.id(), code = ?envelope.code,
                    "connection lost, holding relayed frame for reconnection"
                );
                if !session.await_relink(generation).await {
                    return false;
                }
            }
            Err(SendError::Closed) => return false,
            Err(err) => {
                warn!(session = %session.id(), %err, code = ?envelope.code, "relayed frame not delivered");
                return true;
            }
        }
    }
}
