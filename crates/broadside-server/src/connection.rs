//! Per-connection task: read, decode, dispatch, deliver; ride out dropped connections.

use std::sync::Arc;

use broadside_protocol::{decode_request, Envelope, MessageCode, SessionId};
use tracing::{debug, error, info, warn};

use crate::handler::{self, Replies};
use crate::resilience::{await_reconnection, classify, FailureClass, GraceOutcome};
use crate::server::ServerContext;
use crate::session::{LinkStatus, SendError, Session};
use crate::sessions::RelayError;
use crate::transport::{FrameStream, TransportError};

/// Why a session's task ended.
#[derive(Debug)]
pub enum Exit {
    /// The client closed the connection or sent something unusable.
    Terminated(TransportError),
    /// Transient failures outlasted the retry limit.
    RetriesExhausted(TransportError),
    /// The client vanished and did not come back in time.
    GraceExpired,
    /// The session was closed from outside (cleanup sweep).
    Reaped,
    /// A relay found the session/match relationship corrupted.
    Fatal,
}

enum Flow {
    Continue,
    /// The client's transport is gone; frames in the backlog await a reconnection.
    Broken,
    Exit(Exit),
}

/// Drives one session until it ends, then tears it down.
pub async fn drive(ctx: Arc<ServerContext>, session: Arc<Session>, stream: Box<dyn FrameStream>) {
    info!(session = %session.id(), "connection task started");
    let mut driver = Driver {
        ctx,
        session,
        stream,
        read_failures: 0,
        backlog: Vec::new(),
    };
    let exit = driver.run().await;
    driver.teardown(exit).await;
}

struct Driver {
    ctx: Arc<ServerContext>,
    session: Arc<Session>,
    stream: Box<dyn FrameStream>,
    read_failures: u32,
    /// Own replies not yet written because the transport dropped.
    backlog: Vec<Envelope>,
}

impl Driver {
    async fn run(&mut self) -> Exit {
        let read_timeout = self.ctx.config.read_timeout();
        loop {
            let read = tokio::select! {
                read = tokio::time::timeout(read_timeout, self.stream.recv_text()) => {
                    read.unwrap_or(Err(TransportError::Timeout))
                }
                status = self.session.severed() => match status {
                    LinkStatus::Closed => return Exit::Reaped,
                    _ => Err(TransportError::AbnormalClosure),
                },
            };

            let mut flow = match read {
                Ok(text) => {
                    self.read_failures = 0;
                    self.process(&text).await
                }
                Err(err) => self.read_failed(err).await,
            };

            loop {
                match flow {
                    Flow::Continue => break,
                    Flow::Exit(exit) => return exit,
                    Flow::Broken => {
                        if let Err(exit) = self.ride_out_grace().await {
                            return exit;
                        }
                        flow = self.flush_backlog().await;
                    }
                }
            }
        }
    }

    async fn read_failed(&mut self, err: TransportError) -> Flow {
        match classify(&err) {
            FailureClass::Retry => {
                self.read_failures += 1;
                let policy = self.ctx.config.retry_policy();
                if !policy.allows(self.read_failures) {
                    return Flow::Exit(Exit::RetriesExhausted(err));
                }
                let delay = policy.delay(self.read_failures);
                debug!(session = %self.session.id(), %err, attempt = self.read_failures, ?delay, "read failed, retrying");
                tokio::time::sleep(delay).await;
                Flow::Continue
            }
            FailureClass::AbnormalClosure => Flow::Broken,
            FailureClass::Terminate => Flow::Exit(Exit::Terminated(err)),
        }
    }

    async fn process(&mut self, text: &str) -> Flow {
        let request = match decode_request(text) {
            Ok(request) => request,
            Err(err) => {
                debug!(session = %self.session.id(), %err, "undecodable frame");
                self.backlog.push(err.to_envelope());
                return self.flush_backlog().await;
            }
        };
        let replies = handler::handle(&self.ctx, &self.session, request).await;
        self.deliver(replies).await
    }

    /// Own replies first, then the opponent's. Frames for the opponent are only queued, so
    /// an opponent in its grace period never holds up this session. A dropped own
    /// transport does not stop them either.
    async fn deliver(&mut self, replies: Replies) -> Flow {
        self.backlog.extend(replies.own);
        let own = self.flush_backlog().await;

        for delivery in replies.peer {
            let relayed = self
                .ctx
                .sessions
                .communicate(
                    self.session.id(),
                    &delivery.to,
                    &delivery.game_id,
                    &delivery.envelope,
                )
                .await;
            match relayed {
                Ok(()) => {}
                Err(err @ RelayError::MatchMismatch { .. }) => {
                    error!(session = %self.session.id(), %err, "relay target bound to another match");
                    return Flow::Exit(Exit::Fatal);
                }
                Err(err) => {
                    warn!(session = %self.session.id(), peer = %delivery.to, %err, "relay failed");
                }
            }
        }
        own
    }

    async fn flush_backlog(&mut self) -> Flow {
        while let Some(envelope) = self.backlog.first() {
            match self.session.send(envelope).await {
                Ok(()) => {
                    self.backlog.remove(0);
                }
                Err(SendError::Broken { .. }) => return Flow::Broken,
                Err(SendError::Failed(err)) => {
                    return match classify(&err) {
                        FailureClass::Retry => Flow::Exit(Exit::RetriesExhausted(err)),
                        _ => Flow::Exit(Exit::Terminated(err)),
                    }
                }
                Err(SendError::Closed) => return Flow::Exit(Exit::Reaped),
                Err(err @ SendError::Encode(_)) => {
                    error!(session = %self.session.id(), %err, "dropping unencodable frame");
                    self.backlog.remove(0);
                }
            }
        }
        Flow::Continue
    }

    /// Holds the session for a reconnection. `Ok` once a new transport is in place.
    async fn ride_out_grace(&mut self) -> Result<(), Exit> {
        let Some(gate) = self.session.enter_grace() else {
            return Err(Exit::Reaped);
        };
        let grace = self.ctx.config.grace_period();
        info!(session = %self.session.id(), ?grace, "connection lost, holding session for reconnection");
        notify_peer(&self.ctx, &self.session, MessageCode::PeerGracePeriod).await;

        match await_reconnection(&self.session, gate, grace).await {
            GraceOutcome::Resumed(stream) => {
                self.stream = stream;
                self.read_failures = 0;
                info!(session = %self.session.id(), "client reconnected within grace period");
                notify_peer(&self.ctx, &self.session, MessageCode::PeerReconnected).await;
                Ok(())
            }
            GraceOutcome::Expired => {
                info!(session = %self.session.id(), "grace period expired");
                Err(Exit::GraceExpired)
            }
            GraceOutcome::Closed => Err(Exit::Reaped),
        }
    }

    async fn teardown(self, exit: Exit) {
        let id = self.session.id().clone();
        match &exit {
            Exit::Fatal => error!(session = %id, "session torn down after relay invariant violation"),
            exit => info!(session = %id, ?exit, "session ending"),
        }

        let peer = peer_of(&self.ctx, &self.session).await;
        self.ctx.sessions.terminate(&id).await;
        if !matches!(exit, Exit::GraceExpired) {
            self.session.shutdown_transport().await;
        }
        if let Some(peer) = peer {
            self.ctx
                .sessions
                .notify(&peer, &Envelope::signal(MessageCode::PeerDisconnected))
                .await;
        }
    }
}

/// The opponent's session, if `session` plays a match with one still in it.
async fn peer_of(ctx: &ServerContext, session: &Session) -> Option<SessionId> {
    let binding = session.binding()?;
    let game = ctx.matches.find(&binding.game_id).await.ok()?;
    let game = game.lock();
    game.peer_session(binding.role).cloned()
}

async fn notify_peer(ctx: &ServerContext, session: &Session, code: MessageCode) {
    if let Some(peer) = peer_of(ctx, session).await {
        ctx.sessions.notify(&peer, &Envelope::signal(code)).await;
    }
}
