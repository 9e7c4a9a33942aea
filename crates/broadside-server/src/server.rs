//! Shared server state, connection admission and the TCP listener.

use std::future::Future;
use std::sync::Arc;

use broadside_protocol::{Envelope, MessageCode, SessionId};
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

use crate::config::ServerConfig;
use crate::connection;
use crate::matches::MatchRegistry;
use crate::sessions::SessionRegistry;
use crate::transport::Connection;
use crate::usage::{LoggingUsageCounter, UsageCounter};
use crate::ws;

/// Registries and collaborators shared by every connection task.
pub struct ServerContext {
    pub config: ServerConfig,
    pub sessions: Arc<SessionRegistry>,
    pub matches: Arc<MatchRegistry>,
    pub usage: Arc<dyn UsageCounter>,
}

/// What became of an accepted connection.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Admission {
    /// A new session, announced to the client with `session-id-issued`.
    Fresh(SessionId),
    /// An existing session in its grace period took over the connection.
    Resumed(SessionId),
}

impl Admission {
    pub fn session_id(&self) -> &SessionId {
        match self {
            Admission::Fresh(id) | Admission::Resumed(id) => id,
        }
    }
}

impl ServerContext {
    pub fn new(config: ServerConfig) -> Self {
        Self::with_usage(config, Arc::new(LoggingUsageCounter::new()))
    }

    pub fn with_usage(config: ServerConfig, usage: Arc<dyn UsageCounter>) -> Self {
        let matches = Arc::new(MatchRegistry::new());
        let sessions = Arc::new(SessionRegistry::new(matches.clone(), config.retry_policy()));
        Self {
            config,
            sessions,
            matches,
            usage,
        }
    }

    /// Attaches an upgraded connection to a session.
    ///
    /// A `requested` session id resumes that session if it is waiting out a grace period.
    /// Any other id earns `invalid-session-id` followed by a fresh session.
    pub async fn accept(
        self: &Arc<Self>,
        connection: Connection,
        requested: Option<SessionId>,
    ) -> Admission {
        let mut connection = connection;
        let mut rejected = false;

        if let Some(id) = requested {
            match self.sessions.find(&id).await {
                Ok(session) => match session.resume(connection).await {
                    Ok(()) => {
                        info!(session = %id, "session resumed");
                        return Admission::Resumed(id);
                    }
                    Err(returned) => {
                        debug!(session = %id, "session is not awaiting reconnection");
                        connection = returned;
                    }
                },
                Err(err) => debug!(%err, "resume requested for unknown session"),
            }
            rejected = true;
        }

        let Connection { sink, stream } = connection;
        let session = self.sessions.register(sink).await;
        let id = session.id().clone();

        let mut greeting = Vec::with_capacity(2);
        if rejected {
            greeting.push(Envelope::signal(MessageCode::InvalidSessionId));
        }
        match Envelope::session_issued(&id) {
            Ok(issued) => greeting.push(issued),
            Err(err) => warn!(session = %id, %err, "failed to encode session id"),
        }
        for envelope in &greeting {
            if let Err(err) = session.send(envelope).await {
                // The connection task will see the same failure on its first read.
                debug!(session = %id, %err, "greeting not delivered");
                break;
            }
        }

        tokio::spawn(connection::drive(self.clone(), session, stream));
        Admission::Fresh(id)
    }

    /// Periodically reaps sessions older than the cleanup interval.
    pub async fn run_cleanup(self: Arc<Self>) {
        let period = self.config.cleanup_interval();
        let mut ticker = tokio::time::interval(period);
        // The first tick completes immediately.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let reaped = self.sessions.cleanup_sweep(period).await;
            debug!(reaped, "cleanup sweep ran");
        }
    }
}

/// Accepts WebSocket clients on `listener` until `shutdown` resolves.
pub async fn serve(
    ctx: Arc<ServerContext>,
    listener: TcpListener,
    shutdown: impl Future<Output = ()>,
) {
    let cleanup = tokio::spawn(ctx.clone().run_cleanup());
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, addr) = match accepted {
                    Ok(accepted) => accepted,
                    Err(err) => {
                        error!(%err, "accept failed");
                        continue;
                    }
                };

                let live = ctx.sessions.live_count().await;
                if live >= ctx.config.max_connections {
                    warn!(%addr, live, "connection limit reached, rejecting");
                    continue;
                }

                let ctx = ctx.clone();
                tokio::spawn(async move {
                    match ws::accept(stream).await {
                        Ok((connection, requested)) => {
                            let admission = ctx.accept(connection, requested).await;
                            info!(%addr, ?admission, "client connected");
                        }
                        Err(err) => warn!(%addr, %err, "websocket handshake failed"),
                    }
                });
            }
            () = &mut shutdown => {
                info!("shutdown signal received");
                break;
            }
        }
    }

    cleanup.abort();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::channel;
    use std::time::Duration;

    const WAIT: Duration = Duration::from_secs(2);

    #[tokio::test]
    async fn fresh_connection_gets_a_session_id() {
        let ctx = Arc::new(ServerContext::new(ServerConfig::default()));
        let (connection, mut remote) = channel::pair();

        let admission = ctx.accept(connection, None).await;
        let Admission::Fresh(id) = admission else {
            panic!("expected a fresh session");
        };
        let issued = remote.recv_within(WAIT).await.unwrap();
        assert_eq!(issued.code, MessageCode::SessionIdIssued);
        let payload: broadside_protocol::SessionIssued = issued.payload_as().unwrap();
        assert_eq!(payload.session_id, id);
    }

    #[tokio::test]
    async fn unknown_session_id_is_replaced() {
        let ctx = Arc::new(ServerContext::new(ServerConfig::default()));
        let (connection, mut remote) = channel::pair();

        let admission = ctx
            .accept(connection, Some(SessionId::from("stale")))
            .await;
        assert!(matches!(admission, Admission::Fresh(_)));
        assert_ne!(admission.session_id(), &SessionId::from("stale"));
        assert_eq!(
            remote.recv_within(WAIT).await.unwrap().code,
            MessageCode::InvalidSessionId
        );
        assert_eq!(
            remote.recv_within(WAIT).await.unwrap().code,
            MessageCode::SessionIdIssued
        );
    }

    #[tokio::test]
    async fn live_session_cannot_be_taken_over() {
        let ctx = Arc::new(ServerContext::new(ServerConfig::default()));
        let (first, _remote) = channel::pair();
        let original = ctx.accept(first, None).await;

        let (second, mut remote) = channel::pair();
        let admission = ctx
            .accept(second, Some(original.session_id().clone()))
            .await;
        assert_ne!(admission.session_id(), original.session_id());
        assert_eq!(
            remote.recv_within(WAIT).await.unwrap().code,
            MessageCode::InvalidSessionId
        );
    }
}
