//! Failure classification, retry with backoff and the reconnection grace wait.

use std::time::Duration;

use tokio::sync::oneshot;
use tracing::debug;

use crate::session::Session;
use crate::transport::{FrameSink, FrameStream, TransportError};

/// What to do about a transport failure.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FailureClass {
    /// Transient: back off and try again, up to the retry limit.
    Retry,
    /// The peer vanished without a close handshake: hold the session for reconnection.
    AbnormalClosure,
    /// Tear the connection down now.
    Terminate,
}

pub fn classify(err: &TransportError) -> FailureClass {
    match err {
        TransportError::Timeout | TransportError::ServerBusy => FailureClass::Retry,
        TransportError::AbnormalClosure => FailureClass::AbnormalClosure,
        TransportError::NormalClosure
        | TransportError::Protocol(_)
        | TransportError::UnsupportedData
        | TransportError::Other(_) => FailureClass::Terminate,
    }
}

/// Retry ceiling with linear backoff.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub limit: u32,
    pub backoff: Duration,
}

impl RetryPolicy {
    pub fn new(limit: u32, backoff: Duration) -> Self {
        Self { limit, backoff }
    }

    /// Sleep before retry number `attempt` (1-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        self.backoff.saturating_mul(attempt)
    }

    /// Whether retry number `attempt` (1-based) is still allowed.
    pub fn allows(&self, attempt: u32) -> bool {
        attempt <= self.limit
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(2, Duration::from_secs(1))
    }
}

/// Writes one frame, retrying transient failures per `policy`.
///
/// Abnormal closures and terminal errors are returned immediately; a transient error is
/// returned once the retry limit is spent.
pub async fn write_with_retry(
    sink: &mut dyn FrameSink,
    text: &str,
    policy: &RetryPolicy,
) -> Result<(), TransportError> {
    let mut attempt = 0;
    loop {
        match sink.send_text(text.to_owned()).await {
            Ok(()) => return Ok(()),
            Err(err) if classify(&err) == FailureClass::Retry && policy.allows(attempt + 1) => {
                attempt += 1;
                let delay = policy.delay(attempt);
                debug!(%err, attempt, ?delay, "write failed, retrying");
                tokio::time::sleep(delay).await;
            }
            Err(err) => return Err(err),
        }
    }
}

/// How a grace-period wait ended.
pub enum GraceOutcome {
    /// The client came back; here is its new read half.
    Resumed(Box<dyn FrameStream>),
    /// Nobody came back in time.
    Expired,
    /// The session was closed from elsewhere (reaped) during the wait.
    Closed,
}

/// Races the grace timer against the session's reconnection gate.
pub async fn await_reconnection(
    session: &Session,
    mut gate: oneshot::Receiver<Box<dyn FrameStream>>,
    grace: Duration,
) -> GraceOutcome {
    tokio::select! {
        resumed = &mut gate => match resumed {
            Ok(stream) => GraceOutcome::Resumed(stream),
            Err(_) => GraceOutcome::Closed,
        },
        () = tokio::time::sleep(grace) => {
            if session.expire_grace() {
                return GraceOutcome::Expired;
            }
            // A reconnection claimed the gate just as the timer fired; let it finish.
            match gate.await {
                Ok(stream) => GraceOutcome::Resumed(stream),
                Err(_) => GraceOutcome::Closed,
            }
        }
    }
}
