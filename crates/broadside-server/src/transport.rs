//! Transport seam between sessions and the socket.
//!
//! Sessions only ever see boxed [`FrameSink`] / [`FrameStream`] halves, so the WebSocket
//! adapter in [`crate::ws`] and the in-process [`channel`] transport are interchangeable.

use async_trait::async_trait;

/// Transport failures, later sorted into retry classes by [`crate::resilience::classify`].
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("operation timed out")]
    Timeout,

    #[error("peer is busy")]
    ServerBusy,

    #[error("connection dropped without a close handshake")]
    AbnormalClosure,

    #[error("connection closed normally")]
    NormalClosure,

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("unsupported frame type")]
    UnsupportedData,

    #[error("transport error: {0}")]
    Other(String),
}

/// Write half of a client connection.
#[async_trait]
pub trait FrameSink: Send {
    async fn send_text(&mut self, text: String) -> Result<(), TransportError>;

    /// Starts a close handshake. Best effort.
    async fn close(&mut self) -> Result<(), TransportError>;
}

/// Read half of a client connection.
#[async_trait]
pub trait FrameStream: Send {
    /// Next text frame. The stream ending is reported as an error, never as `None`.
    async fn recv_text(&mut self) -> Result<String, TransportError>;
}

/// An established client connection split into its halves.
pub struct Connection {
    pub sink: Box<dyn FrameSink>,
    pub stream: Box<dyn FrameStream>,
}

impl Connection {
    pub fn new(sink: Box<dyn FrameSink>, stream: Box<dyn FrameStream>) -> Self {
        Self { sink, stream }
    }
}

/// In-process transport used by tests and local tooling.
///
/// [`pair`] returns the server-side [`Connection`] and a [`Remote`] playing the client.
/// Dropping the remote looks to the server like a socket that vanished.
pub mod channel {
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex, PoisonError};
    use std::time::Duration;

    use async_trait::async_trait;
    use broadside_protocol::{decode_envelope, Envelope};
    use tokio::sync::mpsc;

    use super::{Connection, FrameSink, FrameStream, TransportError};

    type Faults = Arc<Mutex<VecDeque<TransportError>>>;

    pub fn pair() -> (Connection, Remote) {
        let (to_server, from_client) = mpsc::unbounded_channel();
        let (to_client, from_server) = mpsc::unbounded_channel();
        let faults = Faults::default();

        let connection = Connection::new(
            Box::new(ChannelSink {
                outbox: to_client,
                faults: faults.clone(),
            }),
            Box::new(ChannelStream { inbox: from_client }),
        );
        let remote = Remote {
            outbox: to_server,
            inbox: from_server,
            faults,
        };
        (connection, remote)
    }

    struct ChannelSink {
        outbox: mpsc::UnboundedSender<String>,
        faults: Faults,
    }

    #[async_trait]
    impl FrameSink for ChannelSink {
        async fn send_text(&mut self, text: String) -> Result<(), TransportError> {
            let fault = self
                .faults
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .pop_front();
            if let Some(fault) = fault {
                return Err(fault);
            }
            self.outbox
                .send(text)
                .map_err(|_| TransportError::AbnormalClosure)
        }

        async fn close(&mut self) -> Result<(), TransportError> {
            Ok(())
        }
    }

    struct ChannelStream {
        inbox: mpsc::UnboundedReceiver<Result<String, TransportError>>,
    }

    #[async_trait]
    impl FrameStream for ChannelStream {
        async fn recv_text(&mut self) -> Result<String, TransportError> {
            match self.inbox.recv().await {
                Some(frame) => frame,
                None => Err(TransportError::AbnormalClosure),
            }
        }
    }

    /// Client end of an in-process connection.
    pub struct Remote {
        outbox: mpsc::UnboundedSender<Result<String, TransportError>>,
        inbox: mpsc::UnboundedReceiver<String>,
        faults: Faults,
    }

    impl Remote {
        /// Sends one raw text frame to the server.
        pub fn send_text(&self, text: impl Into<String>) {
            let _ = self.outbox.send(Ok(text.into()));
        }

        /// Sends a JSON value as a text frame.
        pub fn send_json(&self, value: &serde_json::Value) {
            self.send_text(value.to_string());
        }

        /// Makes the server's next read fail with `err`.
        pub fn fail_read(&self, err: TransportError) {
            let _ = self.outbox.send(Err(err));
        }

        /// Makes the server's next write to this client fail with `err`.
        pub fn fail_next_write(&self, err: TransportError) {
            self.faults
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push_back(err);
        }

        pub async fn recv_text(&mut self) -> Option<String> {
            self.inbox.recv().await
        }

        /// Next frame decoded as an envelope, `None` once the server hung up.
        pub async fn recv(&mut self) -> Option<Envelope> {
            let text = self.inbox.recv().await?;
            decode_envelope(&text).ok()
        }

        /// Like [`Remote::recv`], giving up after `wait`.
        pub async fn recv_within(&mut self, wait: Duration) -> Option<Envelope> {
            tokio::time::timeout(wait, self.recv()).await.ok().flatten()
        }

        /// Frames already delivered, without waiting.
        pub fn drain(&mut self) -> Vec<Envelope> {
            let mut frames = Vec::new();
            while let Ok(text) = self.inbox.try_recv() {
                if let Ok(envelope) = decode_envelope(&text) {
                    frames.push(envelope);
                }
            }
            frames
        }
    }

}
