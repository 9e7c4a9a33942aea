//! Broadside match server
//!
//! Two clients per match over WebSocket. Each connection gets a session driven by its own
//! task; a session that drops without a close handshake is held for a grace period so the
//! client can resume it, while the opponent is told what is going on.

pub mod config;
pub mod connection;
pub mod handler;
pub mod matches;
pub mod resilience;
pub mod server;
pub mod session;
pub mod sessions;
pub mod transport;
pub mod usage;
pub mod ws;

pub use config::ServerConfig;
pub use matches::{MatchHandle, MatchRegistry};
pub use resilience::{classify, FailureClass, RetryPolicy};
pub use server::{serve, Admission, ServerContext};
pub use session::{LinkStatus, MatchBinding, Relayed, SendError, Session};
pub use sessions::{RegistryError, RelayError, SessionRegistry};
pub use transport::{Connection, FrameSink, FrameStream, TransportError};
pub use usage::{LoggingUsageCounter, UsageCounter, UsageError, UsageEvent};
