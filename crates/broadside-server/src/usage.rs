//! Best-effort usage accounting.
//!
//! Counting must never fail a request: callers go through [`record_usage`], which logs and
//! moves on.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use broadside_protocol::{Difficulty, GameId};
use tracing::{info, warn};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum UsageEvent {
    GameCreated { game_id: GameId, difficulty: Difficulty },
    Rematch { game_id: GameId },
}

#[derive(Debug, thiserror::Error)]
pub enum UsageError {
    #[error("usage backend unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait UsageCounter: Send + Sync {
    async fn record(&self, event: UsageEvent) -> Result<(), UsageError>;
}

/// Keeps running totals in memory and logs each event.
#[derive(Debug, Default)]
pub struct LoggingUsageCounter {
    games_created: AtomicU64,
    rematches: AtomicU64,
}

impl LoggingUsageCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn games_created(&self) -> u64 {
        self.games_created.load(Ordering::Relaxed)
    }

    pub fn rematches(&self) -> u64 {
        self.rematches.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl UsageCounter for LoggingUsageCounter {
    async fn record(&self, event: UsageEvent) -> Result<(), UsageError> {
        match &event {
            UsageEvent::GameCreated { game_id, difficulty } => {
                let total = self.games_created.fetch_add(1, Ordering::Relaxed) + 1;
                info!(game = %game_id, ?difficulty, total, "usage: game created");
            }
            UsageEvent::Rematch { game_id } => {
                let total = self.rematches.fetch_add(1, Ordering::Relaxed) + 1;
                info!(game = %game_id, total, "usage: rematch");
            }
        }
        Ok(())
    }
}

/// Records `event`, logging instead of propagating any failure.
pub async fn record_usage(counter: &dyn UsageCounter, event: UsageEvent) {
    if let Err(err) = counter.record(event.clone()).await {
        warn!(%err, ?event, "usage counter failed");
    }
}
