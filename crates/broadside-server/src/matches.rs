//! Registry of live matches with per-match player counts.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use broadside_core::{Match, Role};
use broadside_protocol::{Difficulty, GameId};
use rand::Rng;
use tokio::sync::RwLock;
use tracing::info;

use crate::sessions::RegistryError;

/// Length of generated match identifiers.
pub const GAME_ID_LEN: usize = 6;

const GAME_ID_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

/// Shared handle to one match. The match lock is never held across an await.
#[derive(Clone)]
pub struct MatchHandle(Arc<Mutex<Match>>);

impl MatchHandle {
    pub fn lock(&self) -> MutexGuard<'_, Match> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

struct MatchEntry {
    game: MatchHandle,
    players: usize,
}

#[derive(Default)]
pub struct MatchRegistry {
    matches: RwLock<HashMap<GameId, MatchEntry>>,
}

impl MatchRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a fresh match under a newly generated identifier.
    pub async fn create(&self, difficulty: Difficulty) -> (GameId, MatchHandle) {
        let mut matches = self.matches.write().await;
        let id = loop {
            let candidate = generate_game_id();
            if !matches.contains_key(&candidate) {
                break candidate;
            }
        };
        let game = MatchHandle(Arc::new(Mutex::new(Match::new(id.clone(), difficulty))));
        matches.insert(
            id.clone(),
            MatchEntry {
                game: game.clone(),
                players: 0,
            },
        );
        info!(game = %id, ?difficulty, "match created");
        (id, game)
    }

    pub async fn find(&self, id: &GameId) -> Result<MatchHandle, RegistryError> {
        self.matches
            .read()
            .await
            .get(id)
            .map(|entry| entry.game.clone())
            .ok_or_else(|| RegistryError::MatchNotFound(id.clone()))
    }

    /// Counts one more player in the match; returns the new count.
    pub async fn add_player(&self, id: &GameId) -> Result<usize, RegistryError> {
        let mut matches = self.matches.write().await;
        let entry = matches
            .get_mut(id)
            .ok_or_else(|| RegistryError::MatchNotFound(id.clone()))?;
        entry.players += 1;
        Ok(entry.players)
    }

    /// Marks `role` departed and drops one player; the match goes away with its last
    /// player. Returns whether the match was removed.
    pub async fn release_player(&self, id: &GameId, role: Role) -> Result<bool, RegistryError> {
        let (game, removed) = {
            let mut matches = self.matches.write().await;
            let entry = matches
                .get_mut(id)
                .ok_or_else(|| RegistryError::MatchNotFound(id.clone()))?;
            entry.players = entry.players.saturating_sub(1);
            let game = entry.game.clone();
            let removed = entry.players == 0;
            if removed {
                matches.remove(id);
            }
            (game, removed)
        };

        game.lock().depart(role);
        if removed {
            info!(game = %id, "match removed after last player left");
        }
        Ok(removed)
    }

    pub async fn len(&self) -> usize {
        self.matches.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.matches.read().await.is_empty()
    }
}

fn generate_game_id() -> GameId {
    let mut rng = rand::thread_rng();
    let id: String = (0..GAME_ID_LEN)
        .map(|_| GAME_ID_ALPHABET[rng.gen_range(0..GAME_ID_ALPHABET.len())] as char)
        .collect();
    GameId::new(id)
}
