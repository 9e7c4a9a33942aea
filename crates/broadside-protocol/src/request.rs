//! Inbound requests: one variant per client-originated code, each with its payload.

use serde::{Deserialize, Serialize};

use crate::codes::MessageCode;
use crate::ids::{GameId, PlayerId};
use crate::types::{CellState, Difficulty};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateGameRequest {
    #[serde(default)]
    pub difficulty: Difficulty,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinGameRequest {
    pub game_id: GameId,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadyRequest {
    pub game_id: GameId,
    pub player_id: PlayerId,
    /// Rows of cells, `defence_grid[y][x]`.
    pub defence_grid: Vec<Vec<CellState>>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttackRequest {
    pub game_id: GameId,
    pub player_id: PlayerId,
    /// Signed so that negative input reaches bounds checking instead of failing decode.
    pub x: i64,
    pub y: i64,
}

/// Rematch traffic names only the match.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameRequest {
    pub game_id: GameId,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Request {
    CreateGame(CreateGameRequest),
    JoinGame(JoinGameRequest),
    Ready(ReadyRequest),
    Attack(AttackRequest),
    RematchCall(GameRequest),
    RematchAccepted(GameRequest),
    RematchRejected(GameRequest),
}

impl Request {
    pub fn code(&self) -> MessageCode {
        match self {
            Request::CreateGame(_) => MessageCode::CreateGame,
            Request::JoinGame(_) => MessageCode::JoinGame,
            Request::Ready(_) => MessageCode::Ready,
            Request::Attack(_) => MessageCode::Attack,
            Request::RematchCall(_) => MessageCode::RematchCall,
            Request::RematchAccepted(_) => MessageCode::RematchAccepted,
            Request::RematchRejected(_) => MessageCode::RematchRejected,
        }
    }
}
