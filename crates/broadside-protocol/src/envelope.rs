//! Frame envelope and the outbound payload shapes.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::codes::MessageCode;
use crate::ids::{GameId, PlayerId, SessionId};
use crate::types::{CellState, Coord, Difficulty, Outcome};
use crate::wire::WireError;

/// One frame on the wire.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub code: MessageCode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error_details: String,
    pub message: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionIssued {
    pub session_id: SessionId,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameCreated {
    pub game_id: GameId,
    pub host_id: PlayerId,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameJoined {
    pub game_id: GameId,
    pub player_id: PlayerId,
    pub difficulty: Difficulty,
}

/// Payload naming only the match (select-grid prompt, rematch traffic).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameRef {
    pub game_id: GameId,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerReady {
    pub game_id: GameId,
    pub player_id: PlayerId,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartGamePayload {
    pub game_id: GameId,
    /// Whether the receiving player moves first.
    pub turn: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttackResult {
    pub x: usize,
    pub y: usize,
    pub cell_state: CellState,
    pub sunken_ships_host: u8,
    pub sunken_ships_join: u8,
    /// Every cell of the ship sunk by this attack, if one was.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sunk_ship_coordinates: Option<Vec<Coord>>,
    /// Whether the receiving player moves next. The attacker always reads `false`,
    /// including on the attack that ends the game.
    pub turn: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndGamePayload {
    pub outcome: Outcome,
}

impl Envelope {
    /// A bare signal with neither payload nor error.
    pub fn signal(code: MessageCode) -> Self {
        Self {
            code,
            payload: None,
            error: None,
        }
    }

    /// A frame carrying `payload`, which must serialize to a JSON value.
    pub fn with_payload<T: Serialize>(code: MessageCode, payload: &T) -> Result<Self, WireError> {
        Ok(Self {
            code,
            payload: Some(serde_json::to_value(payload)?),
            error: None,
        })
    }

    pub fn error(code: MessageCode, details: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code,
            payload: None,
            error: Some(ErrorBody {
                error_details: details.into(),
                message: message.into(),
            }),
        }
    }

    pub fn session_issued(session_id: &SessionId) -> Result<Self, WireError> {
        Self::with_payload(
            MessageCode::SessionIdIssued,
            &SessionIssued {
                session_id: session_id.clone(),
            },
        )
    }

    pub fn select_grid(game_id: &GameId) -> Result<Self, WireError> {
        Self::with_payload(
            MessageCode::SelectGrid,
            &GameRef {
                game_id: game_id.clone(),
            },
        )
    }

    pub fn start_game(game_id: &GameId, turn: bool) -> Result<Self, WireError> {
        Self::with_payload(
            MessageCode::StartGame,
            &StartGamePayload {
                game_id: game_id.clone(),
                turn,
            },
        )
    }

    pub fn end_game(outcome: Outcome) -> Result<Self, WireError> {
        Self::with_payload(MessageCode::EndGame, &EndGamePayload { outcome })
    }

    pub fn game_ref(code: MessageCode, game_id: &GameId) -> Result<Self, WireError> {
        Self::with_payload(
            code,
            &GameRef {
                game_id: game_id.clone(),
            },
        )
    }

    /// Decodes the payload into a typed shape, `None` when absent or mismatched.
    pub fn payload_as<T: for<'de> Deserialize<'de>>(&self) -> Option<T> {
        self.payload
            .as_ref()
            .and_then(|value| T::deserialize(value).ok())
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}
