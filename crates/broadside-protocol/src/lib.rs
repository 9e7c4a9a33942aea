//! Broadside wire protocol.
//!
//! One JSON envelope per WebSocket text frame: a numeric message code, an optional
//! payload object and an optional structured error. Inbound frames decode into the
//! [`Request`] tagged union; outbound frames are built with the [`Envelope`]
//! constructors.

pub mod codes;
pub mod envelope;
pub mod ids;
pub mod request;
pub mod types;
pub mod wire;

pub use codes::MessageCode;
pub use envelope::{
    AttackResult, EndGamePayload, Envelope, ErrorBody, GameCreated, GameJoined, GameRef,
    PlayerReady, SessionIssued, StartGamePayload,
};
pub use ids::{GameId, PlayerId, SessionId};
pub use request::{
    AttackRequest, CreateGameRequest, GameRequest, JoinGameRequest, ReadyRequest, Request,
};
pub use types::{CellState, Coord, Difficulty, Outcome, ShipKind, GRID_SIZE};
pub use wire::{decode_envelope, decode_request, encode_envelope, DecodeError, WireError};
