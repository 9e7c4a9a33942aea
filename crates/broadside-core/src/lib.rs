//! Game model for Broadside: boards, ships and the match state machine.
//!
//! Everything here is synchronous and lock-free; the server wraps each [`Match`] in its
//! own mutex.

pub mod board;
pub mod game;
pub mod grid;
pub mod ship;

pub use board::{DefenceBoard, Resolution};
pub use game::{AttackReport, Match, MatchError, MatchPhase, PlayerSlot, Role};
pub use grid::{in_bounds, Grid, GridError};
pub use ship::{Fleet, Ship, TOTAL_SHIPS};
