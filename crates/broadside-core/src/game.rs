//! Match state machine.
//!
//! A match holds the host and join slots and moves through
//! `Created -> AwaitingJoin -> GridSelection -> InProgress -> Finished`, with
//! `RematchPending -> GridSelection` looping back for another round. The phase is derived
//! from slot state rather than stored. Callers hold the match behind their own lock; every
//! method validates fully before it mutates anything.

use broadside_protocol::{CellState, Coord, Difficulty, GameId, Outcome, PlayerId, SessionId, ShipKind};
use thiserror::Error;

use crate::board::{DefenceBoard, Resolution};
use crate::grid::{in_bounds, Grid, GridError};
use crate::ship::TOTAL_SHIPS;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Role {
    Host,
    Join,
}

impl Role {
    pub fn opponent(self) -> Role {
        match self {
            Role::Host => Role::Join,
            Role::Join => Role::Host,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MatchPhase {
    Created,
    AwaitingJoin,
    GridSelection,
    InProgress,
    Finished,
    RematchPending,
}

/// Per-player state block.
#[derive(Clone, Debug)]
pub struct PlayerSlot {
    pub id: PlayerId,
    pub session: SessionId,
    pub ready: bool,
    pub turn: bool,
    pub outcome: Outcome,
    pub sunk_ships: u8,
    /// Shots this player has fired at the opponent.
    pub attack_grid: Grid,
    pub defence: DefenceBoard,
    /// Set once the owning session is gone for good.
    pub departed: bool,
}

impl PlayerSlot {
    fn new(id: PlayerId, session: SessionId, turn: bool) -> Self {
        Self {
            id,
            session,
            ready: false,
            turn,
            outcome: Outcome::Undetermined,
            sunk_ships: 0,
            attack_grid: Grid::empty(),
            defence: DefenceBoard::default(),
            departed: false,
        }
    }

    fn reset(&mut self, turn: bool) {
        self.ready = false;
        self.turn = turn;
        self.outcome = Outcome::Undetermined;
        self.sunk_ships = 0;
        self.attack_grid = Grid::empty();
        self.defence = DefenceBoard::default();
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MatchError {
    #[error("match already has a host")]
    HostTaken,
    #[error("match already has a join player")]
    JoinTaken,
    #[error("no {0:?} player in this match")]
    SlotVacant(Role),
    #[error("player already submitted a grid")]
    AlreadyReady,
    #[error("match has not started")]
    NotStarted,
    #[error("match is over")]
    MatchOver,
    #[error("it is not your turn")]
    NotYourTurn,
    #[error("coordinate ({x}, {y}) is outside the board")]
    OutOfBounds { x: i64, y: i64 },
    #[error("cell ({x}, {y}) was already attacked")]
    DuplicateAttack { x: usize, y: usize },
    #[error("invalid grid: {0}")]
    InvalidGrid(GridError),
    #[error("match is still being played")]
    NotFinished,
    #[error("a rematch has already been called")]
    RematchAlreadyCalled,
    #[error("no rematch has been called")]
    RematchNotCalled,
    #[error("opponent has left the match")]
    PeerMissing,
}

impl MatchError {
    /// Machine-readable tag for the wire error field.
    pub fn details(&self) -> &'static str {
        match self {
            MatchError::HostTaken => "HostTaken",
            MatchError::JoinTaken => "GameFull",
            MatchError::SlotVacant(_) => "SlotVacant",
            MatchError::AlreadyReady => "AlreadyReady",
            MatchError::NotStarted => "GameNotStarted",
            MatchError::MatchOver => "GameOver",
            MatchError::NotYourTurn => "NotYourTurn",
            MatchError::OutOfBounds { .. } => "OutOfBounds",
            MatchError::DuplicateAttack { .. } => "DuplicateAttack",
            MatchError::InvalidGrid(_) => "InvalidGridDimensions",
            MatchError::NotFinished => "GameNotFinished",
            MatchError::RematchAlreadyCalled => "RematchAlreadyCalled",
            MatchError::RematchNotCalled => "RematchNotCalled",
            MatchError::PeerMissing => "PeerMissing",
        }
    }
}

impl From<GridError> for MatchError {
    fn from(err: GridError) -> Self {
        match err {
            GridError::OutOfBounds { x, y } => MatchError::OutOfBounds { x, y },
            other => MatchError::InvalidGrid(other),
        }
    }
}

/// What a successful attack did, enough to build both players' responses.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AttackReport {
    pub attacker: Role,
    pub at: Coord,
    /// `Hit` or `Miss`, as now shown on the attacker's attack grid.
    pub cell_state: CellState,
    /// Set when this attack sank a ship: its type and every cell of its hull.
    pub sunk_ship: Option<(ShipKind, Vec<Coord>)>,
    pub sunken_ships_host: u8,
    pub sunken_ships_join: u8,
    /// Set when this attack ended the match.
    pub winner: Option<Role>,
}

impl AttackReport {
    pub fn sunk_ship_coordinates(&self) -> Option<Vec<Coord>> {
        self.sunk_ship.as_ref().map(|(_, hull)| hull.clone())
    }
}

#[derive(Clone, Debug)]
pub struct Match {
    id: GameId,
    difficulty: Difficulty,
    host: Option<PlayerSlot>,
    join: Option<PlayerSlot>,
    rematch_requested: bool,
}

impl Match {
    pub fn new(id: GameId, difficulty: Difficulty) -> Self {
        Self {
            id,
            difficulty,
            host: None,
            join: None,
            rematch_requested: false,
        }
    }

    pub fn id(&self) -> &GameId {
        &self.id
    }

    pub fn difficulty(&self) -> Difficulty {
        self.difficulty
    }

    pub fn rematch_requested(&self) -> bool {
        self.rematch_requested
    }

    pub fn slot(&self, role: Role) -> Option<&PlayerSlot> {
        match role {
            Role::Host => self.host.as_ref(),
            Role::Join => self.join.as_ref(),
        }
    }

    fn slot_mut(&mut self, role: Role) -> Option<&mut PlayerSlot> {
        match role {
            Role::Host => self.host.as_mut(),
            Role::Join => self.join.as_mut(),
        }
    }

    /// Both slots at once, attacker first.
    fn pair_mut(&mut self, first: Role) -> Option<(&mut PlayerSlot, &mut PlayerSlot)> {
        let host = self.host.as_mut()?;
        let join = self.join.as_mut()?;
        Some(match first {
            Role::Host => (host, join),
            Role::Join => (join, host),
        })
    }

    pub fn phase(&self) -> MatchPhase {
        let (Some(host), Some(join)) = (&self.host, &self.join) else {
            return if self.host.is_none() {
                MatchPhase::Created
            } else {
                MatchPhase::AwaitingJoin
            };
        };
        if self.rematch_requested {
            MatchPhase::RematchPending
        } else if host.outcome != Outcome::Undetermined || join.outcome != Outcome::Undetermined {
            MatchPhase::Finished
        } else if host.ready && join.ready {
            MatchPhase::InProgress
        } else {
            MatchPhase::GridSelection
        }
    }

    /// Role held by `player` in this match.
    pub fn role_of(&self, player: &PlayerId) -> Option<Role> {
        [Role::Host, Role::Join]
            .into_iter()
            .find(|&role| self.slot(role).is_some_and(|slot| &slot.id == player))
    }

    /// Session of the opponent of `role`, if they are still around.
    pub fn peer_session(&self, role: Role) -> Option<&SessionId> {
        self.slot(role.opponent())
            .filter(|slot| !slot.departed)
            .map(|slot| &slot.session)
    }

    /// Fills the host slot. The host moves first.
    pub fn create_host(&mut self, session: SessionId, player: PlayerId) -> Result<(), MatchError> {
        if self.host.is_some() {
            return Err(MatchError::HostTaken);
        }
        self.host = Some(PlayerSlot::new(player, session, true));
        Ok(())
    }

    /// Fills the join slot. A match takes exactly one join player, ever.
    pub fn create_join(&mut self, session: SessionId, player: PlayerId) -> Result<(), MatchError> {
        if self.join.is_some() {
            return Err(MatchError::JoinTaken);
        }
        if self.host.is_none() {
            return Err(MatchError::SlotVacant(Role::Host));
        }
        self.join = Some(PlayerSlot::new(player, session, false));
        Ok(())
    }

    /// Stores a player's layout and marks them ready.
    pub fn set_ready(&mut self, role: Role, rows: &[Vec<CellState>]) -> Result<(), MatchError> {
        let slot = self.slot(role).ok_or(MatchError::SlotVacant(role))?;
        if slot.ready {
            return Err(MatchError::AlreadyReady);
        }
        let grid = Grid::place_defence_grid(rows).map_err(MatchError::InvalidGrid)?;

        let slot = self.slot_mut(role).ok_or(MatchError::SlotVacant(role))?;
        slot.defence = DefenceBoard::new(grid);
        slot.ready = true;
        Ok(())
    }

    pub fn both_ready(&self) -> bool {
        matches!((&self.host, &self.join), (Some(host), Some(join)) if host.ready && join.ready)
    }

    pub fn attack(&mut self, attacker: Role, x: i64, y: i64) -> Result<AttackReport, MatchError> {
        match self.phase() {
            MatchPhase::InProgress => {}
            MatchPhase::Finished | MatchPhase::RematchPending => return Err(MatchError::MatchOver),
            _ => return Err(MatchError::NotStarted),
        }
        let (offence, defence) = self.pair_mut(attacker).ok_or(MatchError::NotStarted)?;

        if !offence.turn {
            return Err(MatchError::NotYourTurn);
        }
        let at = in_bounds(x, y)?;
        if offence.attack_grid.get(at) != CellState::Empty || defence.defence.was_attacked(at) {
            return Err(MatchError::DuplicateAttack { x: at.x, y: at.y });
        }

        let resolution = defence.defence.resolve_attack(x, y)?;
        offence.turn = false;
        defence.turn = true;

        let mut sunk_ship = None;
        let cell_state = match resolution {
            // Ruled out by the duplicate check above.
            Resolution::AlreadyHit => return Err(MatchError::DuplicateAttack { x: at.x, y: at.y }),
            Resolution::Miss => CellState::Miss,
            Resolution::ShipHit { kind, sunk } => {
                if sunk {
                    defence.sunk_ships += 1;
                    sunk_ship = Some((kind, defence.defence.hit_coords(kind)));
                }
                CellState::Hit
            }
        };
        offence.attack_grid.set(at, cell_state);

        let mut winner = None;
        if defence.sunk_ships >= TOTAL_SHIPS && defence.outcome == Outcome::Undetermined {
            defence.outcome = Outcome::Lost;
            offence.outcome = Outcome::Won;
            winner = Some(attacker);
        }

        let (sunken_ships_host, sunken_ships_join) = match attacker {
            Role::Host => (offence.sunk_ships, defence.sunk_ships),
            Role::Join => (defence.sunk_ships, offence.sunk_ships),
        };

        Ok(AttackReport {
            attacker,
            at,
            cell_state,
            sunk_ship,
            sunken_ships_host,
            sunken_ships_join,
            winner,
        })
    }

    /// Offers another round. Only a decided match can be replayed.
    pub fn call_rematch(&mut self) -> Result<(), MatchError> {
        match self.phase() {
            MatchPhase::Finished => {
                self.rematch_requested = true;
                Ok(())
            }
            MatchPhase::RematchPending => Err(MatchError::RematchAlreadyCalled),
            _ => Err(MatchError::NotFinished),
        }
    }

    /// Resets both slots for another round. The host always opens a rematch.
    pub fn accept_rematch(&mut self) -> Result<(), MatchError> {
        let present = |slot: &Option<PlayerSlot>| slot.as_ref().is_some_and(|s| !s.departed);
        if !present(&self.host) || !present(&self.join) {
            return Err(MatchError::PeerMissing);
        }
        let (host, join) = self.pair_mut(Role::Host).ok_or(MatchError::PeerMissing)?;
        host.reset(true);
        join.reset(false);
        self.rematch_requested = false;
        Ok(())
    }

    pub fn reject_rematch(&mut self) -> Result<(), MatchError> {
        if !self.rematch_requested {
            return Err(MatchError::RematchNotCalled);
        }
        self.rematch_requested = false;
        Ok(())
    }

    /// Marks a player as gone. Their slot stays so the match can still be inspected.
    pub fn depart(&mut self, role: Role) {
        if let Some(slot) = self.slot_mut(role) {
            slot.departed = true;
        }
    }
}
