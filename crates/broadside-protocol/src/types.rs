//! Value types shared by the wire format and the game model.

use serde::{Deserialize, Serialize};

/// Side length of every board.
pub const GRID_SIZE: usize = 5;

/// A board cell, `x` is the column and `y` the row.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Coord {
    pub x: usize,
    pub y: usize,
}

impl Coord {
    pub const fn new(x: usize, y: usize) -> Self {
        Self { x, y }
    }

    /// Converts client-supplied signed coordinates, `None` when off the board.
    pub fn checked(x: i64, y: i64) -> Option<Self> {
        let size = GRID_SIZE as i64;
        if (0..size).contains(&x) && (0..size).contains(&y) {
            Some(Self::new(x as usize, y as usize))
        } else {
            None
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    #[default]
    Easy,
    Medium,
    Hard,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    #[default]
    Undetermined,
    Won,
    Lost,
}

/// The three ship types, distinguished by length.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ShipKind {
    Destroyer,
    Cruiser,
    Battleship,
}

impl ShipKind {
    pub const ALL: [ShipKind; 3] = [ShipKind::Destroyer, ShipKind::Cruiser, ShipKind::Battleship];

    pub const fn length(self) -> u8 {
        match self {
            ShipKind::Destroyer => 2,
            ShipKind::Cruiser => 3,
            ShipKind::Battleship => 4,
        }
    }
}

/// Cell contents on either board.
///
/// Wire codes: `0` empty, `1` hit, `2` miss, `3` destroyer, `4` cruiser, `5` battleship.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum CellState {
    #[default]
    Empty,
    Hit,
    Miss,
    Ship(ShipKind),
}

impl CellState {
    pub const fn is_attacked(self) -> bool {
        matches!(self, CellState::Hit | CellState::Miss)
    }
}

impl From<CellState> for u8 {
    fn from(cell: CellState) -> Self {
        match cell {
            CellState::Empty => 0,
            CellState::Hit => 1,
            CellState::Miss => 2,
            CellState::Ship(ShipKind::Destroyer) => 3,
            CellState::Ship(ShipKind::Cruiser) => 4,
            CellState::Ship(ShipKind::Battleship) => 5,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("unknown cell code {0}")]
pub struct UnknownCell(pub u8);

impl TryFrom<u8> for CellState {
    type Error = UnknownCell;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Ok(match value {
            0 => CellState::Empty,
            1 => CellState::Hit,
            2 => CellState::Miss,
            3 => CellState::Ship(ShipKind::Destroyer),
            4 => CellState::Ship(ShipKind::Cruiser),
            5 => CellState::Ship(ShipKind::Battleship),
            other => return Err(UnknownCell(other)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signed_coordinates_outside_board_are_rejected() {
        assert_eq!(Coord::checked(0, 4), Some(Coord::new(0, 4)));
        assert_eq!(Coord::checked(-1, 2), None);
        assert_eq!(Coord::checked(2, 5), None);
    }

    #[test]
    fn cell_codes_follow_contract() {
        let json = serde_json::to_string(&[CellState::Empty, CellState::Ship(ShipKind::Cruiser)])
            .unwrap();
        assert_eq!(json, "[0,4]");
        let cells: Vec<CellState> = serde_json::from_str("[1,2,5]").unwrap();
        assert_eq!(
            cells,
            vec![CellState::Hit, CellState::Miss, CellState::Ship(ShipKind::Battleship)]
        );
        assert!(serde_json::from_str::<CellState>("9").is_err());
    }

    #[test]
    fn difficulty_is_lowercase_on_the_wire() {
        assert_eq!(serde_json::to_string(&Difficulty::Hard).unwrap(), "\"hard\"");
        assert_eq!(serde_json::to_string(&Outcome::Won).unwrap(), "\"won\"");
    }
}
