//! A player's own waters: ship layout plus the fleet's damage.

use broadside_protocol::{CellState, Coord, ShipKind};

use crate::grid::{in_bounds, Grid, GridError};
use crate::ship::Fleet;

/// Result of firing at a defence board.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Resolution {
    /// The cell was already fired upon.
    AlreadyHit,
    Miss,
    /// `sunk` is set only by the hit that completed the ship.
    ShipHit { kind: ShipKind, sunk: bool },
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DefenceBoard {
    grid: Grid,
    fleet: Fleet,
}

impl DefenceBoard {
    pub fn new(grid: Grid) -> Self {
        Self {
            grid,
            fleet: Fleet::default(),
        }
    }

    pub fn grid(&self) -> &Grid {
        &self.grid
    }

    pub fn fleet(&self) -> &Fleet {
        &self.fleet
    }

    pub fn was_attacked(&self, at: Coord) -> bool {
        self.grid.get(at).is_attacked()
    }

    /// Fires at `(x, y)`, recording the hit on the ship it lands on.
    pub fn resolve_attack(&mut self, x: i64, y: i64) -> Result<Resolution, GridError> {
        let at = in_bounds(x, y)?;
        let resolution = match self.grid.get(at) {
            CellState::Hit | CellState::Miss => Resolution::AlreadyHit,
            CellState::Empty => {
                self.grid.set(at, CellState::Miss);
                Resolution::Miss
            }
            CellState::Ship(kind) => {
                self.grid.set(at, CellState::Hit);
                let sunk = self.fleet.record_hit(kind, at);
                Resolution::ShipHit { kind, sunk }
            }
        };
        Ok(resolution)
    }

    pub fn is_sunk(&self, kind: ShipKind) -> bool {
        self.fleet.is_sunk(kind)
    }

    /// Hull of a ship as far as it has been hit.
    pub fn hit_coords(&self, kind: ShipKind) -> Vec<Coord> {
        self.fleet
            .get(kind)
            .map(|ship| ship.hit_coords.clone())
            .unwrap_or_default()
    }
}
