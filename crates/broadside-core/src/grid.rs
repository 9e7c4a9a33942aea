//! Fixed-size boards.

use broadside_protocol::{CellState, Coord, GRID_SIZE};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GridError {
    #[error("grid must be {expected}x{expected}, got {rows} rows with row lengths {columns:?}")]
    DimensionMismatch {
        expected: usize,
        rows: usize,
        columns: Vec<usize>,
    },
    #[error("coordinate ({x}, {y}) is outside the board")]
    OutOfBounds { x: i64, y: i64 },
}

/// A `GRID_SIZE` x `GRID_SIZE` board addressed as `cells[y][x]`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Grid {
    cells: [[CellState; GRID_SIZE]; GRID_SIZE],
}

impl Grid {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Builds a defence grid from client rows.
    ///
    /// Only the dimensions are checked. Ship counts, shapes and overlaps are taken as the
    /// client sent them.
    pub fn place_defence_grid(rows: &[Vec<CellState>]) -> Result<Self, GridError> {
        if rows.len() != GRID_SIZE || rows.iter().any(|row| row.len() != GRID_SIZE) {
            return Err(GridError::DimensionMismatch {
                expected: GRID_SIZE,
                rows: rows.len(),
                columns: rows.iter().map(Vec::len).collect(),
            });
        }

        let mut grid = Self::empty();
        for (y, row) in rows.iter().enumerate() {
            for (x, cell) in row.iter().enumerate() {
                grid.cells[y][x] = *cell;
            }
        }
        Ok(grid)
    }

    pub fn get(&self, at: Coord) -> CellState {
        self.cells[at.y][at.x]
    }

    pub fn set(&mut self, at: Coord, cell: CellState) {
        self.cells[at.y][at.x] = cell;
    }

    /// Every coordinate, row by row.
    pub fn coords() -> impl Iterator<Item = Coord> {
        (0..GRID_SIZE).flat_map(|y| (0..GRID_SIZE).map(move |x| Coord::new(x, y)))
    }

    pub fn is_blank(&self) -> bool {
        Self::coords().all(|at| self.get(at) == CellState::Empty)
    }

    pub fn rows(&self) -> Vec<Vec<CellState>> {
        self.cells.iter().map(|row| row.to_vec()).collect()
    }
}

/// Validates signed coordinates against the board.
pub fn in_bounds(x: i64, y: i64) -> Result<Coord, GridError> {
    Coord::checked(x, y).ok_or(GridError::OutOfBounds { x, y })
}
