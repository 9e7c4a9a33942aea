//! Ship hit bookkeeping.

use std::collections::BTreeMap;

use broadside_protocol::{Coord, ShipKind};

/// Ships each player fields; losing all of them loses the match.
pub const TOTAL_SHIPS: u8 = 3;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Ship {
    pub kind: ShipKind,
    pub hits: u8,
    /// Cells hit so far, in the order they were hit.
    pub hit_coords: Vec<Coord>,
}

impl Ship {
    pub fn new(kind: ShipKind) -> Self {
        Self {
            kind,
            hits: 0,
            hit_coords: Vec::new(),
        }
    }

    pub fn length(&self) -> u8 {
        self.kind.length()
    }

    pub fn is_sunk(&self) -> bool {
        self.hits >= self.length()
    }
}

/// One player's ships keyed by type.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Fleet {
    ships: BTreeMap<ShipKind, Ship>,
}

impl Default for Fleet {
    fn default() -> Self {
        Self {
            ships: ShipKind::ALL
                .iter()
                .map(|&kind| (kind, Ship::new(kind)))
                .collect(),
        }
    }
}

impl Fleet {
    pub fn get(&self, kind: ShipKind) -> Option<&Ship> {
        self.ships.get(&kind)
    }

    pub fn is_sunk(&self, kind: ShipKind) -> bool {
        self.ships.get(&kind).is_some_and(Ship::is_sunk)
    }

    /// Records a hit and reports whether this hit sank the ship.
    ///
    /// Hits beyond the ship's length (possible with oversized client layouts) are recorded
    /// but never sink it a second time.
    pub fn record_hit(&mut self, kind: ShipKind, at: Coord) -> bool {
        let ship = self.ships.entry(kind).or_insert_with(|| Ship::new(kind));
        ship.hits = ship.hits.saturating_add(1);
        ship.hit_coords.push(at);
        ship.hits == ship.length()
    }

    pub fn sunk_count(&self) -> u8 {
        self.ships.values().filter(|ship| ship.is_sunk()).count() as u8
    }
}
