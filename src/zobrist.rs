//! Zobrist hashing terms.
//!
//! One random 64-bit term per (cell, color) and one per player to move. The
//! table is sized for [`MAX_SIZE`] and indexed by `(i, j)` directly, so a
//! point's term does not depend on the board size.

use std::sync::LazyLock;

use crate::board::Color;
use crate::constants::{MAX_SIZE, ZOBRIST_SEED};

pub struct ZobristTable {
    stones: Vec<[u64; 2]>,
    turn: [u64; 2],
}

static TABLE: LazyLock<ZobristTable> = LazyLock::new(|| ZobristTable::generate(ZOBRIST_SEED));

impl ZobristTable {
    fn generate(seed: u64) -> Self {
        let mut rng = fastrand::Rng::with_seed(seed);
        let stones = (0..MAX_SIZE * MAX_SIZE)
            .map(|_| [rng.u64(..), rng.u64(..)])
            .collect();
        let turn = [rng.u64(..), rng.u64(..)];
        Self { stones, turn }
    }
}

#[inline]
fn color_index(color: Color) -> usize {
    match color {
        Color::Black => 0,
        Color::White => 1,
    }
}

/// Term for a stone of `color` at `(i, j)`.
#[inline]
pub fn stone(color: Color, i: usize, j: usize) -> u64 {
    TABLE.stones[i * MAX_SIZE + j][color_index(color)]
}

/// Term for `color` being the player to move.
#[inline]
pub fn turn(color: Color) -> u64 {
    TABLE.turn[color_index(color)]
}
