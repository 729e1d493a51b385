//! Go board with legality rules and incremental Zobrist hashing.
//!
//! The board is an `N x N` grid addressed by `(i, j)` with `i` the row from
//! the top. Alongside the stones it carries the engine's ownership estimate
//! for display, signed so that `+1.0` means fully Black-owned.
//!
//! Ko is not checked: an immediate retake is accepted.

use std::fmt;

use log::trace;

use crate::constants::{COLUMNS, MAX_SIZE, MIN_SIZE};
use crate::coord::{Point, format_point, format_vertex, Vertex};
use crate::error::{Error, Result};
use crate::groups;
use crate::zobrist;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Color {
    Black,
    White,
}

impl Color {
    pub fn opponent(self) -> Color {
        match self {
            Color::Black => Color::White,
            Color::White => Color::Black,
        }
    }

    /// `+1.0` for Black, `-1.0` for White.
    pub fn sign(self) -> f64 {
        match self {
            Color::Black => 1.0,
            Color::White => -1.0,
        }
    }

    /// Protocol letter, `B` or `W`.
    pub fn letter(self) -> char {
        match self {
            Color::Black => 'B',
            Color::White => 'W',
        }
    }

    /// Parse `B`/`W` or `black`/`white`, case-insensitive.
    pub fn parse(s: &str) -> Option<Color> {
        match s.to_ascii_lowercase().as_str() {
            "b" | "black" => Some(Color::Black),
            "w" | "white" => Some(Color::White),
            _ => None,
        }
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.letter())
    }
}

/// The up-to-four orthogonal neighbors of `(i, j)` on a board of `size`.
pub fn neighbors(size: usize, i: usize, j: usize) -> impl Iterator<Item = Point> {
    let mut v: [Option<Point>; 4] = [None; 4];
    if i > 0 {
        v[0] = Some((i - 1, j));
    }
    if i + 1 < size {
        v[1] = Some((i + 1, j));
    }
    if j > 0 {
        v[2] = Some((i, j - 1));
    }
    if j + 1 < size {
        v[3] = Some((i, j + 1));
    }
    v.into_iter().flatten()
}

#[derive(Clone, Debug, PartialEq)]
pub struct Board {
    size: usize,
    cells: Vec<Option<Color>>,
    turn: Color,
    key: u64,
    last_move: Option<Point>,
    ownership: Vec<f64>,
}

impl Board {
    /// Create an empty board with Black to move.
    ///
    /// # Panics
    /// If `size` is outside `MIN_SIZE..=MAX_SIZE`.
    pub fn new(size: usize) -> Self {
        assert!(
            (MIN_SIZE..=MAX_SIZE).contains(&size),
            "board size {size} outside {MIN_SIZE}..={MAX_SIZE}"
        );
        Self {
            size,
            cells: vec![None; size * size],
            turn: Color::Black,
            key: zobrist::turn(Color::Black),
            last_move: None,
            ownership: vec![0.0; size * size],
        }
    }

    /// Create a board with setup stones placed directly (no captures, no turn change).
    pub fn with_setup(size: usize, stones: &[(Color, Point)]) -> Result<Self> {
        let mut board = Self::new(size);
        for &(color, (i, j)) in stones {
            if !board.on_board(i, j) {
                return Err(Error::InvalidCoordinate(format!("({i}, {j}) on {size}x{size}")));
            }
            board.set_stone(i, j, Some(color));
        }
        Ok(board)
    }

    #[inline]
    fn idx(&self, i: usize, j: usize) -> usize {
        i * self.size + j
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn turn(&self) -> Color {
        self.turn
    }

    /// Position key: XOR of the terms for every stone plus the player to move.
    pub fn key(&self) -> u64 {
        self.key
    }

    pub fn last_move(&self) -> Option<Point> {
        self.last_move
    }

    pub fn on_board(&self, i: usize, j: usize) -> bool {
        i < self.size && j < self.size
    }

    /// Stone at `(i, j)`, or `None` for an empty or off-board point.
    pub fn get(&self, i: usize, j: usize) -> Option<Color> {
        if !self.on_board(i, j) {
            return None;
        }
        self.cells[self.idx(i, j)]
    }

    /// Ownership estimate at `(i, j)`, `+1.0` fully Black … `-1.0` fully White.
    pub fn ownership(&self, i: usize, j: usize) -> f64 {
        self.ownership[self.idx(i, j)]
    }

    pub fn set_ownership(&mut self, i: usize, j: usize, value: f64) {
        let idx = self.idx(i, j);
        self.ownership[idx] = value;
    }

    pub fn clear_ownership(&mut self) {
        self.ownership.fill(0.0);
    }

    /// Number of stones of each color, `(black, white)`.
    pub fn stone_count(&self) -> (usize, usize) {
        self.cells.iter().fold((0, 0), |(b, w), c| match c {
            Some(Color::Black) => (b + 1, w),
            Some(Color::White) => (b, w + 1),
            None => (b, w),
        })
    }

    /// Hard-set a point, keeping the key in sync. No rules are applied.
    pub fn set_stone(&mut self, i: usize, j: usize, stone: Option<Color>) {
        let idx = self.idx(i, j);
        if let Some(old) = self.cells[idx] {
            self.key ^= zobrist::stone(old, i, j);
        }
        if let Some(new) = stone {
            self.key ^= zobrist::stone(new, i, j);
        }
        self.cells[idx] = stone;
    }

    pub fn set_turn(&mut self, color: Color) {
        self.key ^= zobrist::turn(self.turn);
        self.turn = color;
        self.key ^= zobrist::turn(self.turn);
    }

    /// Remove all stones and ownership; Black to move.
    pub fn clear(&mut self) {
        *self = Self::new(self.size);
    }

    /// Recompute the key from scratch. Only needed after external tampering;
    /// every mutator keeps it up to date incrementally.
    pub fn recompute_key(&mut self) -> u64 {
        let mut key = zobrist::turn(self.turn);
        for i in 0..self.size {
            for j in 0..self.size {
                if let Some(c) = self.get(i, j) {
                    key ^= zobrist::stone(c, i, j);
                }
            }
        }
        self.key = key;
        key
    }

    pub fn stone_liberties(&self, i: usize, j: usize) -> usize {
        groups::stone_liberties(self, (i, j))
    }

    /// Liberties of the chain at `(i, j)` as a per-stone sum. See
    /// [`groups::chain_liberties`].
    pub fn chain_liberties(&self, i: usize, j: usize) -> usize {
        groups::chain_liberties(self, (i, j))
    }

    /// Place a stone and remove the enemy chains left without liberties.
    ///
    /// Returns the captured points, or `None` (with the board untouched) if
    /// the point is unavailable or the move is suicide. Key and turn are left
    /// for the caller.
    fn resolve(&mut self, i: usize, j: usize, color: Color) -> Option<Vec<Point>> {
        if !self.on_board(i, j) || self.get(i, j).is_some() {
            return None;
        }
        let idx = self.idx(i, j);
        self.cells[idx] = Some(color);

        let opp = color.opponent();
        let mut captured: Vec<Point> = Vec::new();
        for (ni, nj) in neighbors(self.size, i, j) {
            if self.get(ni, nj) == Some(opp)
                && !captured.contains(&(ni, nj))
                && groups::chain_liberties(self, (ni, nj)) == 0
            {
                captured.extend(groups::chain_at(self, (ni, nj)));
            }
        }

        if captured.is_empty() && groups::chain_liberties(self, (i, j)) == 0 {
            self.cells[idx] = None;
            return None;
        }
        for &(ri, rj) in &captured {
            let r = self.idx(ri, rj);
            self.cells[r] = None;
        }
        Some(captured)
    }

    /// Chains that playing `color` at `(i, j)` would capture.
    pub fn captured_by(&self, i: usize, j: usize, color: Color) -> Vec<Vec<Point>> {
        let mut scratch = self.clone();
        let Some(points) = scratch.resolve(i, j, color) else {
            return Vec::new();
        };
        let mut chains: Vec<Vec<Point>> = Vec::new();
        for p in points {
            if !chains.iter().any(|c| c.contains(&p)) {
                chains.push(groups::chain_at(self, p));
            }
        }
        chains
    }

    /// Whether `color` may play at `(i, j)`: on the board, empty, and not
    /// suicide. Ko is not considered.
    pub fn is_legal(&self, i: usize, j: usize, color: Color) -> bool {
        if !self.on_board(i, j) || self.get(i, j).is_some() {
            return false;
        }
        self.clone().resolve(i, j, color).is_some()
    }

    /// Play a stone, capturing as needed, and hand the turn to the opponent.
    ///
    /// Returns the number of stones captured. On error the board is unchanged.
    pub fn play(&mut self, i: usize, j: usize, color: Color) -> Result<usize> {
        let Some(captured) = self.resolve(i, j, color) else {
            let coord = if self.on_board(i, j) {
                format_point((i, j), self.size)
            } else {
                format!("({i}, {j})")
            };
            return Err(Error::IllegalMove { color, coord });
        };

        for &(ri, rj) in &captured {
            self.key ^= zobrist::stone(color.opponent(), ri, rj);
        }
        self.key ^= zobrist::stone(color, i, j);
        self.key ^= zobrist::turn(self.turn);
        self.turn = color.opponent();
        self.key ^= zobrist::turn(self.turn);
        self.last_move = Some((i, j));

        trace!(
            "{color} {} captures {} key {:016x}",
            format_point((i, j), self.size),
            captured.len(),
            self.key
        );
        Ok(captured.len())
    }

    /// Pass: only the player to move changes.
    pub fn pass(&mut self, color: Color) {
        self.key ^= zobrist::turn(self.turn);
        self.turn = color.opponent();
        self.key ^= zobrist::turn(self.turn);
        self.last_move = None;
    }

    /// Play a vertex (point or pass).
    pub fn play_vertex(&mut self, vertex: Vertex, color: Color) -> Result<usize> {
        match vertex {
            Vertex::Pass => {
                self.pass(color);
                Ok(0)
            }
            Vertex::Point(i, j) => self.play(i, j, color),
        }
    }

    /// Load the engine's ownership estimate.
    ///
    /// `flat` is row-major with the origin at the bottom-left corner and
    /// values relative to the player to move. The result is stored with the
    /// origin at the top-left, signed for Black, and averaged per chain.
    pub fn load_ownership(&mut self, flat: &[f64]) {
        let n = self.size;
        if flat.len() != n * n {
            log::warn!("ownership has {} values, expected {}", flat.len(), n * n);
            return;
        }
        let sign = self.turn.sign();
        for i in 0..n {
            for j in 0..n {
                let v = flat[(n - 1 - i) * n + j];
                self.set_ownership(i, j, sign * v);
            }
        }
        groups::merge_groups_heat(self);
    }

    /// Column letters line, e.g. `   A B C`.
    fn header(&self) -> String {
        let mut s = String::from("  ");
        for &c in &COLUMNS[..self.size] {
            s.push(' ');
            s.push(c as char);
        }
        s
    }

    /// Notation for a vertex on this board.
    pub fn notation(&self, vertex: Vertex) -> String {
        format_vertex(vertex, self.size)
    }
}

impl fmt::Display for Board {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.header())?;
        for i in 0..self.size {
            write!(f, "{:2}", self.size - i)?;
            for j in 0..self.size {
                let ch = match self.get(i, j) {
                    Some(Color::Black) => 'X',
                    Some(Color::White) => 'O',
                    None => '.',
                };
                write!(f, " {ch}")?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}
