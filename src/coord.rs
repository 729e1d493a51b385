//! Conversion between board coordinates and Go notation.
//!
//! Internally a point is `(i, j)`: `i` counts rows from the top edge and `j`
//! counts columns from the left edge. Go notation (as spoken by the engine)
//! uses a column letter, skipping `I`, and a row number counted from the
//! bottom edge, so `(0, 0)` on a 19x19 board is `A19`.

use std::fmt;

use crate::constants::COLUMNS;

/// A point on the board as `(row from top, column from left)`.
pub type Point = (usize, usize);

/// A move target: an intersection, or a pass.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Vertex {
    Pass,
    Point(usize, usize),
}

impl Vertex {
    pub fn point(self) -> Option<Point> {
        match self {
            Vertex::Pass => None,
            Vertex::Point(i, j) => Some((i, j)),
        }
    }

    pub fn is_pass(self) -> bool {
        self == Vertex::Pass
    }
}

impl From<Point> for Vertex {
    fn from((i, j): Point) -> Self {
        Vertex::Point(i, j)
    }
}

/// Parse a coordinate string (e.g. "D4", "pass") for a board of `size`.
///
/// Letters are case-insensitive. Returns `None` for anything that is not a
/// valid vertex on this board, including the letter `I`.
pub fn parse_vertex(s: &str, size: usize) -> Option<Vertex> {
    if s.eq_ignore_ascii_case("pass") {
        return Some(Vertex::Pass);
    }

    let bytes = s.as_bytes();
    if bytes.len() < 2 {
        return None;
    }

    let col_char = bytes[0].to_ascii_uppercase();
    let j = COLUMNS.iter().position(|&c| c == col_char)?;

    let digits = &s[1..];
    if !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let row: usize = digits.parse().ok()?;

    if j >= size || row == 0 || row > size {
        return None;
    }
    Some(Vertex::Point(size - row, j))
}

/// Convert a vertex to Go notation for a board of `size` (e.g. "D4").
///
/// Inverse of [`parse_vertex`] for every vertex on the board.
pub fn format_vertex(v: Vertex, size: usize) -> String {
    match v {
        Vertex::Pass => "pass".into(),
        Vertex::Point(i, j) => format_point((i, j), size),
    }
}

/// Convert a point to Go notation for a board of `size`.
pub fn format_point((i, j): Point, size: usize) -> String {
    debug_assert!(i < size && j < size);
    format!("{}{}", COLUMNS[j] as char, size - i)
}

/// Helper for displaying a vertex with its board size attached.
pub struct Notation(pub Vertex, pub usize);

impl fmt::Display for Notation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&format_vertex(self.0, self.1))
    }
}
