//! Analysis records and the parser for the engine's summary lines.
//!
//! A summary line looks like
//!
//! ```text
//! info visits 120 winrate 0.53 scoreMean 1.2 scoreStdev 9.8 pv D4 Q16 info ... ownership 0.1 -0.2 ...
//! ```
//!
//! Keys other than the ones below (`move`, `order`, `lcb`, `prior`, ...) are
//! skipped. A line that never reaches `ownership`, or whose ownership grid is
//! short, yields no record.
//!
//! [`AnalysisRecord::to_line`] writes the same grammar, and
//! [`LineParser::parse`] reads it back unchanged.

use std::fmt::Write as _;

use crate::board::Color;
use crate::coord::{format_vertex, parse_vertex, Point, Vertex};

/// One principal variation with its statistics.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PvEntry {
    pub visits: u64,
    /// Win probability for the player to move, `0.0..=1.0`.
    pub winrate: f64,
    /// Expected score lead for the player to move.
    pub score_mean: f64,
    pub score_stdev: f64,
    pub moves: Vec<Vertex>,
}

impl PvEntry {
    /// First move of the variation, if any.
    pub fn first_move(&self) -> Option<Vertex> {
        self.moves.first().copied()
    }
}

/// One complete engine evaluation of a position.
///
/// Entries keep the engine's order (best first). Ownership is kept exactly as
/// reported: row-major from the bottom-left, relative to the player to move.
#[derive(Clone, Debug, PartialEq)]
pub struct AnalysisRecord {
    size: usize,
    entries: Vec<PvEntry>,
    ownership: Vec<f64>,
}

impl AnalysisRecord {
    /// Build a record. Returns `None` if the ownership grid does not have
    /// `size * size` values.
    pub fn new(size: usize, entries: Vec<PvEntry>, ownership: Vec<f64>) -> Option<Self> {
        if ownership.len() != size * size {
            return None;
        }
        Some(Self {
            size,
            entries,
            ownership,
        })
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn entries(&self) -> &[PvEntry] {
        &self.entries
    }

    pub fn ownership(&self) -> &[f64] {
        &self.ownership
    }

    /// The engine's preferred variation.
    pub fn best(&self) -> Option<&PvEntry> {
        self.entries.first()
    }

    /// Variation starting with a move at `point`.
    pub fn entry_at(&self, point: Point) -> Option<&PvEntry> {
        self.entries
            .iter()
            .find(|e| e.first_move() == Some(Vertex::from(point)))
    }

    /// Best score mean converted to Black's point of view, given who is to move.
    pub fn black_score(&self, to_move: Color) -> Option<f64> {
        self.best().map(|e| e.score_mean * to_move.sign())
    }

    /// Serialize in the engine's summary-line grammar.
    pub fn to_line(&self) -> String {
        let mut out = String::new();
        for e in &self.entries {
            let _ = write!(
                out,
                "info visits {} winrate {} scoreMean {} scoreStdev {} pv",
                e.visits, e.winrate, e.score_mean, e.score_stdev
            );
            for &mv in &e.moves {
                out.push(' ');
                out.push_str(&format_vertex(mv, self.size));
            }
            out.push(' ');
        }
        out.push_str("ownership");
        for v in &self.ownership {
            let _ = write!(out, " {v}");
        }
        out
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Keyword {
    Info,
    Visits,
    Winrate,
    ScoreMean,
    ScoreStdev,
    Pv,
    Ownership,
}

#[derive(Copy, Clone, Debug, PartialEq)]
enum Token {
    Keyword(Keyword),
    Vertex(Vertex),
    Number(f64),
    Other,
}

/// Numeric fields of a PV entry.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Field {
    Visits,
    Winrate,
    ScoreMean,
    ScoreStdev,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum State {
    Scan,
    Value(Field),
    Pv,
    Ownership,
}

/// Stateless parser for the engine's analysis lines on a board of one size.
#[derive(Copy, Clone, Debug)]
pub struct LineParser {
    size: usize,
}

impl LineParser {
    pub fn new(size: usize) -> Self {
        Self { size }
    }

    fn classify(&self, tok: &str) -> Token {
        let kw = match tok {
            "info" => Some(Keyword::Info),
            "visits" => Some(Keyword::Visits),
            "winrate" => Some(Keyword::Winrate),
            "scoreMean" => Some(Keyword::ScoreMean),
            "scoreStdev" => Some(Keyword::ScoreStdev),
            "pv" => Some(Keyword::Pv),
            "ownership" => Some(Keyword::Ownership),
            _ => None,
        };
        if let Some(kw) = kw {
            return Token::Keyword(kw);
        }
        if let Some(v) = parse_vertex(tok, self.size) {
            return Token::Vertex(v);
        }
        match tok.parse::<f64>() {
            Ok(n) => Token::Number(n),
            Err(_) => Token::Other,
        }
    }

    /// Parse one line. Returns `None` unless it is a complete summary line.
    pub fn parse(&self, line: &str) -> Option<AnalysisRecord> {
        let mut state = State::Scan;
        let mut entries = Vec::new();
        let mut current = PvEntry::default();
        let mut ownership = Vec::with_capacity(self.size * self.size);
        let mut reached_ownership = false;

        for raw in line.split_whitespace() {
            let tok = self.classify(raw);

            if state == State::Pv {
                if let Token::Vertex(v) = tok {
                    current.moves.push(v);
                    continue;
                }
                entries.push(std::mem::take(&mut current));
                state = State::Scan;
            }

            match (state, tok) {
                (State::Ownership, Token::Number(n)) => ownership.push(n),
                (State::Ownership, _) => break,
                (State::Value(field), Token::Number(n)) => {
                    match field {
                        Field::Visits => current.visits = n as u64,
                        Field::Winrate => current.winrate = n,
                        Field::ScoreMean => current.score_mean = n,
                        Field::ScoreStdev => current.score_stdev = n,
                    }
                    state = State::Scan;
                }
                (State::Value(_), _) => return None,
                (_, Token::Keyword(kw)) => {
                    state = match kw {
                        Keyword::Info => {
                            current = PvEntry::default();
                            State::Scan
                        }
                        Keyword::Visits => State::Value(Field::Visits),
                        Keyword::Winrate => State::Value(Field::Winrate),
                        Keyword::ScoreMean => State::Value(Field::ScoreMean),
                        Keyword::ScoreStdev => State::Value(Field::ScoreStdev),
                        Keyword::Pv => {
                            current.moves.clear();
                            State::Pv
                        }
                        Keyword::Ownership => {
                            reached_ownership = true;
                            State::Ownership
                        }
                    }
                }
                _ => {}
            }
        }

        if !reached_ownership {
            return None;
        }
        AnalysisRecord::new(self.size, entries, ownership)
    }
}
