//! Goban-Review: a Go game reviewer driven by an external analysis engine.
//!
//! The crate keeps a branching history of board positions, sends the moves
//! to a KataGo-style engine, and stores the engine's continuous analysis on
//! the position it was computed for.
//!
//! ## Modules
//!
//! - [`constants`] - Board bounds, protocol constants, review parameters
//! - [`coord`] - Vertices and Go coordinate notation
//! - [`zobrist`] - Position hashing keys
//! - [`board`] - Board state, captures, ownership
//! - [`groups`] - Chain discovery and liberty counting
//! - [`analysis`] - Analysis records and the summary-line parser
//! - [`engine`] - Engine subprocess session
//! - [`history`] - Branching game history with per-position analysis
//! - [`config`] - JSON configuration
//! - [`logging`] - Logger setup
//! - [`error`] - Error type
//!
//! ## Example
//!
//! ```
//! use goban_review::board::{Board, Color};
//! use goban_review::coord::parse_vertex;
//! use goban_review::history::{HistoryTree, Relay};
//!
//! let mut tree = HistoryTree::new(Board::new(9));
//! let d4 = parse_vertex("D4", 9).unwrap();
//! tree.play_move(d4, Color::Black, Relay::LOCAL).unwrap();
//! assert_eq!(tree.turn(), Color::White);
//! println!("{}", tree.current_board());
//! ```

pub mod analysis;
pub mod board;
pub mod config;
pub mod constants;
pub mod coord;
pub mod engine;
pub mod error;
pub mod groups;
pub mod history;
pub mod logging;
pub mod zobrist;

pub use error::{Error, Result};
