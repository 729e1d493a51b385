//! Constants for board geometry, the analysis protocol, and review statistics.
//!
//! Board size is a runtime parameter; everything here that depends on it is
//! expressed as a bound rather than a fixed value.

// =============================================================================
// Board Geometry
// =============================================================================

/// Column letters used by Go notation. `I` is skipped to avoid confusion with `J`.
pub const COLUMNS: &[u8] = b"ABCDEFGHJKLMNOPQRSTUVWXYZ";

/// Largest supported board (one column per letter in [`COLUMNS`]).
pub const MAX_SIZE: usize = COLUMNS.len();

/// Smallest supported board.
pub const MIN_SIZE: usize = 2;

/// Default board size.
pub const DEFAULT_SIZE: usize = 19;

/// Default komi (compensation points for White).
pub const DEFAULT_KOMI: f32 = 7.5;

// =============================================================================
// Zobrist Hashing
// =============================================================================

/// Seed for the Zobrist table. Fixed so keys are stable across runs and
/// can be compared between saved sessions.
pub const ZOBRIST_SEED: u64 = 0x9E37_79B9_7F4A_7C15;

// =============================================================================
// Analysis Protocol
// =============================================================================

/// Response lines the engine emits for every command (`=` and a blank line).
pub const ACK_LINES: i64 = 2;

/// Analysis command template. `{}` is replaced by the interval in centiseconds.
pub const ANALYSIS_CMD: &str = "kata-analyze interval {} ownership true";

/// Default reporting interval for continuous analysis, in centiseconds.
pub const DEFAULT_INTERVAL_CS: u32 = 100;

/// How long a session waits for the engine to exit after `quit` before
/// killing it, in milliseconds.
pub const QUIT_GRACE_MS: u64 = 500;

/// Separator between the move list and the analysis in the history format.
pub const HISTORY_SEPARATOR: char = '#';

// =============================================================================
// Review Statistics
// =============================================================================

/// Score standard deviations below this are clamped when normalising losses.
pub const MIN_SCORE_STDEV: f64 = 10.0;

/// Scale applied to the averaged normalised loss when estimating a level.
pub const LEVEL_MULTIPLIER: f64 = 100.0;

/// Score swings smaller than this are treated as noise when listing losses.
pub const FORGET_BARRIER: f64 = 0.5;
