//! Integration tests for goban-review
//!
//! Board rules are checked through the public API on small positions. Engine
//! traffic is checked against a scripted engine: commands are captured in a
//! buffer and engine output is released by the test only after the tree has
//! sent what it needs to.

use std::io::{self, Cursor, Read, Write};
use std::sync::{Arc, Mutex};

use assert_matches::assert_matches;
use crossbeam::channel::{self, Receiver, Sender};

use goban_review::board::{Board, Color};
use goban_review::config::EngineConfig;
use goban_review::coord::{parse_vertex, Vertex};
use goban_review::engine::EngineSession;
use goban_review::groups::{all_groups, chain_at, distinct_liberties};
use goban_review::history::{GameRecord, HistoryTree, Move, Navigation, Relay};
use goban_review::Error;

// =============================================================================
// Helpers
// =============================================================================

fn v(s: &str) -> Vertex {
    parse_vertex(s, 9).unwrap()
}

/// Play alternating moves starting with Black.
fn board_after(moves: &[&str]) -> Board {
    let mut board = Board::new(9);
    let mut color = Color::Black;
    for mv in moves {
        board.play_vertex(v(mv), color).unwrap();
        color = color.opponent();
    }
    board
}

#[derive(Clone, Default)]
struct Capture(Arc<Mutex<Vec<u8>>>);

impl Write for Capture {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }
    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Capture {
    /// Everything written since the last call.
    fn take(&self) -> String {
        String::from_utf8(std::mem::take(&mut *self.0.lock().unwrap())).unwrap()
    }
}

/// Engine output that only becomes readable when the test sends it.
struct GatedReader {
    chunks: Receiver<Vec<u8>>,
    buf: Cursor<Vec<u8>>,
}

impl Read for GatedReader {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        loop {
            let n = self.buf.read(out)?;
            if n > 0 || out.is_empty() {
                return Ok(n);
            }
            match self.chunks.recv() {
                Ok(chunk) => self.buf = Cursor::new(chunk),
                Err(_) => return Ok(0),
            }
        }
    }
}

struct ScriptedEngine {
    input: Capture,
    output: Sender<Vec<u8>>,
}

impl ScriptedEngine {
    fn emit(&self, text: &str) {
        self.output.send(text.as_bytes().to_vec()).unwrap();
    }

    fn ack(&self, commands: usize) {
        self.emit(&"=\n\n".repeat(commands));
    }
}

fn scripted_tree(board: Board) -> (HistoryTree, ScriptedEngine) {
    let input = Capture::default();
    let (tx, rx) = channel::unbounded();
    let reader = GatedReader {
        chunks: rx,
        buf: Cursor::new(Vec::new()),
    };
    let config = EngineConfig {
        auto_analyze: false,
        ..EngineConfig::default()
    };
    let size = board.size();
    let session = EngineSession::from_streams(Box::new(input.clone()), reader, &config, size).unwrap();
    let mut tree = HistoryTree::new(board);
    tree.attach_engine(session, 100);
    (tree, ScriptedEngine { input, output: tx })
}

fn summary_line(size: usize, score_mean: f64) -> String {
    let mut s = format!("info move E5 visits 50 winrate 0.6 scoreMean {score_mean} scoreStdev 11 pv E5 D5 ownership");
    for _ in 0..size * size {
        s.push_str(" 0.25");
    }
    s.push('\n');
    s
}

// =============================================================================
// Board rules
// =============================================================================

#[test]
fn test_single_stone_capture() {
    // White E5 surrounded on all four sides
    let mut board = board_after(&["D5", "E5", "F5", "A1", "E4", "A2"]);
    assert_eq!(board.get(4, 4), Some(Color::White));
    let captured = board.play_vertex(v("E6"), Color::Black).unwrap();
    assert_eq!(captured, 1);
    assert_eq!(board.get(4, 4), None);
    assert_eq!(board.stone_count(), (4, 2));
}

#[test]
fn test_suicide_is_rejected_and_board_unchanged() {
    let mut board = board_after(&["B1", "E5", "A2"]);
    let before = board.clone();
    assert_matches!(
        board.play_vertex(v("A1"), Color::White),
        Err(Error::IllegalMove { color: Color::White, .. })
    );
    assert_eq!(board, before);
}

#[test]
fn test_capture_beats_suicide() {
    // B1 is surrounded by Black, but filling it takes A1's last liberty.
    let mut board = board_after(&["A1", "A2", "C1", "E5", "B2"]);
    assert_eq!(board.play_vertex(v("B1"), Color::White).unwrap(), 1);
    assert_eq!(board.get(8, 0), None);
    assert_eq!(board.get(8, 1), Some(Color::White));
}

#[test]
fn test_groups_and_liberties() {
    let board = board_after(&["D4", "E5", "D5", "F5", "D6"]);
    let chain = chain_at(&board, (3, 3));
    assert_eq!(chain.len(), 3);
    assert_eq!(distinct_liberties(&board, (3, 3)), 7);
    assert_eq!(board.chain_liberties(3, 3), 7);
    // The black column and the white pair
    assert_eq!(all_groups(&board).len(), 2);
}

#[test]
fn test_transposed_sequences_share_a_key() {
    let a = board_after(&["C3", "G7", "C7", "G3"]);
    let b = board_after(&["C7", "G3", "C3", "G7"]);
    assert_eq!(a.key(), b.key());
    let c = board_after(&["C7", "G7", "C3", "G3"]);
    assert_eq!(a.key(), c.key());
}

#[test]
fn test_turn_is_part_of_the_key() {
    let mut a = board_after(&["C3"]);
    let b = board_after(&["C3"]);
    a.pass(Color::White);
    a.pass(Color::Black);
    assert_eq!(a.key(), b.key());
    a.pass(Color::White);
    assert_ne!(a.key(), b.key());
}

// =============================================================================
// History without an engine
// =============================================================================

#[test]
fn test_review_session_round_trip() {
    let game = GameRecord {
        size: 9,
        setup: vec![],
        moves: ["E5", "C3", "G7", "pass"]
            .iter()
            .zip([Color::Black, Color::White].iter().cycle())
            .map(|(m, &c)| (c, v(m)))
            .collect(),
        komi: Some(7.5),
    };
    let mut tree = HistoryTree::from_game(&game).unwrap();
    tree.undo(Relay::LOCAL).unwrap();
    tree.play_move(v("C7"), Color::White, Relay::LOCAL).unwrap();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("review.txt");
    tree.save(&path).unwrap();

    let loaded = HistoryTree::load(&path, 9).unwrap();
    assert_eq!(loaded.moves(), tree.moves());
    assert_eq!(loaded.current_board(), tree.current_board());
}

#[test]
fn test_load_missing_file() {
    let dir = tempfile::tempdir().unwrap();
    assert_matches!(HistoryTree::load(&dir.path().join("nope.txt"), 9), Err(Error::Io(_)));
}

// =============================================================================
// History with a scripted engine
// =============================================================================

#[test]
fn test_moves_are_relayed() {
    let (mut tree, engine) = scripted_tree(Board::new(9));

    tree.play_move(v("E5"), Color::Black, Relay::ANALYZE).unwrap();
    assert_eq!(
        engine.input.take(),
        "stop\nplay B E5\nkata-analyze interval 100 ownership true\n"
    );

    assert_eq!(tree.undo(Relay::ANALYZE).unwrap(), Navigation::Moved);
    assert_eq!(engine.input.take(), "stop\nundo\nkata-analyze interval 100 ownership true\n");

    assert_eq!(tree.go_forward(Relay::TRANSMIT).unwrap(), Navigation::Moved);
    assert_eq!(engine.input.take(), "stop\nplay B E5\n");

    let engine_key = tree.current_board().key();
    tree.play_move(v("D5"), Color::White, Relay::LOCAL).unwrap();
    assert_eq!(engine.input.take(), "");
    // The engine is still on E5
    assert_eq!(tree.engine().unwrap().key(), engine_key);
    assert!(!tree.is_engine_synced());
}

#[test]
fn test_local_step_leaves_engine_out_of_sync() {
    let (mut tree, engine) = scripted_tree(Board::new(9));
    tree.play_move(v("E5"), Color::Black, Relay::ANALYZE).unwrap();
    engine.ack(3);
    tree.play_move(v("D5"), Color::White, Relay::LOCAL).unwrap();

    // Analysis of E5 must not land on D5.
    engine.emit(&summary_line(9, 2.0));
    drop(engine);
    loop {
        match tree.wait_engine() {
            Ok(attached) => assert!(!attached),
            Err(e) => {
                assert_matches!(e, Error::EngineUnavailable(_));
                break;
            }
        }
    }
    assert!(tree.analysis().is_none());
    tree.undo(Relay::LOCAL).unwrap();
    assert!(tree.analysis().is_none());
}

#[test]
fn test_play_board_leaves_engine_out_of_sync() {
    let (mut tree, engine) = scripted_tree(Board::new(9));
    let board = board_after(&["E5"]);
    tree.play_board(board, Move::new(Color::Black, v("E5"))).unwrap();
    assert_eq!(engine.input.take(), "");
    assert!(!tree.is_engine_synced());
    assert_eq!(tree.export(), "B.E5;#");
}

#[test]
fn test_sync_engine_resyncs_after_local_step() {
    let (mut tree, engine) = scripted_tree(Board::new(9));
    tree.play_move(v("E5"), Color::Black, Relay::LOCAL).unwrap();
    assert!(!tree.is_engine_synced());

    tree.sync_engine(7.5, true).unwrap();
    assert!(tree.is_engine_synced());
    assert_eq!(
        engine.input.take(),
        "stop\nboardsize 9\nkomi 7.5\nclear_board\nplay B E5\nkata-analyze interval 100 ownership true\n"
    );
    assert_eq!(tree.engine().unwrap().key(), tree.current_board().key());

    engine.ack(6);
    engine.emit(&summary_line(9, 2.0));
    drop(engine);
    let mut attached = 0;
    while let Ok(a) = tree.wait_engine() {
        attached += usize::from(a);
    }
    assert_eq!(attached, 1);
    assert!(tree.analysis().is_some());
}

#[test]
fn test_analysis_reaches_current_node() {
    let (mut tree, engine) = scripted_tree(Board::new(9));
    tree.play_move(v("E5"), Color::Black, Relay::ANALYZE).unwrap();

    // Analysis of the old position arrives before the acknowledgements.
    engine.emit(&summary_line(9, -7.0));
    engine.ack(3);
    engine.emit(&summary_line(9, 2.0));

    assert!(tree.wait_engine().unwrap());
    let best = tree.analysis().unwrap().best().unwrap();
    assert_eq!(best.score_mean, 2.0);
    // White to move: the score is reported for White
    assert_eq!(tree.current_score_mean(), Some(-2.0));
    assert_eq!(tree.current_board().ownership(0, 0), -0.25);

    drop(engine);
    assert_matches!(tree.wait_engine(), Err(Error::EngineUnavailable(_)));
    assert!(!tree.has_engine());
    // The tree still works without the engine
    tree.play_move(v("D5"), Color::White, Relay::ANALYZE).unwrap();
}

#[test]
fn test_analysis_is_dropped_after_navigation() {
    let (mut tree, engine) = scripted_tree(Board::new(9));
    tree.play_move(v("E5"), Color::Black, Relay::ANALYZE).unwrap();
    tree.undo(Relay::ANALYZE).unwrap();

    // Only the first move's commands are acknowledged.
    engine.ack(3);
    engine.emit(&summary_line(9, 2.0));
    drop(engine);

    assert_matches!(tree.wait_engine(), Err(Error::EngineUnavailable(_)));
    assert!(tree.analysis().is_none());
    tree.go_forward(Relay::LOCAL).unwrap();
    assert!(tree.analysis().is_none());
}

#[test]
fn test_poll_engine_is_non_blocking() {
    let (mut tree, _engine) = scripted_tree(Board::new(9));
    assert_eq!(tree.poll_engine().unwrap(), 0);
}

#[test]
fn test_sync_engine_replays_the_game() {
    let game = GameRecord {
        size: 9,
        setup: vec![(Color::Black, (2, 2))],
        moves: vec![(Color::White, v("E5")), (Color::Black, v("D4"))],
        komi: Some(6.5),
    };
    let tree = HistoryTree::from_game(&game).unwrap();
    let board = tree.node(tree.root()).board().clone();
    let (mut synced, engine) = scripted_tree(board);
    for &(color, vertex) in &game.moves {
        synced.play_move(vertex, color, Relay::LOCAL).unwrap();
    }

    synced.sync_engine(6.5, false).unwrap();
    assert_eq!(
        engine.input.take(),
        "stop\nboardsize 9\nkomi 6.5\nclear_board\nplay B C7\nplay W E5\nplay B D4\n"
    );
    assert_eq!(synced.engine().unwrap().outstanding(), 14);
}

#[test]
fn test_sync_engine_passes_for_side_to_move() {
    // Setup stones end with Black, but Black is to move.
    let board = Board::with_setup(9, &[(Color::White, (2, 2)), (Color::Black, (6, 6))]).unwrap();
    assert_eq!(board.turn(), Color::Black);
    let (mut tree, engine) = scripted_tree(board);

    tree.sync_engine(7.5, false).unwrap();
    assert_eq!(
        engine.input.take(),
        "stop\nboardsize 9\nkomi 7.5\nclear_board\nplay W C7\nplay B G3\nplay W pass\n"
    );

    tree.play_move(v("E5"), Color::Black, Relay::TRANSMIT).unwrap();
    assert_eq!(engine.input.take(), "stop\nplay B E5\n");
}

#[test]
fn test_replayed_moves_reuse_nodes() {
    let mut tree = HistoryTree::new(Board::new(9));
    let mut ids = Vec::new();
    for (c, m) in [(Color::Black, "C3"), (Color::White, "G7"), (Color::Black, "C7")] {
        ids.push(tree.play_move(v(m), c, Relay::LOCAL).unwrap());
    }
    let len = tree.len();
    for _ in 0..3 {
        tree.undo(Relay::LOCAL).unwrap();
    }
    assert_eq!(tree.current(), tree.root());
    assert_eq!(tree.current_board(), &Board::new(9));

    for (i, (c, m)) in [(Color::Black, "C3"), (Color::White, "G7"), (Color::Black, "C7")]
        .into_iter()
        .enumerate()
    {
        assert_eq!(tree.play_move(v(m), c, Relay::LOCAL).unwrap(), ids[i]);
    }
    assert_eq!(tree.len(), len);
}
