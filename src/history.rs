//! Branching game history with per-position analysis.
//!
//! Nodes live in an arena and refer to each other by [`NodeId`]. The tree
//! tracks one current node; moves and navigation act on it and are relayed to
//! the engine when one is attached. Children of a node always hold distinct
//! positions: playing into a position that an existing child already has
//! moves to that child instead of adding a new one.
//!
//! The tree only grows, except for [`HistoryTree::set_root_here`], which
//! keeps the current node's subtree and drops everything else.
//!
//! # Text format
//!
//! [`HistoryTree::export`] writes the path from the root to the current node
//! as `B.D4;W.Q16;…` followed by `#` and the current node's analysis in the
//! engine's summary-line grammar. [`HistoryTree::import`] reads it back.

use std::fs;
use std::path::Path;

use log::{debug, warn};

use crate::analysis::{AnalysisRecord, LineParser, PvEntry};
use crate::board::{Board, Color};
use crate::constants::{DEFAULT_INTERVAL_CS, HISTORY_SEPARATOR, LEVEL_MULTIPLIER, MIN_SCORE_STDEV};
use crate::coord::{format_vertex, parse_vertex, Point, Vertex};
use crate::engine::{EngineEvent, EngineSession};
use crate::error::{Error, Result};

/// Index of a node in the tree's arena.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct Move {
    pub color: Color,
    pub vertex: Vertex,
}

impl Move {
    pub fn new(color: Color, vertex: Vertex) -> Self {
        Self { color, vertex }
    }
}

#[derive(Clone, Debug)]
pub struct HistoryNode {
    board: Board,
    mv: Option<Move>,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    analysis: Option<AnalysisRecord>,
}

impl HistoryNode {
    fn new(board: Board, mv: Option<Move>, parent: Option<NodeId>) -> Self {
        Self {
            board,
            mv,
            parent,
            children: Vec::new(),
            analysis: None,
        }
    }

    pub fn board(&self) -> &Board {
        &self.board
    }

    /// The move that led here from the parent. `None` at the root.
    pub fn mv(&self) -> Option<Move> {
        self.mv
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    pub fn analysis(&self) -> Option<&AnalysisRecord> {
        self.analysis.as_ref()
    }
}

/// Result of a navigation step.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Navigation {
    Moved,
    /// Nothing to move to (undo at the root, forward at a leaf).
    Unchanged,
}

/// What to tell the engine about a move or navigation step.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Relay {
    /// Send the move / undo to the engine.
    pub transmit: bool,
    /// Restart analysis afterwards.
    pub analyze: bool,
}

impl Relay {
    pub const ANALYZE: Relay = Relay {
        transmit: true,
        analyze: true,
    };
    pub const TRANSMIT: Relay = Relay {
        transmit: true,
        analyze: false,
    };
    pub const LOCAL: Relay = Relay {
        transmit: false,
        analyze: false,
    };
}

/// A game as an SGF loader hands it over.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct GameRecord {
    pub size: usize,
    pub setup: Vec<(Color, Point)>,
    pub moves: Vec<(Color, Vertex)>,
    pub komi: Option<f32>,
}

/// Running average: element `k` is the mean of `a[..=k]`.
pub fn cumulate(a: &[f64]) -> Vec<f64> {
    let mut out = Vec::with_capacity(a.len());
    let mut prev = 0.0;
    for (k, &x) in a.iter().enumerate() {
        prev = (k as f64 * prev + x) / (k as f64 + 1.0);
        out.push(prev);
    }
    out
}

#[derive(Debug)]
pub struct HistoryTree {
    nodes: Vec<HistoryNode>,
    root: NodeId,
    current: NodeId,
    engine: Option<EngineSession>,
    /// Whether the engine's position is known to follow the current node.
    /// Cleared by a step that was not transmitted, set again by `sync_engine`.
    engine_synced: bool,
    interval_cs: u32,
}

impl HistoryTree {
    /// A tree holding a single position, with no engine.
    pub fn new(board: Board) -> Self {
        Self {
            nodes: vec![HistoryNode::new(board, None, None)],
            root: NodeId(0),
            current: NodeId(0),
            engine: None,
            engine_synced: true,
            interval_cs: DEFAULT_INTERVAL_CS,
        }
    }

    /// Attach an engine that is already set up for the current position.
    pub fn attach_engine(&mut self, engine: EngineSession, interval_cs: u32) {
        engine.set_key(self.current_board().key());
        self.engine = Some(engine);
        self.engine_synced = true;
        self.interval_cs = interval_cs;
    }

    pub fn detach_engine(&mut self) -> Option<EngineSession> {
        self.engine.take()
    }

    pub fn engine(&self) -> Option<&EngineSession> {
        self.engine.as_ref()
    }

    pub fn has_engine(&self) -> bool {
        self.engine.is_some()
    }

    /// Whether engine analysis is currently accepted. False after a move or
    /// navigation step that was not sent to the engine, until
    /// [`sync_engine`](Self::sync_engine).
    pub fn is_engine_synced(&self) -> bool {
        self.engine.is_some() && self.engine_synced
    }

    /// Bring an attached engine to the current position from scratch: board
    /// size, komi, root stones, then every move down to the current node.
    ///
    /// Root stones are sent as plays, so a pass is added when needed to leave
    /// the engine with the root's player to move.
    pub fn sync_engine(&mut self, komi: f32, analyze: bool) -> Result<()> {
        let Some(engine) = &mut self.engine else {
            return Ok(());
        };
        let root = &self.nodes[self.root.0].board;
        let size = root.size();

        let mut commands: Vec<(Color, Vertex)> = Vec::new();
        for i in 0..size {
            for j in 0..size {
                if let Some(c) = root.get(i, j) {
                    commands.push((c, Vertex::Point(i, j)));
                }
            }
        }
        let engine_turn = commands.last().map_or(Color::Black, |&(c, _)| c.opponent());
        if engine_turn != root.turn() {
            commands.push((engine_turn, Vertex::Pass));
        }
        let path: Vec<NodeId> = Self::path_of(&self.nodes, self.current);
        commands.extend(path.iter().filter_map(|id| self.nodes[id.0].mv).map(|m| (m.color, m.vertex)));

        let interval_cs = self.interval_cs;
        let mut replay = || -> Result<()> {
            engine.stop()?;
            engine.set_boardsize(size)?;
            engine.set_komi(komi)?;
            engine.clear_board()?;
            engine.play_sequence(&commands)?;
            if analyze {
                engine.analyze(interval_cs)?;
            }
            Ok(())
        };
        let result = replay();
        if result.is_ok() {
            self.engine_synced = true;
        }
        self.finish_relay(result, true)
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn current(&self) -> NodeId {
        self.current
    }

    pub fn node(&self, id: NodeId) -> &HistoryNode {
        &self.nodes[id.0]
    }

    pub fn current_node(&self) -> &HistoryNode {
        self.node(self.current)
    }

    pub fn current_board(&self) -> &Board {
        &self.current_node().board
    }

    /// Number of positions in the tree.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn last_move(&self) -> Option<Move> {
        self.current_node().mv
    }

    /// Player to move at the current node.
    pub fn turn(&self) -> Color {
        self.current_board().turn()
    }

    pub fn analysis(&self) -> Option<&AnalysisRecord> {
        self.current_node().analysis.as_ref()
    }

    /// Principal variations at the current node, best first.
    pub fn pv(&self) -> &[PvEntry] {
        self.analysis().map(|a| a.entries()).unwrap_or(&[])
    }

    /// The variation starting at `(i, j)` in the current analysis.
    pub fn move_info(&self, i: usize, j: usize) -> Option<&PvEntry> {
        self.analysis()?.entry_at((i, j))
    }

    fn path_of(nodes: &[HistoryNode], from: NodeId) -> Vec<NodeId> {
        let mut path = vec![from];
        let mut cur = from;
        while let Some(p) = nodes[cur.0].parent {
            path.push(p);
            cur = p;
        }
        path.reverse();
        path
    }

    /// Nodes from the root down to the current node, both included.
    pub fn path(&self) -> Vec<NodeId> {
        Self::path_of(&self.nodes, self.current)
    }

    /// Moves from the root down to the current node.
    pub fn moves(&self) -> Vec<Move> {
        self.path().iter().filter_map(|id| self.nodes[id.0].mv).collect()
    }

    /// Register the current position with the engine after a transmitted
    /// step, or drop the engine if relaying failed.
    fn finish_relay(&mut self, result: Result<()>, transmitted: bool) -> Result<()> {
        if let Err(e) = result {
            warn!("engine lost, continuing without it: {e}");
            self.engine = None;
            return Err(e);
        }
        let key = self.current_board().key();
        match &self.engine {
            Some(engine) if transmitted => {
                if self.engine_synced {
                    engine.set_key(key);
                }
            }
            Some(engine) => {
                if self.engine_synced {
                    debug!("engine left behind at {:016x}", engine.key());
                }
                self.engine_synced = false;
            }
            None => {}
        }
        Ok(())
    }

    fn relay_with<F>(&mut self, relay: Relay, send: F) -> Result<()>
    where
        F: FnOnce(&EngineSession) -> Result<()>,
    {
        let result = match &self.engine {
            Some(engine) if relay.transmit => engine.stop().and_then(|_| send(engine)).and_then(|_| {
                if relay.analyze {
                    engine.analyze(self.interval_cs)
                } else {
                    Ok(())
                }
            }),
            _ => Ok(()),
        };
        self.finish_relay(result, relay.transmit)
    }

    /// Move to the child holding `board`'s position, creating it if needed.
    ///
    /// `board` must be the position `mv` produces from the current one;
    /// anything else is rejected with `MalformedHistory` and the tree is left
    /// as it was. Nothing is sent to the engine, which is left out of sync.
    pub fn play_board(&mut self, board: Board, mv: Move) -> Result<NodeId> {
        let mut expected = self.current_board().clone();
        expected.play_vertex(mv.vertex, mv.color)?;
        if expected.key() != board.key() {
            return Err(Error::MalformedHistory(format!(
                "{} {} does not lead to the given board",
                mv.color,
                format_vertex(mv.vertex, board.size())
            )));
        }
        let id = self.enter_child(board, mv);
        self.finish_relay(Ok(()), false)?;
        Ok(id)
    }

    fn enter_child(&mut self, mut board: Board, mv: Move) -> NodeId {
        let key = board.key();
        let existing = self.nodes[self.current.0]
            .children
            .iter()
            .copied()
            .find(|c| self.nodes[c.0].board.key() == key);

        let id = match existing {
            Some(id) => id,
            None => {
                board.clear_ownership();
                let id = NodeId(self.nodes.len());
                self.nodes.push(HistoryNode::new(board, Some(mv), Some(self.current)));
                self.nodes[self.current.0].children.push(id);
                id
            }
        };
        self.current = id;
        id
    }

    /// Play a move from the current position.
    ///
    /// On `IllegalMove` nothing changes. On `EngineUnavailable` the move is
    /// kept and the tree carries on without an engine.
    pub fn play_move(&mut self, vertex: Vertex, color: Color, relay: Relay) -> Result<NodeId> {
        let mut board = self.current_board().clone();
        board.play_vertex(vertex, color)?;

        let id = self.enter_child(board, Move::new(color, vertex));
        self.relay_with(relay, |engine| engine.play(color, vertex))?;
        Ok(id)
    }

    /// Step back to the parent.
    pub fn undo(&mut self, relay: Relay) -> Result<Navigation> {
        let Some(parent) = self.current_node().parent else {
            return Ok(Navigation::Unchanged);
        };
        self.current = parent;
        self.relay_with(relay, |engine| engine.undo())?;
        Ok(Navigation::Moved)
    }

    /// Step into the first (main line) child.
    pub fn go_forward(&mut self, relay: Relay) -> Result<Navigation> {
        let Some(&child) = self.current_node().children.first() else {
            return Ok(Navigation::Unchanged);
        };
        self.current = child;
        let mv = self.nodes[child.0].mv;
        self.relay_with(relay, |engine| match mv {
            Some(m) => engine.play(m.color, m.vertex),
            None => Ok(()),
        })?;
        Ok(Navigation::Moved)
    }

    /// Walk back to the root, undoing each step on the engine if `relay`
    /// transmits. Analysis is restarted once at the end if requested.
    pub fn go_to_root(&mut self, relay: Relay) -> Result<()> {
        let step = Relay {
            transmit: relay.transmit,
            analyze: false,
        };
        while self.undo(step)? == Navigation::Moved {}
        if relay.transmit && relay.analyze {
            let result = match &self.engine {
                Some(engine) => engine.analyze(self.interval_cs),
                None => Ok(()),
            };
            self.finish_relay(result, true)?;
        }
        Ok(())
    }

    /// Make the current node the root, discarding its ancestors and every
    /// branch not below it.
    pub fn set_root_here(&mut self) {
        let mut order = vec![self.current];
        let mut k = 0;
        while k < order.len() {
            order.extend(self.nodes[order[k].0].children.iter().copied());
            k += 1;
        }

        let mut remap: Vec<Option<NodeId>> = vec![None; self.nodes.len()];
        for (new, old) in order.iter().enumerate() {
            remap[old.0] = Some(NodeId(new));
        }

        let mut slots: Vec<Option<HistoryNode>> = std::mem::take(&mut self.nodes).into_iter().map(Some).collect();
        self.nodes = order
            .iter()
            .filter_map(|old| slots[old.0].take())
            .map(|mut node| {
                node.parent = node.parent.and_then(|p| remap[p.0]);
                node.children = node.children.iter().filter_map(|c| remap[c.0]).collect();
                node
            })
            .collect();
        self.nodes[0].mv = None;
        self.root = NodeId(0);
        self.current = NodeId(0);
        debug!("rebased history, {} nodes kept", self.nodes.len());
    }

    /// Store an analysis on the current node if it was computed for the
    /// current position. Returns whether it was kept.
    pub fn attach_analysis(&mut self, record: AnalysisRecord, key: u64) -> bool {
        let board = self.current_board();
        if key != board.key() || record.size() != board.size() {
            debug!("discarding stale analysis for {key:016x}");
            return false;
        }
        let current = self.current;
        self.set_analysis(current, record);
        true
    }

    /// Store an analysis on a node without checking it against the engine,
    /// for records known to belong there (e.g. loaded from disk).
    pub fn set_analysis(&mut self, id: NodeId, record: AnalysisRecord) {
        let node = &mut self.nodes[id.0];
        node.board.load_ownership(record.ownership());
        node.analysis = Some(record);
    }

    fn apply_event(&mut self, event: EngineEvent) -> Result<bool> {
        match event {
            EngineEvent::Analysis { .. } if !self.engine_synced => {
                debug!("discarding analysis, engine out of sync");
                Ok(false)
            }
            EngineEvent::Analysis { record, key } => Ok(self.attach_analysis(record, key)),
            EngineEvent::Exited => {
                self.engine = None;
                Err(Error::EngineUnavailable("engine exited".into()))
            }
        }
    }

    /// Apply every pending engine event. Returns how many analyses were kept.
    pub fn poll_engine(&mut self) -> Result<usize> {
        let mut applied = 0;
        loop {
            let Some(event) = self.engine.as_ref().and_then(EngineSession::try_recv) else {
                break;
            };
            if self.apply_event(event)? {
                applied += 1;
            }
        }
        Ok(applied)
    }

    /// Block for the next engine event and apply it. Returns whether an
    /// analysis was kept; `Ok(false)` without an engine.
    pub fn wait_engine(&mut self) -> Result<bool> {
        let event = match &self.engine {
            Some(engine) => engine.recv(),
            None => return Ok(false),
        };
        match event {
            Ok(ev) => self.apply_event(ev),
            Err(e) => {
                self.engine = None;
                Err(e)
            }
        }
    }

    /// Best score mean at `id`.
    ///
    /// With `absolute` the score is from Black's point of view, otherwise from
    /// the point of view of the player to move there. `normalized` divides by
    /// the score standard deviation, floored at [`MIN_SCORE_STDEV`].
    pub fn score_mean(&self, id: NodeId, absolute: bool, normalized: bool) -> Option<f64> {
        let node = &self.nodes[id.0];
        let best = node.analysis.as_ref()?.best()?;
        let mut value = best.score_mean;
        if absolute {
            value *= node.board.turn().sign();
        }
        if normalized {
            value /= best.score_stdev.max(MIN_SCORE_STDEV);
        }
        Some(value)
    }

    pub fn score_stdev(&self, id: NodeId) -> Option<f64> {
        Some(self.nodes[id.0].analysis.as_ref()?.best()?.score_stdev)
    }

    pub fn current_score_mean(&self) -> Option<f64> {
        self.score_mean(self.current, true, false)
    }

    fn sequence_with<F>(&self, value: F) -> Vec<f64>
    where
        F: Fn(NodeId) -> Option<f64>,
    {
        let mut prev = 0.0;
        self.path()
            .into_iter()
            .map(|id| {
                prev = value(id).unwrap_or(prev);
                prev
            })
            .collect()
    }

    /// Black's score from the root to the current node. Nodes without
    /// analysis repeat the previous value (0 before the first).
    pub fn score_sequence(&self) -> Vec<f64> {
        self.sequence_with(|id| self.score_mean(id, true, false))
    }

    /// Score standard deviations from the root to the current node, with the
    /// same fallback as [`score_sequence`](Self::score_sequence).
    pub fn score_stdev_sequence(&self) -> Vec<f64> {
        self.sequence_with(|id| self.score_stdev(id))
    }

    /// Points lost by the player to move with the main-line move from here.
    ///
    /// Positive means the move made things worse for its player.
    pub fn local_loss(&self, normalized: bool) -> Option<f64> {
        let cur = self.current;
        let next = *self.nodes[cur.0].children.first()?;
        let before = self.score_mean(cur, true, false)?;
        let after = self.score_mean(next, true, false)?;
        let mover = self.nodes[cur.0].board.turn();
        let mut loss = mover.sign() * (before - after);
        if normalized {
            let stdev = self.score_stdev(cur).unwrap_or(MIN_SCORE_STDEV);
            loss /= stdev.max(MIN_SCORE_STDEV);
        }
        Some(loss)
    }

    /// Per-move losses of `color` along the path to the current node.
    ///
    /// Swings smaller than `forget_barrier` count as zero.
    pub fn loss_list(&self, color: Color, normalized: bool, forget_barrier: f64) -> Vec<f64> {
        let path = self.path();
        let scores = self.score_sequence();
        let stdevs = self.score_stdev_sequence();

        let mut losses = Vec::new();
        for k in 0..path.len().saturating_sub(1) {
            let mover = self.nodes[path[k].0].board.turn();
            if mover != color {
                continue;
            }
            let mut loss = mover.sign() * (scores[k] - scores[k + 1]);
            if loss.abs() < forget_barrier {
                loss = 0.0;
            }
            if normalized {
                loss /= stdevs[k].max(MIN_SCORE_STDEV);
            }
            losses.push(loss);
        }
        losses
    }

    /// Scaled average normalised loss of `color`; lower is stronger.
    pub fn guess_level(&self, color: Color, forget_barrier: f64) -> Option<f64> {
        let losses = self.loss_list(color, true, forget_barrier);
        cumulate(&losses).last().map(|avg| LEVEL_MULTIPLIER * avg)
    }

    /// Serialize the path to the current node and its analysis.
    pub fn export(&self) -> String {
        let size = self.current_board().size();
        let mut out = String::new();
        for m in self.moves() {
            out.push(m.color.letter());
            out.push('.');
            out.push_str(&format_vertex(m.vertex, size));
            out.push(';');
        }
        out.push(HISTORY_SEPARATOR);
        if let Some(record) = self.analysis() {
            out.push_str(&record.to_line());
        }
        out
    }

    /// Rebuild a history from [`export`](Self::export) output on an empty
    /// board of `size`. The tree has no engine attached.
    pub fn import(size: usize, text: &str) -> Result<Self> {
        let (moves, analysis) = text
            .split_once(HISTORY_SEPARATOR)
            .ok_or_else(|| Error::MalformedHistory(format!("missing '{HISTORY_SEPARATOR}'")))?;

        let mut tree = HistoryTree::new(Board::new(size));
        for item in moves.split(';').map(str::trim).filter(|s| !s.is_empty()) {
            let (c, v) = item
                .split_once('.')
                .ok_or_else(|| Error::MalformedHistory(format!("bad move '{item}'")))?;
            let color = Color::parse(c).ok_or_else(|| Error::MalformedHistory(format!("bad color '{c}'")))?;
            let vertex = parse_vertex(v, size).ok_or_else(|| Error::InvalidCoordinate(v.to_string()))?;
            tree.play_move(vertex, color, Relay::LOCAL)?;
        }

        let analysis = analysis.trim();
        if !analysis.is_empty() {
            let record = LineParser::new(size)
                .parse(analysis)
                .ok_or_else(|| Error::MalformedHistory("unreadable analysis".into()))?;
            let current = tree.current;
            tree.set_analysis(current, record);
        }
        Ok(tree)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        fs::write(path, self.export())?;
        Ok(())
    }

    pub fn load(path: &Path, size: usize) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        Self::import(size, &text)
    }

    /// Build a history from a loaded game: setup stones on the root, then
    /// every move along the main line. Current ends at the last move.
    pub fn from_game(game: &GameRecord) -> Result<Self> {
        let mut board = Board::with_setup(game.size, &game.setup)?;
        if let Some(&(first, _)) = game.moves.first() {
            board.set_turn(first);
        }
        let mut tree = HistoryTree::new(board);
        for &(color, vertex) in &game.moves {
            tree.play_move(vertex, color, Relay::LOCAL)?;
        }
        Ok(tree)
    }
}
