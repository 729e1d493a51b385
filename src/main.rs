//! Goban-Review: review a Go game with an analysis engine.
//!
//! ## Usage
//!
//! - `goban-review review` - Interactive review, analysed by the configured engine
//! - `goban-review review --load game.txt` - Continue a saved review
//! - `goban-review show game.txt` - Print a saved review and exit

use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use log::{info, warn};

use goban_review::board::{Board, Color};
use goban_review::config::AppConfig;
use goban_review::constants::FORGET_BARRIER;
use goban_review::coord::{format_vertex, parse_vertex, Vertex};
use goban_review::engine::EngineSession;
use goban_review::history::{HistoryTree, Navigation, Relay};
use goban_review::logging::setup_logging;

/// Goban-Review: a Go game reviewer
#[derive(Parser)]
#[command(name = "goban-review")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// JSON configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
    /// Run without an engine
    #[arg(long, global = true)]
    engine_off: bool,
    /// Board size (overrides the configuration)
    #[arg(long, global = true)]
    size: Option<usize>,
    /// Komi (overrides the configuration)
    #[arg(long, global = true)]
    komi: Option<f32>,
    /// Analysis reporting interval in centiseconds
    #[arg(long, global = true)]
    interval: Option<u32>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Review interactively
    Review {
        /// Saved review to start from
        #[arg(long)]
        load: Option<PathBuf>,
    },
    /// Print a saved review
    Show { file: PathBuf },
}

fn load_config(cli: &Cli) -> anyhow::Result<AppConfig> {
    let mut config = match &cli.config {
        Some(path) => AppConfig::load(path).with_context(|| format!("loading {}", path.display()))?,
        None => AppConfig::default(),
    };
    if let Some(size) = cli.size {
        config.board_size = size;
    }
    if let Some(komi) = cli.komi {
        config.komi = komi;
    }
    if let Some(interval) = cli.interval {
        config.engine.interval_cs = interval;
    }
    config.validate()?;
    Ok(config)
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli)?;
    let _logger = setup_logging(&config.log_level, config.log_dir.as_deref())?;

    match &cli.command {
        Commands::Review { load } => {
            let tree = match load {
                Some(path) => open(path, config.board_size)?,
                None => HistoryTree::new(Board::new(config.board_size)),
            };
            review(tree, &config, cli.engine_off)
        }
        Commands::Show { file } => {
            let tree = open(file, config.board_size)?;
            print_position(&tree);
            print_scores(&tree);
            Ok(())
        }
    }
}

fn open(path: &Path, size: usize) -> anyhow::Result<HistoryTree> {
    HistoryTree::load(path, size).with_context(|| format!("reading {}", path.display()))
}

fn start_engine(tree: &mut HistoryTree, config: &AppConfig) {
    if config.engine.binary.is_none() {
        info!("no engine configured, reviewing without analysis");
        return;
    }
    let session = match EngineSession::spawn(&config.engine, config.board_size) {
        Ok(s) => s,
        Err(e) => {
            warn!("{e}; reviewing without analysis");
            return;
        }
    };
    tree.attach_engine(session, config.engine.interval_cs);
    if let Err(e) = tree.sync_engine(config.komi, true) {
        warn!("{e}; reviewing without analysis");
    }
}

fn review(mut tree: HistoryTree, config: &AppConfig, engine_off: bool) -> anyhow::Result<()> {
    if !engine_off {
        start_engine(&mut tree, config);
    }
    let relay = if tree.has_engine() { Relay::ANALYZE } else { Relay::LOCAL };

    print_position(&tree);
    let stdin = io::stdin();
    let mut lines = stdin.lock().lines();
    loop {
        print!("{}> ", tree.turn());
        io::stdout().flush()?;
        let Some(line) = lines.next() else {
            break;
        };
        let line = line?;

        match run_command(&mut tree, relay, line.trim()) {
            Ok(true) => {}
            Ok(false) => break,
            Err(e) => println!("? {e}"),
        }
        if let Err(e) = tree.poll_engine() {
            warn!("{e}");
        }
    }
    Ok(())
}

/// Execute one review command. Returns `false` when the session should end.
fn run_command(tree: &mut HistoryTree, relay: Relay, line: &str) -> anyhow::Result<bool> {
    let mut parts = line.split_whitespace();
    let Some(cmd) = parts.next() else {
        return Ok(true);
    };
    let arg = parts.next();
    let size = tree.current_board().size();

    match cmd {
        "quit" | "q" => return Ok(false),
        "play" | "p" => {
            let Some(coord) = arg else {
                bail!("usage: play <vertex> [b|w]");
            };
            let vertex = parse_vertex(coord, size).with_context(|| format!("bad vertex '{coord}'"))?;
            let color = match parts.next() {
                Some(c) => Color::parse(c).with_context(|| format!("bad color '{c}'"))?,
                None => tree.turn(),
            };
            tree.play_move(vertex, color, relay)?;
            print_position(tree);
        }
        "pass" => {
            let color = tree.turn();
            tree.play_move(Vertex::Pass, color, relay)?;
            print_position(tree);
        }
        "undo" | "u" => {
            if tree.undo(relay)? == Navigation::Unchanged {
                println!("at the root");
            }
            print_position(tree);
        }
        "next" | "n" => {
            if tree.go_forward(relay)? == Navigation::Unchanged {
                println!("no further moves");
            }
            print_position(tree);
        }
        "root" => {
            tree.go_to_root(relay)?;
            print_position(tree);
        }
        "rebase" => {
            tree.set_root_here();
            println!("{} positions kept", tree.len());
        }
        "show" | "s" => print_position(tree),
        "pv" => print_pv(tree),
        "scores" => print_scores(tree),
        "save" => {
            let Some(path) = arg else {
                bail!("usage: save <file>");
            };
            tree.save(Path::new(path)).with_context(|| format!("writing {path}"))?;
            println!("saved {path}");
        }
        "help" | "h" => {
            println!("play <vertex> [b|w], pass, undo, next, root, rebase, show, pv, scores, save <file>, quit");
        }
        other => bail!("unknown command '{other}'"),
    }
    Ok(true)
}

fn print_position(tree: &HistoryTree) {
    let board = tree.current_board();
    println!("{board}");
    if let Some(m) = tree.last_move() {
        println!("last move: {} {}", m.color, format_vertex(m.vertex, board.size()));
    }
    if let Some(score) = tree.current_score_mean() {
        println!("score (Black): {score:+.1}");
    }
}

fn print_pv(tree: &HistoryTree) {
    let size = tree.current_board().size();
    if tree.pv().is_empty() {
        println!("no analysis yet");
        return;
    }
    for entry in tree.pv() {
        let moves: Vec<String> = entry.moves.iter().map(|&v| format_vertex(v, size)).collect();
        println!(
            "{:>7} visits  {:5.1}%  {:+6.1} ±{:4.1}  {}",
            entry.visits,
            entry.winrate * 100.0,
            entry.score_mean,
            entry.score_stdev,
            moves.join(" ")
        );
    }
}

fn print_scores(tree: &HistoryTree) {
    let scores: Vec<String> = tree.score_sequence().iter().map(|s| format!("{s:+.1}")).collect();
    println!("scores: {}", scores.join(" "));
    for color in [Color::Black, Color::White] {
        let losses = tree.loss_list(color, false, FORGET_BARRIER);
        let total: f64 = losses.iter().sum();
        match tree.guess_level(color, FORGET_BARRIER) {
            Some(level) => println!("{color}: {total:.1} points lost over {} moves, level {level:.0}", losses.len()),
            None => println!("{color}: no moves"),
        }
    }
}
