//! Session with an external analysis engine speaking GTP plus `kata-analyze`.
//!
//! Commands are written to the engine's stdin from the caller's thread. A
//! background thread drains stdout line by line, parses analysis lines, and
//! hands finished records to the caller over a channel as [`EngineEvent`]s.
//!
//! Every command is expected to produce [`ACK_LINES`] lines of output. The
//! session counts lines sent for and lines received; while the engine is
//! behind, parsed records belong to a position the caller has already left
//! and are dropped. Once it has caught up, records are published stamped
//! with the position key the caller last registered with [`EngineSession::set_key`].
//!
//! There is no response timeout. A dead engine surfaces as
//! [`EngineEvent::Exited`]; a failed write as [`Error::EngineUnavailable`].

use std::fmt;
use std::io::{BufRead, BufReader, Read, Write};
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam::channel::{self, Receiver, Sender, TryRecvError};
use log::{debug, info, trace, warn};

use crate::analysis::{AnalysisRecord, LineParser};
use crate::board::Color;
use crate::config::EngineConfig;
use crate::constants::{ACK_LINES, QUIT_GRACE_MS};
use crate::coord::{format_vertex, Vertex};
use crate::error::{Error, Result};

/// Notification from the reader thread.
#[derive(Clone, Debug, PartialEq)]
pub enum EngineEvent {
    /// A complete analysis, computed for the position registered under `key`.
    Analysis { record: AnalysisRecord, key: u64 },
    /// The engine closed its output.
    Exited,
}

/// State shared between the caller and the reader thread.
struct Shared {
    writer: Mutex<Box<dyn Write + Send>>,
    /// Response lines owed for commands sent so far.
    sent: AtomicI64,
    /// Response lines seen, never ahead of `sent`.
    received: AtomicI64,
    searching: AtomicBool,
    key: AtomicU64,
    interval_cs: AtomicU32,
    config: EngineConfig,
}

impl Shared {
    fn new(writer: Box<dyn Write + Send>, config: &EngineConfig) -> Self {
        Self {
            writer: Mutex::new(writer),
            sent: AtomicI64::new(0),
            received: AtomicI64::new(-config.startup_lines),
            searching: AtomicBool::new(false),
            key: AtomicU64::new(0),
            interval_cs: AtomicU32::new(config.interval_cs),
            config: config.clone(),
        }
    }

    /// Write one command. The lines it owes are counted before the write,
    /// since the engine may answer before the flush returns.
    fn send_command(&self, cmd: &str) -> Result<()> {
        let mut writer = self
            .writer
            .lock()
            .map_err(|_| Error::EngineUnavailable("writer lock poisoned".into()))?;
        self.sent.fetch_add(ACK_LINES, Ordering::SeqCst);
        if let Err(e) = writeln!(writer, "{cmd}").and_then(|_| writer.flush()) {
            self.sent.fetch_sub(ACK_LINES, Ordering::SeqCst);
            return Err(Error::EngineUnavailable(format!("write failed: {e}")));
        }
        debug!("> {cmd}");
        Ok(())
    }

    fn analyze(&self, interval_cs: u32) -> Result<()> {
        self.interval_cs.store(interval_cs, Ordering::SeqCst);
        self.searching.store(true, Ordering::SeqCst);
        self.send_command(&self.config.analysis_command(interval_cs))
    }

    fn stop(&self) -> Result<()> {
        self.searching.store(false, Ordering::SeqCst);
        self.send_command("stop")
    }

    fn mark_received(&self) {
        let sent = self.sent.load(Ordering::SeqCst);
        let _ = self
            .received
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |r| (r < sent).then_some(r + 1));
    }

    fn outstanding(&self) -> i64 {
        self.sent.load(Ordering::SeqCst) - self.received.load(Ordering::SeqCst)
    }

    fn is_caught_up(&self) -> bool {
        self.outstanding() == 0
    }

    /// Account for one line of engine output and decide what to publish.
    fn on_line(&self, parser: &LineParser, line: &str) -> Option<EngineEvent> {
        self.mark_received();
        trace!("< {line}");

        let caught_up = self.is_caught_up();
        match parser.parse(line) {
            Some(record) if caught_up => Some(EngineEvent::Analysis {
                record,
                key: self.key.load(Ordering::SeqCst),
            }),
            Some(_) => {
                debug!("dropping analysis, {} lines behind", self.outstanding());
                None
            }
            None => {
                if self.config.auto_analyze && caught_up && !self.searching.load(Ordering::SeqCst) {
                    let interval = self.interval_cs.load(Ordering::SeqCst);
                    if let Err(e) = self.analyze(interval) {
                        warn!("could not resume analysis: {e}");
                    }
                }
                None
            }
        }
    }
}

fn drain_output<R: BufRead>(shared: Arc<Shared>, parser: LineParser, mut reader: R, events: Sender<EngineEvent>) {
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf) {
            Ok(0) => break,
            Ok(_) => {}
            Err(e) => {
                warn!("engine read failed: {e}");
                break;
            }
        }
        // Invalid UTF-8 still counts as a response line; it just never parses.
        let line = String::from_utf8_lossy(&buf);
        if let Some(ev) = shared.on_line(&parser, line.trim_end()) {
            if events.send(ev).is_err() {
                return;
            }
        }
    }
    info!("engine output closed");
    let _ = events.send(EngineEvent::Exited);
}

fn drain_stderr<R: BufRead>(reader: R) {
    for line in reader.lines().map_while(|l| l.ok()) {
        debug!("engine: {line}");
    }
}

/// A running engine.
///
/// Dropping the session sends `quit`, kills the process if it is still
/// alive, and joins the reader threads.
pub struct EngineSession {
    shared: Arc<Shared>,
    events: Receiver<EngineEvent>,
    child: Option<Child>,
    readers: Vec<JoinHandle<()>>,
    size: usize,
}

impl EngineSession {
    /// Launch the engine described by `config` for a board of `size`.
    pub fn spawn(config: &EngineConfig, size: usize) -> Result<Self> {
        let binary = config
            .binary
            .as_ref()
            .ok_or_else(|| Error::EngineUnavailable("no engine binary configured".into()))?;

        let mut cmd = Command::new(binary);
        cmd.arg("gtp");
        if let Some(model) = &config.model {
            cmd.arg("-model").arg(model);
        }
        if let Some(cfg) = &config.config {
            cmd.arg("-config").arg(cfg);
        }
        cmd.args(&config.extra_args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        info!("starting engine {}", binary.display());
        let mut child = cmd
            .spawn()
            .map_err(|e| Error::EngineUnavailable(format!("{}: {e}", binary.display())))?;

        let (Some(stdin), Some(stdout), Some(stderr)) =
            (child.stdin.take(), child.stdout.take(), child.stderr.take())
        else {
            let _ = child.kill();
            let _ = child.wait();
            return Err(Error::EngineUnavailable("engine pipes unavailable".into()));
        };

        let mut session = Self::from_streams(Box::new(stdin), stdout, config, size)?;
        let handle = thread::Builder::new()
            .name("engine-stderr".into())
            .spawn(move || drain_stderr(BufReader::new(stderr)))?;
        session.readers.push(handle);
        session.child = Some(child);
        Ok(session)
    }

    /// Drive an engine over arbitrary streams. `output` is drained on a
    /// background thread.
    pub fn from_streams<R>(
        input: Box<dyn Write + Send>,
        output: R,
        config: &EngineConfig,
        size: usize,
    ) -> Result<Self>
    where
        R: Read + Send + 'static,
    {
        let shared = Arc::new(Shared::new(input, config));
        let (tx, rx) = channel::unbounded();
        let parser = LineParser::new(size);

        let reader_shared = Arc::clone(&shared);
        let handle = thread::Builder::new()
            .name("engine-stdout".into())
            .spawn(move || drain_output(reader_shared, parser, BufReader::new(output), tx))?;

        Ok(Self {
            shared,
            events: rx,
            child: None,
            readers: vec![handle],
            size,
        })
    }

    /// Send a raw command line. The engine owes [`ACK_LINES`] lines for it.
    pub fn send_command(&self, cmd: &str) -> Result<()> {
        self.shared.send_command(cmd)
    }

    pub fn set_boardsize(&mut self, size: usize) -> Result<()> {
        self.size = size;
        self.send_command(&format!("boardsize {size}"))
    }

    pub fn set_komi(&self, komi: f32) -> Result<()> {
        self.send_command(&format!("komi {komi}"))
    }

    pub fn play(&self, color: Color, vertex: Vertex) -> Result<()> {
        self.send_command(&format!("play {} {}", color.letter(), format_vertex(vertex, self.size)))
    }

    pub fn play_sequence(&self, moves: &[(Color, Vertex)]) -> Result<()> {
        for &(color, vertex) in moves {
            self.play(color, vertex)?;
        }
        Ok(())
    }

    pub fn undo(&self) -> Result<()> {
        self.send_command("undo")
    }

    pub fn clear_board(&self) -> Result<()> {
        self.send_command("clear_board")
    }

    pub fn clear_cache(&self) -> Result<()> {
        self.send_command("clear_cache")
    }

    /// Stop a running analysis.
    pub fn stop(&self) -> Result<()> {
        self.shared.stop()
    }

    /// Start continuous analysis, reporting every `interval_cs` centiseconds.
    pub fn analyze(&self, interval_cs: u32) -> Result<()> {
        self.shared.analyze(interval_cs)
    }

    /// Ask the engine to exit.
    pub fn close(&self) -> Result<()> {
        self.send_command("quit")
    }

    /// Register the key of the position the engine is now looking at.
    pub fn set_key(&self, key: u64) {
        self.shared.key.store(key, Ordering::SeqCst);
    }

    pub fn key(&self) -> u64 {
        self.shared.key.load(Ordering::SeqCst)
    }

    pub fn is_searching(&self) -> bool {
        self.shared.searching.load(Ordering::SeqCst)
    }

    /// Whether every response owed so far has arrived.
    pub fn is_caught_up(&self) -> bool {
        self.shared.is_caught_up()
    }

    /// Response lines still owed by the engine.
    pub fn outstanding(&self) -> i64 {
        self.shared.outstanding()
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Next event if one is ready.
    pub fn try_recv(&self) -> Option<EngineEvent> {
        match self.events.try_recv() {
            Ok(ev) => Some(ev),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => Some(EngineEvent::Exited),
        }
    }

    /// Block until the next event.
    pub fn recv(&self) -> Result<EngineEvent> {
        self.events
            .recv()
            .map_err(|_| Error::EngineUnavailable("engine reader stopped".into()))
    }

    /// The raw event channel, for use in a `select!`.
    pub fn events(&self) -> &Receiver<EngineEvent> {
        &self.events
    }
}

impl fmt::Debug for EngineSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineSession")
            .field("size", &self.size)
            .field("key", &self.key())
            .field("searching", &self.is_searching())
            .field("outstanding", &self.outstanding())
            .field("pid", &self.child.as_ref().map(Child::id))
            .finish_non_exhaustive()
    }
}

/// Give a child that was asked to quit some time to exit on its own.
fn wait_for_exit(child: &mut Child, grace: Duration) -> bool {
    let deadline = Instant::now() + grace;
    while Instant::now() < deadline {
        match child.try_wait() {
            Ok(Some(_)) => return true,
            Ok(None) => thread::sleep(Duration::from_millis(10)),
            Err(_) => return false,
        }
    }
    false
}

impl Drop for EngineSession {
    fn drop(&mut self) {
        let _ = self.shared.send_command("quit");
        let mut stopped = false;
        if let Some(child) = &mut self.child {
            if !wait_for_exit(child, Duration::from_millis(QUIT_GRACE_MS)) {
                warn!("engine ignored quit, killing it");
                let _ = child.kill();
            }
            let _ = child.wait();
            stopped = true;
            info!("engine stopped");
        }
        for handle in self.readers.drain(..) {
            if stopped || handle.is_finished() {
                let _ = handle.join();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    /// Writer that keeps everything in a shared buffer.
    #[derive(Clone, Default)]
    struct Capture(Arc<Mutex<Vec<u8>>>);

    impl Write for Capture {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl Capture {
        fn text(&self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
        }
    }

    fn quiet_config() -> EngineConfig {
        EngineConfig {
            auto_analyze: false,
            ..EngineConfig::default()
        }
    }

    fn summary_line(size: usize) -> String {
        let mut s = String::from("info visits 10 winrate 0.5 scoreMean 0.5 scoreStdev 8 pv A1 ownership");
        for _ in 0..size * size {
            s.push_str(" 0.5");
        }
        s
    }

    #[test]
    fn test_commands_are_formatted() {
        let capture = Capture::default();
        let session =
            EngineSession::from_streams(Box::new(capture.clone()), Cursor::new(Vec::new()), &quiet_config(), 9)
                .unwrap();
        session.play(Color::Black, Vertex::Point(5, 3)).unwrap();
        session.play(Color::White, Vertex::Pass).unwrap();
        session.undo().unwrap();
        session.analyze(50).unwrap();
        assert!(session.is_searching());
        session.stop().unwrap();
        assert!(!session.is_searching());
        assert_eq!(
            capture.text(),
            "play B D4\nplay W pass\nundo\nkata-analyze interval 50 ownership true\nstop\n"
        );
    }

    #[test]
    fn test_stale_record_is_dropped_until_caught_up() {
        let shared = Shared::new(Box::new(Capture::default()), &quiet_config());
        let parser = LineParser::new(9);
        let line = summary_line(9);

        shared.send_command("play B E5").unwrap();
        assert_eq!(shared.outstanding(), 2);

        // Analysis of the previous position arrives before the acknowledgement.
        assert_eq!(shared.on_line(&parser, &line), None);
        assert_eq!(shared.on_line(&parser, "="), None);
        assert!(shared.is_caught_up());

        shared.key.store(42, Ordering::SeqCst);
        match shared.on_line(&parser, &line) {
            Some(EngineEvent::Analysis { key, record }) => {
                assert_eq!(key, 42);
                assert_eq!(record.entries().len(), 1);
            }
            other => panic!("expected analysis, got {other:?}"),
        }
    }

    #[test]
    fn test_received_never_runs_ahead() {
        let shared = Shared::new(Box::new(Capture::default()), &quiet_config());
        let parser = LineParser::new(9);
        for _ in 0..5 {
            shared.on_line(&parser, "");
        }
        assert_eq!(shared.outstanding(), 0);
        shared.send_command("undo").unwrap();
        assert_eq!(shared.outstanding(), 2);
    }

    #[test]
    fn test_startup_lines_are_owed() {
        let config = EngineConfig {
            startup_lines: 3,
            ..quiet_config()
        };
        let shared = Shared::new(Box::new(Capture::default()), &config);
        let parser = LineParser::new(9);
        assert_eq!(shared.outstanding(), 3);
        for _ in 0..3 {
            shared.on_line(&parser, "banner");
        }
        assert!(shared.is_caught_up());
    }

    #[test]
    fn test_auto_analysis_resumes_when_idle() {
        let capture = Capture::default();
        let shared = Shared::new(Box::new(capture.clone()), &EngineConfig::default());
        let parser = LineParser::new(9);

        shared.stop().unwrap();
        shared.on_line(&parser, "=");
        assert!(!shared.searching.load(Ordering::SeqCst));
        shared.on_line(&parser, "");

        assert!(shared.searching.load(Ordering::SeqCst));
        assert_eq!(capture.text(), "stop\nkata-analyze interval 100 ownership true\n");
    }

    #[test]
    fn test_no_auto_analysis_while_searching() {
        let capture = Capture::default();
        let shared = Shared::new(Box::new(capture.clone()), &EngineConfig::default());
        let parser = LineParser::new(9);
        shared.analyze(100).unwrap();
        shared.on_line(&parser, "=");
        shared.on_line(&parser, "");
        assert_eq!(capture.text(), "kata-analyze interval 100 ownership true\n");
    }

    #[test]
    fn test_reader_thread_publishes_and_reports_exit() {
        let output = format!("{}\n", summary_line(9));
        let session = EngineSession::from_streams(
            Box::new(Capture::default()),
            Cursor::new(output.into_bytes()),
            &quiet_config(),
            9,
        )
        .unwrap();

        match session.recv().unwrap() {
            EngineEvent::Analysis { record, .. } => {
                assert_eq!(record.best().unwrap().visits, 10);
            }
            other => panic!("expected analysis, got {other:?}"),
        }
        assert_eq!(session.recv().unwrap(), EngineEvent::Exited);
    }

    /// Writer standing in for an engine that answers before `flush` returns.
    struct AnswersOnFlush(Arc<Mutex<Option<Arc<Shared>>>>);

    impl Write for AnswersOnFlush {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            Ok(buf.len())
        }
        fn flush(&mut self) -> std::io::Result<()> {
            if let Some(shared) = self.0.lock().unwrap().as_ref() {
                let parser = LineParser::new(9);
                shared.on_line(&parser, "=");
                shared.on_line(&parser, "");
            }
            Ok(())
        }
    }

    struct Broken;

    impl Write for Broken {
        fn write(&mut self, _: &[u8]) -> std::io::Result<usize> {
            Err(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "closed"))
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_answer_before_flush_is_counted() {
        let slot = Arc::new(Mutex::new(None));
        let shared = Arc::new(Shared::new(Box::new(AnswersOnFlush(Arc::clone(&slot))), &quiet_config()));
        *slot.lock().unwrap() = Some(Arc::clone(&shared));

        shared.send_command("play B E5").unwrap();
        assert_eq!(shared.outstanding(), 0);
        let published = shared.on_line(&LineParser::new(9), &summary_line(9));
        assert!(matches!(published, Some(EngineEvent::Analysis { .. })));

        *slot.lock().unwrap() = None;
    }

    #[test]
    fn test_failed_write_owes_nothing() {
        let shared = Shared::new(Box::new(Broken), &quiet_config());
        assert!(matches!(shared.send_command("undo"), Err(Error::EngineUnavailable(_))));
        assert_eq!(shared.outstanding(), 0);
    }

    #[test]
    fn test_invalid_utf8_line_is_skipped() {
        let mut output = b"\xff\xfe garbage\n".to_vec();
        output.extend_from_slice(format!("{}\n", summary_line(9)).as_bytes());
        let session = EngineSession::from_streams(
            Box::new(Capture::default()),
            Cursor::new(output),
            &quiet_config(),
            9,
        )
        .unwrap();

        assert!(matches!(session.recv().unwrap(), EngineEvent::Analysis { .. }));
        assert_eq!(session.recv().unwrap(), EngineEvent::Exited);
    }

    #[test]
    fn test_debug_shows_state() {
        let session =
            EngineSession::from_streams(Box::new(Capture::default()), Cursor::new(Vec::new()), &quiet_config(), 9)
                .unwrap();
        session.set_key(7);
        let text = format!("{session:?}");
        assert!(text.contains("size: 9"));
        assert!(text.contains("key: 7"));
    }

    #[test]
    fn test_spawn_without_binary() {
        let err = EngineSession::spawn(&EngineConfig::default(), 19).err().unwrap();
        assert!(matches!(err, Error::EngineUnavailable(_)));
    }

    #[test]
    fn test_spawn_missing_binary() {
        let config = EngineConfig {
            binary: Some("/nonexistent/engine-binary".into()),
            ..EngineConfig::default()
        };
        assert!(matches!(
            EngineSession::spawn(&config, 19),
            Err(Error::EngineUnavailable(_))
        ));
    }
    #[cfg(unix)]
    #[test]
    fn test_wait_for_exit_gives_up_after_grace() {
        let mut quick = Command::new("true").spawn().unwrap();
        assert!(wait_for_exit(&mut quick, Duration::from_secs(5)));

        let mut slow = Command::new("sleep").arg("5").spawn().unwrap();
        let start = Instant::now();
        assert!(!wait_for_exit(&mut slow, Duration::from_millis(50)));
        assert!(start.elapsed() < Duration::from_secs(5));
        slow.kill().unwrap();
        slow.wait().unwrap();
    }
}
