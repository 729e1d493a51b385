//! Runtime configuration.
//!
//! Loaded from a JSON file; every field has a default so a partial file (or
//! none at all) works. Command-line flags are applied on top by the binary.
//!
//! ```json
//! {
//!   "engine": { "binary": "katago", "model": "model.bin.gz", "config": "analysis.cfg" },
//!   "board_size": 19,
//!   "komi": 7.5
//! }
//! ```

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::constants::{
    ANALYSIS_CMD, DEFAULT_INTERVAL_CS, DEFAULT_KOMI, DEFAULT_SIZE, MAX_SIZE, MIN_SIZE,
};
use crate::error::{Error, Result};

/// How to launch and drive the analysis engine.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Engine executable. `None` runs without an engine.
    pub binary: Option<PathBuf>,
    pub model: Option<PathBuf>,
    pub config: Option<PathBuf>,
    /// Extra arguments appended after the standard ones.
    pub extra_args: Vec<String>,
    /// Analysis command template; `{}` is replaced by the interval.
    pub analysis_cmd: String,
    /// Reporting interval in centiseconds.
    pub interval_cs: u32,
    /// Restart analysis when the engine goes idle and is caught up.
    pub auto_analyze: bool,
    /// Lines the engine prints on stdout before its first response.
    pub startup_lines: i64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            binary: None,
            model: None,
            config: None,
            extra_args: Vec::new(),
            analysis_cmd: ANALYSIS_CMD.to_string(),
            interval_cs: DEFAULT_INTERVAL_CS,
            auto_analyze: true,
            startup_lines: 0,
        }
    }
}

impl EngineConfig {
    /// The analysis command for a given interval.
    pub fn analysis_command(&self, interval_cs: u32) -> String {
        self.analysis_cmd.replace("{}", &interval_cs.to_string())
    }
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct AppConfig {
    pub engine: EngineConfig,
    pub board_size: usize,
    pub komi: f32,
    /// Log spec in `RUST_LOG` syntax, used when the variable is unset.
    pub log_level: String,
    /// Also write rotating log files to this directory.
    pub log_dir: Option<PathBuf>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            engine: EngineConfig::default(),
            board_size: DEFAULT_SIZE,
            komi: DEFAULT_KOMI,
            log_level: "info".to_string(),
            log_dir: None,
        }
    }
}

impl AppConfig {
    /// Load and validate a configuration file.
    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        let config: AppConfig = serde_json::from_reader(BufReader::new(file))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if !(MIN_SIZE..=MAX_SIZE).contains(&self.board_size) {
            return Err(Error::Config(format!(
                "board_size {} outside {MIN_SIZE}..={MAX_SIZE}",
                self.board_size
            )));
        }
        if self.engine.interval_cs == 0 {
            return Err(Error::Config("interval_cs must be positive".into()));
        }
        if !self.engine.analysis_cmd.contains("{}") {
            return Err(Error::Config(
                "analysis_cmd must contain '{}' for the interval".into(),
            ));
        }
        Ok(())
    }
}
