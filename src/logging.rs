//! Logger setup for the binary.
//!
//! Logs go to stderr so they never mix with the board and prompts on stdout.
//! `RUST_LOG` overrides the configured level.

use std::path::Path;

use flexi_logger::{Cleanup, Criterion, Duplicate, FileSpec, Logger, LoggerHandle, Naming, opt_format};

use crate::error::{Error, Result};

/// Start logging at `level`, optionally also into rotating files under `log_dir`.
///
/// Keep the returned handle alive for as long as logging is needed.
pub fn setup_logging(level: &str, log_dir: Option<&Path>) -> Result<LoggerHandle> {
    let logger = Logger::try_with_env_or_str(level)
        .map_err(|e| Error::Config(format!("log level '{level}': {e}")))?
        .format(opt_format);

    let logger = match log_dir {
        Some(dir) => logger
            .log_to_file(FileSpec::default().directory(dir).basename("goban-review"))
            .duplicate_to_stderr(Duplicate::Warn)
            .rotate(
                Criterion::Size(10 * 1024 * 1024),
                Naming::Numbers,
                Cleanup::KeepLogFiles(3),
            ),
        None => logger.log_to_stderr(),
    };

    logger
        .start()
        .map_err(|e| Error::Config(format!("cannot start logger: {e}")))
}
