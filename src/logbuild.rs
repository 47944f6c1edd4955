//! Per-build logging (component L).
//!
//! Grounded in `log.c`: each build writes a dedicated log file named after the
//! bundle and version range, with every line prefixed by the elapsed time
//! since the build started and the time since the previous line. Unlike the
//! original, lines are also routed through the `log` crate so a single
//! `RUST_LOG`-driven `env_logger` subscriber sees them alongside everything
//! else the binary logs.

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Instant;

use crate::error::{IoCreateSnafu, IoWriteSnafu, Result};
use snafu::ResultExt;

/// Dual-sink build log: a dedicated file plus the process-wide `log` crate.
pub struct BuildLog {
    file: Option<File>,
    path: PathBuf,
    start: Instant,
    previous: Instant,
}

impl BuildLog {
    /// Opens `{prefix}{bundle}-from-{from}-to-{to}.log` for writing.
    pub fn open(prefix: &Path, bundle: &str, from: u32, to: u32) -> Result<Self> {
        let path = prefix.join(format!("{}-from-{}-to-{}.log", bundle, from, to));
        let file = File::create(&path).context(IoCreateSnafu { path: path.clone() })?;
        let now = Instant::now();
        Ok(BuildLog {
            file: Some(file),
            path,
            start: now,
            previous: now,
        })
    }

    /// A log instance that only emits through the `log` crate, used when no
    /// per-bundle log file is wanted (e.g. the `make_fullfiles`/`make_packs`
    /// binaries, which build many bundles in one run).
    pub fn stdout_only() -> Self {
        let now = Instant::now();
        BuildLog {
            file: None,
            path: PathBuf::new(),
            start: now,
            previous: now,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn line(&mut self, tag: &str, message: &str) -> Result<()> {
        let now = Instant::now();
        let total = now.duration_since(self.start).as_secs_f64();
        let delta = now.duration_since(self.previous).as_secs_f64();
        self.previous = now;

        log::info!("{}: {}", tag, message);

        if let Some(file) = self.file.as_mut() {
            writeln!(file, "{:7.3} {:6.3} {}\t| {}", total, delta, tag, message)
                .context(IoWriteSnafu {
                    path: self.path.clone(),
                })?;
            file.flush().context(IoWriteSnafu {
                path: self.path.clone(),
            })?;
        }
        Ok(())
    }

    pub fn close(&mut self, to_version: u32, exit_status: i32) -> Result<()> {
        self.line(
            "build complete",
            &format!("version {} exit status {}", to_version, exit_status),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_a_log_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut log = BuildLog::open(dir.path(), "os-core", 10, 20).unwrap();
        log.line("diff", "3 changed files").unwrap();
        log.close(20, 0).unwrap();
        let contents = std::fs::read_to_string(log.path()).unwrap();
        assert!(contents.contains("3 changed files"));
    }
}
