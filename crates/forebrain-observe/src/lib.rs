use anyhow::Result;
use chrono::Utc;
use forebrain_core::runtime_dir;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Append-only run log plus an optional verbose mirror to stderr.
///
/// Every turn boundary, permission decision, retry, and filesystem change
/// goes through here so a session can be reconstructed from `.forebrain/run.log`.
pub struct Observer {
    log_path: PathBuf,
    verbose: bool,
}

impl Observer {
    pub fn new(workspace: &Path) -> Result<Self> {
        let dir = runtime_dir(workspace);
        fs::create_dir_all(&dir)?;
        Ok(Self {
            log_path: dir.join("run.log"),
            verbose: false,
        })
    }

    /// Enable or disable verbose logging to stderr.
    pub fn set_verbose(&mut self, verbose: bool) {
        self.verbose = verbose;
    }

    pub fn is_verbose(&self) -> bool {
        self.verbose
    }

    /// Record a session event. Log failures are swallowed; losing a log line
    /// must never fail the turn that produced it.
    pub fn event(&self, msg: &str) {
        let _ = self.append_log_line(&format!("{} {msg}", Utc::now().to_rfc3339()));
        if self.verbose {
            eprintln!("[forebrain] {msg}");
        }
    }

    /// Log a warning, always written to both the log file and stderr.
    pub fn warn(&self, msg: &str) {
        eprintln!("[forebrain WARN] {msg}");
        let _ = self.append_log_line(&format!("{} WARN {msg}", Utc::now().to_rfc3339()));
    }

    /// Log a message to stderr only when verbose mode is on.
    pub fn verbose_log(&self, msg: &str) {
        if self.verbose {
            eprintln!("[forebrain] {msg}");
        }
    }

    pub fn log_path(&self) -> &Path {
        &self.log_path
    }

    fn append_log_line(&self, line: &str) -> Result<()> {
        let mut f = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_path)?;
        writeln!(f, "{line}")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_append_to_run_log() {
        let workspace = tempfile::tempdir().expect("tempdir");
        let observer = Observer::new(workspace.path()).expect("observer");
        observer.event("turn start");
        observer.event("patch applied path=src/lib.rs");

        let raw = fs::read_to_string(observer.log_path()).expect("read log");
        let lines: Vec<&str> = raw.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].ends_with("turn start"));
        assert!(lines[1].contains("patch applied path=src/lib.rs"));
    }

    #[test]
    fn creates_runtime_dir_on_first_use() {
        let workspace = tempfile::tempdir().expect("tempdir");
        let observer = Observer::new(workspace.path()).expect("observer");
        assert!(workspace.path().join(".forebrain").is_dir());
        observer.warn("model returned malformed diff");
        assert!(observer.log_path().exists());
    }
}
