//! Run log
//!
//! Append-only, timestamped record of every command executed during one
//! install attempt, persisted at a fixed path. A new attempt truncates the
//! file, which bounds growth across restarts at the cost of the previous
//! attempt's history.
//!
//! Detached tasks append their output to the same file from outside this
//! process, so the file is opened per write instead of holding a handle.

use chrono::Local;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// Marker between the timestamp and the command text of a record header
const COMMAND_MARKER: &str = "] $ ";

#[derive(Debug, Clone)]
pub struct RunLog {
    path: PathBuf,
}

impl RunLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Truncate the log and write the header of a new attempt.
    pub fn begin_attempt(&self, attempt: u32, resume_from: u32) -> io::Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let mut file = fs::File::create(&self.path)?;
        writeln!(
            file,
            "[{}] === attempt {} (starting at step {}) ===",
            timestamp(),
            attempt,
            resume_from
        )?;
        Ok(())
    }

    /// Record one executed command with its captured output.
    pub fn record(
        &self,
        command: &str,
        exit_code: Option<i32>,
        stdout: &str,
        stderr: &str,
    ) -> io::Result<()> {
        let mut block = format!("[{}{}{}\n", timestamp(), COMMAND_MARKER, command);
        match exit_code {
            Some(code) => block.push_str(&format!("[exit {}]\n", code)),
            None => block.push_str("[terminated by signal]\n"),
        }
        if !stdout.trim().is_empty() {
            block.push_str("--- stdout ---\n");
            block.push_str(stdout.trim_end());
            block.push('\n');
        }
        if !stderr.trim().is_empty() {
            block.push_str("--- stderr ---\n");
            block.push_str(stderr.trim_end());
            block.push('\n');
        }
        self.append(&block)
    }

    /// Record a command header without output (dry runs, detached launches).
    pub fn record_header(&self, tag: &str, command: &str) -> io::Result<()> {
        self.append(&format!("[{}{}{}\n[{}]\n", timestamp(), COMMAND_MARKER, command, tag))
    }

    /// Free-form timestamped line.
    pub fn note(&self, line: &str) -> io::Result<()> {
        self.append(&format!("[{}] {}\n", timestamp(), line))
    }

    /// Command texts of every record in the current attempt, in order.
    pub fn commands(&self) -> io::Result<Vec<String>> {
        let content = self.read()?;
        Ok(content
            .lines()
            .filter(|line| line.starts_with('['))
            .filter_map(|line| {
                line.split_once(COMMAND_MARKER)
                    .map(|(_, command)| command.to_string())
            })
            .collect())
    }

    /// Last `count` lines of the log (used as the detail of detached failures).
    pub fn tail(&self, count: usize) -> String {
        let content = self.read().unwrap_or_default();
        let lines: Vec<&str> = content.lines().collect();
        let start = lines.len().saturating_sub(count);
        lines[start..].join("\n")
    }

    /// Full content of the log, empty when it does not exist yet.
    pub fn read(&self) -> io::Result<String> {
        match fs::read_to_string(&self.path) {
            Ok(content) => Ok(content),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(String::new()),
            Err(e) => Err(e),
        }
    }

    fn append(&self, text: &str) -> io::Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(text.as_bytes())
    }
}

fn timestamp() -> String {
    Local::now().format("%Y-%m-%d %H:%M:%S").to_string()
}
