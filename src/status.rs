//! Status reporting
//!
//! The core reports progress through a callback-style sink and never prints
//! directly. [`ConsoleSink`] is the plain terminal presentation; the
//! [`RecordingSink`] keeps every event in memory for tests.

use crossterm::style::Stylize;
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Operator decision after a failure report
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acknowledgement {
    /// Restart the installer at the failed step
    Restart,
    /// Stop the run (explicit cancellation)
    Abort,
}

/// Consumer of progress reports.
pub trait StatusSink: Send + Sync {
    /// Human-readable status line with an optional completion percentage
    fn report(&self, label: &str, percent: Option<u8>);

    /// Failed step: label, truncated detail, and where the full log lives
    fn failure(&self, label: &str, detail: &str, log_path: &Path);

    /// Block until the operator acknowledges the last failure.
    fn acknowledge(&self) -> Acknowledgement;
}

// ============================================================================
// Console
// ============================================================================

/// Colored status lines on stdout, acknowledgement read from stdin.
#[derive(Debug, Default)]
pub struct ConsoleSink;

impl ConsoleSink {
    pub fn new() -> Self {
        Self
    }
}

impl StatusSink for ConsoleSink {
    fn report(&self, label: &str, percent: Option<u8>) {
        match percent {
            Some(p) => println!("{} {}", format!("[{:>3}%]", p).cyan().bold(), label),
            None => println!("{} {}", "  ->".dark_grey(), label),
        }
    }

    fn failure(&self, label: &str, detail: &str, log_path: &Path) {
        eprintln!();
        eprintln!("{} {}", "✗".red().bold(), label.red().bold());
        for line in detail.lines() {
            eprintln!("    {}", line);
        }
        eprintln!("    Full log: {}", log_path.display().to_string().yellow());
    }

    fn acknowledge(&self) -> Acknowledgement {
        print!("Press Enter to restart at this step, or type 'abort' to stop: ");
        let _ = io::stdout().flush();

        let mut answer = String::new();
        match io::stdin().lock().read_line(&mut answer) {
            // EOF: nobody is there to acknowledge
            Ok(0) | Err(_) => Acknowledgement::Abort,
            Ok(_) if answer.trim().eq_ignore_ascii_case("abort") => Acknowledgement::Abort,
            Ok(_) => Acknowledgement::Restart,
        }
    }
}

// ============================================================================
// Recording (tests)
// ============================================================================

/// Event captured by [`RecordingSink`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusEvent {
    Report {
        label: String,
        percent: Option<u8>,
    },
    Failure {
        label: String,
        detail: String,
        log_path: PathBuf,
    },
    Acknowledged(Acknowledgement),
}

/// In-memory sink that answers every acknowledgement with a fixed decision.
#[derive(Debug)]
pub struct RecordingSink {
    events: Mutex<Vec<StatusEvent>>,
    answer: Acknowledgement,
}

impl Default for RecordingSink {
    fn default() -> Self {
        Self::new(Acknowledgement::Restart)
    }
}

impl RecordingSink {
    pub fn new(answer: Acknowledgement) -> Self {
        Self {
            events: Mutex::new(Vec::new()),
            answer,
        }
    }

    pub fn events(&self) -> Vec<StatusEvent> {
        self.lock().clone()
    }

    /// Labels of every progress report, in order
    pub fn labels(&self) -> Vec<String> {
        self.lock()
            .iter()
            .filter_map(|e| match e {
                StatusEvent::Report { label, .. } => Some(label.clone()),
                _ => None,
            })
            .collect()
    }

    /// Labels of every failure report, in order
    pub fn failures(&self) -> Vec<String> {
        self.lock()
            .iter()
            .filter_map(|e| match e {
                StatusEvent::Failure { label, .. } => Some(label.clone()),
                _ => None,
            })
            .collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<StatusEvent>> {
        self.events.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl StatusSink for RecordingSink {
    fn report(&self, label: &str, percent: Option<u8>) {
        self.lock().push(StatusEvent::Report {
            label: label.to_string(),
            percent,
        });
    }

    fn failure(&self, label: &str, detail: &str, log_path: &Path) {
        self.lock().push(StatusEvent::Failure {
            label: label.to_string(),
            detail: detail.to_string(),
            log_path: log_path.to_path_buf(),
        });
    }

    fn acknowledge(&self) -> Acknowledgement {
        self.lock().push(StatusEvent::Acknowledged(self.answer));
        self.answer
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_sink_keeps_order() {
        let sink = RecordingSink::default();
        sink.report("[1/7] Disk partitioning", Some(0));
        sink.report("mkfs.ext4 -F /dev/vda1", None);
        sink.failure("Disk partitioning", "device busy", Path::new("/tmp/log"));

        assert_eq!(
            sink.labels(),
            vec!["[1/7] Disk partitioning", "mkfs.ext4 -F /dev/vda1"]
        );
        assert_eq!(sink.failures(), vec!["Disk partitioning"]);
        assert_eq!(sink.events().len(), 3);
    }

    #[test]
    fn test_recording_sink_answers_configured_decision() {
        let sink = RecordingSink::new(Acknowledgement::Abort);
        assert_eq!(sink.acknowledge(), Acknowledgement::Abort);
        assert_eq!(
            sink.events().last(),
            Some(&StatusEvent::Acknowledged(Acknowledgement::Abort))
        );
    }
}
