//! Task Supervisor
//!
//! The only way the installer executes external commands. Two modes share
//! one interface:
//!
//! - **Blocking** ([`TaskSupervisor::run`]): captures stdout/stderr in full,
//!   records both in the [`RunLog`] tagged with the command text, and turns a
//!   non-zero exit into [`InstallError::ExternalCommand`].
//! - **Detached** ([`TaskSupervisor::run_detached`] + [`TaskSupervisor::wait`]):
//!   hands a wrapped command to a [`DetachedExecutor`], then polls at a fixed
//!   interval until the session disappears and reads the exit status from the
//!   sentinel file.
//!
//! A status line is pushed to the sink before every command starts, so long
//! synchronous calls still show what is running. Blocking commands run in
//! their own process group: a Ctrl-C on the installer's terminal reaches the
//! installer only, never a half-finished `mkfs` or `grub-install`.
//!
//! # Timeouts
//!
//! [`TaskSupervisor::wait`] never kills anything. When the budget runs out it
//! returns [`TaskOutcome::TimedOut`] and the session stays alive for manual
//! inspection; the same handle can be waited on again.

use std::fs;
use std::io::{self, Write};
use std::os::unix::process::ExitStatusExt;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use crate::config::InstallSettings;
use crate::error::{InstallError, Result};
use crate::executor::{BackgroundTask, CommandDetach, DetachedExecutor};
use crate::run_log::RunLog;
use crate::status::StatusSink;

/// Lines of the run log quoted when a detached task fails
const FAILURE_TAIL_LINES: usize = 20;

/// Exit status of `bash` when the command does not exist
const COMMAND_NOT_FOUND: i32 = 127;

/// Quote `value` for a POSIX shell.
///
/// `it's` → `'it'\''s'`
pub fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

/// [`shell_quote`] for paths
pub fn quote_path(path: &Path) -> String {
    shell_quote(&path.to_string_lossy())
}

/// Captured result of a blocking command.
#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    /// Exit code (None if terminated by signal)
    pub exit_code: Option<i32>,
    /// Signal that terminated the command
    pub signal: Option<i32>,
    pub success: bool,
    /// Nothing was executed
    pub dry_run: bool,
}

/// Result of waiting on a detached task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    /// Session ended and the sentinel held this status
    Exited(i32),
    /// Budget exhausted; the session is still running
    TimedOut { elapsed: Duration },
    /// Session ended without a readable status
    StatusUnknown { reason: String },
    /// Operator cancellation while waiting; the session is left running
    Cancelled { elapsed: Duration },
}

impl TaskOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Exited(0))
    }
}

pub struct TaskSupervisor {
    log: RunLog,
    sink: Arc<dyn StatusSink>,
    executor: Box<dyn DetachedExecutor>,
    session: String,
    sentinel: PathBuf,
    poll_interval: Duration,
    dry_run: bool,
    cancel: Option<Arc<AtomicBool>>,
}

impl TaskSupervisor {
    pub fn new(log: RunLog, sink: Arc<dyn StatusSink>, executor: Box<dyn DetachedExecutor>) -> Self {
        let defaults = InstallSettings::default();
        let poll_interval = defaults.poll_interval();
        Self {
            log,
            sink,
            executor,
            session: defaults.session_name,
            sentinel: defaults.sentinel_path,
            poll_interval,
            dry_run: false,
            cancel: None,
        }
    }

    /// Supervisor configured from the installer settings
    pub fn from_settings(
        settings: &InstallSettings,
        sink: Arc<dyn StatusSink>,
        executor: Box<dyn DetachedExecutor>,
    ) -> Self {
        Self::new(RunLog::new(&settings.log_path), sink, executor)
            .with_session(&settings.session_name, &settings.sentinel_path)
            .with_poll_interval(settings.poll_interval())
            .with_dry_run(settings.dry_run)
    }

    pub fn with_session(mut self, session: &str, sentinel: &Path) -> Self {
        self.session = session.to_string();
        self.sentinel = sentinel.to_path_buf();
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn with_cancel_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = Some(flag);
        self
    }

    pub fn log(&self) -> &RunLog {
        &self.log
    }

    pub fn sink(&self) -> &dyn StatusSink {
        self.sink.as_ref()
    }

    pub fn session(&self) -> &str {
        &self.session
    }

    pub fn sentinel(&self) -> &Path {
        &self.sentinel
    }

    pub fn executor_name(&self) -> &'static str {
        self.executor.name()
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    fn is_cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::SeqCst))
    }

    // ========================================================================
    // Blocking mode
    // ========================================================================

    /// Run `command` through `bash -c`, failing on a non-zero exit.
    pub fn run(&self, command: &str, label: &str) -> Result<CommandOutput> {
        let output = self.execute(command, label, None)?;
        self.check(command, label, output)
    }

    /// Like [`TaskSupervisor::run`], feeding `input` on stdin.
    ///
    /// The input is never logged; this is how credentials reach tools such
    /// as `chpasswd`.
    pub fn run_with_input(&self, command: &str, label: &str, input: &str) -> Result<CommandOutput> {
        let output = self.execute(command, label, Some(input))?;
        self.check(command, label, output)
    }

    /// Run a probe whose non-zero exit is an answer, not a failure.
    ///
    /// During a dry run nothing is executed and the probe reports failure,
    /// so the preview shows every mutation the probe would have guarded.
    pub fn query(&self, command: &str, label: &str) -> Result<CommandOutput> {
        if self.dry_run {
            self.log.record_header("dry-run probe: absent", command)?;
            return Ok(CommandOutput {
                exit_code: Some(1),
                dry_run: true,
                ..CommandOutput::default()
            });
        }
        self.execute(command, label, None)
    }

    fn execute(&self, command: &str, label: &str, input: Option<&str>) -> Result<CommandOutput> {
        self.sink.report(label, None);

        if self.dry_run {
            tracing::info!("[dry-run] {}", command);
            self.log.record_header("dry-run", command)?;
            return Ok(CommandOutput {
                exit_code: Some(0),
                success: true,
                dry_run: true,
                ..CommandOutput::default()
            });
        }

        tracing::debug!("Running: {}", command);
        let mut cmd = Command::new("bash");
        cmd.arg("-c")
            .arg(command)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .stdin(if input.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .in_new_process_group();

        let mut child = cmd.spawn()?;
        if let Some(input) = input {
            if let Some(mut stdin) = child.stdin.take() {
                stdin.write_all(input.as_bytes())?;
            }
        }
        let output = child.wait_with_output()?;

        let result = CommandOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            exit_code: output.status.code(),
            signal: output.status.signal(),
            success: output.status.success(),
            dry_run: false,
        };
        self.log
            .record(command, result.exit_code, &result.stdout, &result.stderr)?;
        Ok(result)
    }

    fn check(&self, command: &str, label: &str, output: CommandOutput) -> Result<CommandOutput> {
        if output.success {
            return Ok(output);
        }
        let code = output.exit_code.unwrap_or(-1);
        tracing::warn!("{} failed with exit code {}", label, code);

        if code == COMMAND_NOT_FOUND {
            let program = command.split_whitespace().next().unwrap_or(command);
            return Err(InstallError::precondition(format!(
                "{}: command not found ({})",
                label, program
            )));
        }

        let status = match output.signal {
            Some(signal) => format!("terminated by signal {}", signal),
            None => format!("exited with status {}", code),
        };
        let stderr = if output.stderr.trim().is_empty() {
            format!("{} (no error output)", status)
        } else {
            output.stderr
        };
        Err(InstallError::ExternalCommand {
            label: label.to_string(),
            command: command.to_string(),
            code,
            stderr,
        })
    }

    // ========================================================================
    // Detached mode
    // ========================================================================

    /// Start `command` in the well-known detached session.
    pub fn run_detached(&self, command: &str, label: &str) -> Result<BackgroundTask> {
        self.launch(command, label, false)
    }

    fn launch(&self, command: &str, label: &str, interactive: bool) -> Result<BackgroundTask> {
        self.sink.report(label, None);
        let mut task = BackgroundTask::new(
            command,
            label,
            self.log.path(),
            &self.session,
            &self.sentinel,
            interactive,
        );

        if self.dry_run {
            tracing::info!("[dry-run] detached: {}", command);
            self.log.record_header("dry-run detached", command)?;
            task.dry_run = true;
            return Ok(task);
        }

        if self.executor.is_alive(&self.session)? {
            return Err(InstallError::DetachedTaskBusy {
                session: self.session.clone(),
            });
        }

        // A stale status from the previous task must never be read back
        match fs::remove_file(&self.sentinel) {
            Ok(()) => tracing::debug!("Removed stale sentinel {}", self.sentinel.display()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        self.log.record_header(
            &format!("detached in session '{}' via {}", self.session, self.executor.name()),
            command,
        )?;
        self.executor.launch(&task)?;
        task.started_at = Instant::now();
        Ok(task)
    }

    /// Poll until the task's session is gone or `timeout` passes.
    pub fn wait(&self, task: &BackgroundTask, timeout: Duration) -> Result<TaskOutcome> {
        if task.dry_run {
            return Ok(TaskOutcome::Exited(0));
        }

        let waiting_since = Instant::now();
        loop {
            if !self.executor.is_alive(&task.session)? {
                let outcome = read_sentinel(&task.sentinel);
                tracing::info!("{} finished: {:?}", task.label, outcome);
                return Ok(outcome);
            }
            if self.is_cancelled() {
                tracing::warn!(
                    "Cancelled while waiting on '{}'; session left running",
                    task.session
                );
                return Ok(TaskOutcome::Cancelled {
                    elapsed: task.started_at.elapsed(),
                });
            }

            let waited = waiting_since.elapsed();
            if waited >= timeout {
                tracing::warn!(
                    "{} still running after {:?}; leaving session '{}' alive",
                    task.label,
                    task.started_at.elapsed(),
                    task.session
                );
                return Ok(TaskOutcome::TimedOut {
                    elapsed: task.started_at.elapsed(),
                });
            }
            std::thread::sleep(self.poll_interval.min(timeout - waited));
        }
    }

    /// Convert an outcome into the step's result.
    pub fn finish(&self, task: &BackgroundTask, outcome: TaskOutcome) -> Result<()> {
        match outcome {
            TaskOutcome::Exited(0) => {
                self.log.note(&format!("{} completed", task.label))?;
                Ok(())
            }
            TaskOutcome::Exited(code) => {
                self.log
                    .note(&format!("{} exited with status {}", task.label, code))?;
                let tail = self.log.tail(FAILURE_TAIL_LINES);
                let stderr = if tail.trim().is_empty() {
                    format!("exited with status {} (no output)", code)
                } else {
                    tail
                };
                Err(InstallError::ExternalCommand {
                    label: task.label.clone(),
                    command: task.command.clone(),
                    code,
                    stderr,
                })
            }
            TaskOutcome::TimedOut { elapsed } => Err(InstallError::DetachedTaskTimeout {
                label: task.label.clone(),
                session: task.session.clone(),
                elapsed,
            }),
            TaskOutcome::StatusUnknown { reason } => {
                Err(InstallError::DetachedTaskStatusUnknown {
                    label: task.label.clone(),
                    reason,
                })
            }
            TaskOutcome::Cancelled { .. } => Err(InstallError::Cancelled),
        }
    }

    /// Launch, wait and check a detached task in one call.
    pub fn run_to_completion(&self, command: &str, label: &str, timeout: Duration) -> Result<()> {
        let task = self.run_detached(command, label)?;
        let outcome = self.wait(&task, timeout)?;
        self.finish(&task, outcome)
    }

    /// Detached task that needs the terminal (full-screen tools).
    ///
    /// The terminal is handed to the session until it ends; if the operator
    /// detaches early, waiting continues in the background.
    pub fn run_interactive(&self, command: &str, label: &str, timeout: Duration) -> Result<()> {
        let task = self.launch(command, label, true)?;
        if !task.dry_run {
            self.executor.attach(&task.session)?;
        }
        let outcome = self.wait(&task, timeout)?;
        self.finish(&task, outcome)
    }

    // ========================================================================
    // File operations
    // ========================================================================

    /// Write `contents` to `path`, recorded in the run log.
    pub fn write_file(&self, path: &Path, contents: &str) -> Result<()> {
        if self.dry_run {
            tracing::info!("[dry-run] write {}", path.display());
            self.log.note(&format!(
                "[dry-run] write {} ({} bytes)",
                path.display(),
                contents.len()
            ))?;
            return Ok(());
        }
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, contents)?;
        self.log.note(&format!(
            "write {} ({} bytes)",
            path.display(),
            contents.len()
        ))?;
        Ok(())
    }

    /// Current content of `path`, `None` when it does not exist.
    pub fn read_file(&self, path: &Path) -> Result<Option<String>> {
        match fs::read_to_string(path) {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn create_dir_all(&self, path: &Path) -> Result<()> {
        if self.dry_run {
            self.log
                .note(&format!("[dry-run] mkdir -p {}", path.display()))?;
            return Ok(());
        }
        if !path.is_dir() {
            fs::create_dir_all(path)?;
            self.log.note(&format!("mkdir -p {}", path.display()))?;
        }
        Ok(())
    }

    /// Copy `from` to `to`, creating the destination directory.
    pub fn install_file(&self, from: &Path, to: &Path) -> Result<()> {
        if self.dry_run {
            self.log.note(&format!(
                "[dry-run] install {} -> {}",
                from.display(),
                to.display()
            ))?;
            return Ok(());
        }
        if let Some(parent) = to.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::copy(from, to)?;
        self.log
            .note(&format!("install {} -> {}", from.display(), to.display()))?;
        Ok(())
    }
}

/// Parse the sentinel written by the task wrapper.
pub fn read_sentinel(path: &Path) -> TaskOutcome {
    match fs::read_to_string(path) {
        Ok(content) => match content.trim().parse::<i32>() {
            Ok(code) => TaskOutcome::Exited(code),
            Err(_) => TaskOutcome::StatusUnknown {
                reason: format!(
                    "sentinel {} holds {:?}, not an exit status",
                    path.display(),
                    content.trim()
                ),
            },
        },
        Err(e) if e.kind() == io::ErrorKind::NotFound => TaskOutcome::StatusUnknown {
            reason: format!("sentinel {} was never written", path.display()),
        },
        Err(e) => TaskOutcome::StatusUnknown {
            reason: format!("cannot read sentinel {}: {}", path.display(), e),
        },
    }
}
