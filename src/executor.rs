//! Detached execution backends
//!
//! A detached task runs outside the installer's own foreground control: the
//! interactive disk tool needs the real terminal for its full-screen UI, and
//! long package installs should not tie their lifetime to ours.
//!
//! # Completion protocol
//!
//! Every backend runs the same wrapped shell script:
//!
//! ```text
//! bash -c '<command>' >> '<run log>' 2>&1; echo $? > '<sentinel>'
//! ```
//!
//! The backend only has to answer "is the session still alive". Once it is
//! gone, the supervisor reads the numeric status from the sentinel file.
//! Interactive tasks skip the output redirect so the tool keeps the terminal.
//!
//! # Backends
//!
//! - [`TmuxExecutor`]: named, detached tmux session (survives the installer)
//! - [`ProcessGroupExecutor`]: child process in its own session, no
//!   multiplexer required (used by tests and minimal live images)
//!
//! Both backends keep answering "alive" for a task started before the
//! installer re-executed itself, so a restart never launches a second task
//! next to one that is still running.

use std::collections::HashMap;
use std::env;
use std::fs;
use std::io::{self, IsTerminal};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::Mutex;
use std::time::Instant;

use nix::sys::wait::{WaitPidFlag, waitpid};
use nix::unistd::Pid;

use crate::config::ExecutorKind;
use crate::error::{InstallError, Result};
use crate::supervisor::{quote_path, shell_quote};

// ============================================================================
// Task handle
// ============================================================================

/// Handle of one detached invocation.
///
/// Reused across steps: the session name and sentinel path are well known,
/// only one task is live at a time.
#[derive(Debug, Clone)]
pub struct BackgroundTask {
    /// Command as requested by the step
    pub command: String,
    /// Human-readable label used in status lines and errors
    pub label: String,
    /// Wrapped script actually handed to the backend
    pub script: String,
    pub log_path: PathBuf,
    pub session: String,
    pub sentinel: PathBuf,
    pub started_at: Instant,
    /// Keep the terminal attached to the tool instead of capturing output
    pub interactive: bool,
    /// Nothing was launched; the task reports success immediately
    pub dry_run: bool,
}

impl BackgroundTask {
    pub fn new(
        command: impl Into<String>,
        label: impl Into<String>,
        log_path: &Path,
        session: &str,
        sentinel: &Path,
        interactive: bool,
    ) -> Self {
        let command = command.into();
        let script = wrap_command(&command, log_path, sentinel, interactive);
        Self {
            command,
            label: label.into(),
            script,
            log_path: log_path.to_path_buf(),
            session: session.to_string(),
            sentinel: sentinel.to_path_buf(),
            started_at: Instant::now(),
            interactive,
            dry_run: false,
        }
    }
}

/// Build the sentinel-writing wrapper around `command`.
pub fn wrap_command(command: &str, log_path: &Path, sentinel: &Path, interactive: bool) -> String {
    let inner = format!("bash -c {}", shell_quote(command));
    if interactive {
        format!("{}; echo $? > {}", inner, quote_path(sentinel))
    } else {
        format!(
            "{} >> {} 2>&1; echo $? > {}",
            inner,
            quote_path(log_path),
            quote_path(sentinel)
        )
    }
}

// ============================================================================
// Capability
// ============================================================================

/// Capability to run a wrapped script detached from the installer.
pub trait DetachedExecutor: Send + Sync {
    /// Backend name for logs
    fn name(&self) -> &'static str;

    /// Start `task.script` under the session name `task.session`.
    fn launch(&self, task: &BackgroundTask) -> Result<()>;

    /// Whether the session is still running.
    fn is_alive(&self, session: &str) -> Result<bool>;

    /// Hand the terminal to an interactive session until it ends or the
    /// operator detaches. Backends whose tasks already own the terminal do
    /// nothing.
    fn attach(&self, _session: &str) -> Result<()> {
        Ok(())
    }
}

/// Backend for the configured kind; `state_dir` holds the process backend's pid files
pub fn executor_for(kind: ExecutorKind, state_dir: &Path) -> Box<dyn DetachedExecutor> {
    match kind {
        ExecutorKind::Tmux => Box::new(TmuxExecutor::default()),
        ExecutorKind::Process => Box::new(ProcessGroupExecutor::with_state_dir(state_dir)),
    }
}

// ============================================================================
// tmux
// ============================================================================

/// Named, detached tmux session per task.
#[derive(Debug, Clone)]
pub struct TmuxExecutor {
    binary: String,
}

impl Default for TmuxExecutor {
    fn default() -> Self {
        Self {
            binary: "tmux".to_string(),
        }
    }
}

impl TmuxExecutor {
    fn command(&self) -> Command {
        Command::new(&self.binary)
    }

    fn spawn_error(&self, e: io::Error) -> InstallError {
        if e.kind() == io::ErrorKind::NotFound {
            InstallError::precondition(format!("'{}' is not installed", self.binary))
        } else {
            InstallError::Io(e)
        }
    }
}

impl DetachedExecutor for TmuxExecutor {
    fn name(&self) -> &'static str {
        "tmux"
    }

    fn launch(&self, task: &BackgroundTask) -> Result<()> {
        let output = self
            .command()
            .args(new_session_args(task))
            .stdin(Stdio::null())
            .output()
            .map_err(|e| self.spawn_error(e))?;

        if !output.status.success() {
            return Err(InstallError::ExternalCommand {
                label: format!("Starting session '{}'", task.session),
                command: format!("tmux new-session -d -s {}", task.session),
                code: output.status.code().unwrap_or(-1),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            });
        }

        if task.interactive {
            // The tool owns the pane, so mirror what it prints into the log
            let pipe = format!("cat >> {}", quote_path(&task.log_path));
            let status = self
                .command()
                .args(["pipe-pane", "-o", "-t", &task.session, &pipe])
                .stdin(Stdio::null())
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .status()
                .map_err(|e| self.spawn_error(e))?;
            if !status.success() {
                tracing::warn!("Could not mirror session '{}' into the run log", task.session);
            }
        }

        tracing::info!("Launched detached session '{}': {}", task.session, task.label);
        Ok(())
    }

    fn is_alive(&self, session: &str) -> Result<bool> {
        let status = self
            .command()
            .args(["has-session", "-t", &format!("={}", session)])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map_err(|e| self.spawn_error(e))?;
        Ok(status.success())
    }

    fn attach(&self, session: &str) -> Result<()> {
        if !io::stdin().is_terminal() {
            tracing::warn!(
                "No terminal to attach to; session '{}' keeps running detached",
                session
            );
            return Ok(());
        }
        let nested = env::var_os("TMUX").is_some();
        if nested {
            // Switch back to the installer's session once the task's session is gone
            let status = self
                .command()
                .args(["set-option", "-t", session, "detach-on-destroy", "off"])
                .stdin(Stdio::null())
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .status()
                .map_err(|e| self.spawn_error(e))?;
            if !status.success() {
                tracing::warn!("Could not set detach-on-destroy for session '{}'", session);
            }
        }

        let args = attach_args(session, nested);
        let status = self
            .command()
            .args(&args)
            .status()
            .map_err(|e| self.spawn_error(e))?;
        // Fails harmlessly when the session already ended
        if !status.success() {
            if self.is_alive(session)? {
                return Err(InstallError::ExternalCommand {
                    label: format!("Attaching to session '{}'", session),
                    command: format!("tmux {}", args.join(" ")),
                    code: status.code().unwrap_or(-1),
                    stderr: format!(
                        "could not attach; the task keeps running in session '{}' (tmux attach -t {})",
                        session, session
                    ),
                });
            }
            tracing::debug!("tmux attach to '{}' exited with {}", session, status);
        }
        Ok(())
    }
}

/// `tmux new-session` arguments; the script is handed to bash as argv, so
/// tmux's `default-shell` never parses it
fn new_session_args(task: &BackgroundTask) -> Vec<String> {
    ["new-session", "-d", "-s", task.session.as_str(), "bash", "-c", task.script.as_str()]
        .iter()
        .map(|arg| arg.to_string())
        .collect()
}

/// Inside tmux a client cannot attach to another session, only switch to it
fn attach_args(session: &str, nested: bool) -> Vec<String> {
    let verb = if nested { "switch-client" } else { "attach-session" };
    vec![verb.to_string(), "-t".to_string(), session.to_string()]
}

// ============================================================================
// Native process group
// ============================================================================

/// Extension trait for `std::process::Command` to detach a child from the
/// installer's terminal and process group.
pub trait CommandDetach {
    /// Run the child as leader of a new session
    fn in_new_session(&mut self) -> &mut Self;

    /// Run the child as leader of a new process group in our session, out
    /// of reach of signals the terminal sends to the foreground group
    fn in_new_process_group(&mut self) -> &mut Self;
}

impl CommandDetach for Command {
    fn in_new_session(&mut self) -> &mut Self {
        use std::os::unix::process::CommandExt;
        // SAFETY: setsid(2) is async-signal-safe and touches no parent state
        unsafe {
            self.pre_exec(|| {
                nix::unistd::setsid()
                    .map(|_| ())
                    .map_err(io::Error::from)
            });
        }
        self
    }

    fn in_new_process_group(&mut self) -> &mut Self {
        use std::os::unix::process::CommandExt;
        self.process_group(0)
    }
}

/// Child process in its own session, tracked by session name.
///
/// The child's pid and start time are also written to
/// `<state dir>/<session>.pid`: a task started before the installer
/// re-executed itself is no longer in the in-memory table, but it is still
/// running (and, across `exec`, still our child).
#[derive(Debug)]
pub struct ProcessGroupExecutor {
    state_dir: PathBuf,
    children: Mutex<HashMap<String, Child>>,
}

impl Default for ProcessGroupExecutor {
    fn default() -> Self {
        Self::with_state_dir(env::temp_dir())
    }
}

impl ProcessGroupExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_state_dir(state_dir: impl Into<PathBuf>) -> Self {
        Self {
            state_dir: state_dir.into(),
            children: Mutex::default(),
        }
    }

    pub fn pid_file(&self, session: &str) -> PathBuf {
        self.state_dir.join(format!("{}.pid", session))
    }

    fn children(&self) -> std::sync::MutexGuard<'_, HashMap<String, Child>> {
        self.children.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn record(&self, session: &str, pid: u32) -> Result<()> {
        let Some((_, start)) = process_stat(pid) else {
            tracing::debug!("Process {} ended before it could be recorded", pid);
            return Ok(());
        };
        fs::create_dir_all(&self.state_dir)?;
        fs::write(self.pid_file(session), format!("{} {}\n", pid, start))?;
        Ok(())
    }

    fn recorded(&self, session: &str) -> Option<(u32, u64)> {
        let content = fs::read_to_string(self.pid_file(session)).ok()?;
        let (pid, start) = content.trim().split_once(' ')?;
        Some((pid.parse().ok()?, start.parse().ok()?))
    }

    fn forget(&self, session: &str) {
        match fs::remove_file(self.pid_file(session)) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!("Could not remove pid file for '{}': {}", session, e),
        }
    }

    /// Liveness of a task known only from its pid file
    fn recorded_is_alive(&self, session: &str) -> bool {
        let Some((pid, start)) = self.recorded(session) else {
            return false;
        };
        match process_stat(pid) {
            // A matching start time rules out a recycled pid
            Some((state, started)) if started == start => {
                if state != 'Z' {
                    return true;
                }
                if let Err(e) = waitpid(Pid::from_raw(pid as i32), Some(WaitPidFlag::WNOHANG)) {
                    tracing::debug!("Could not reap process {}: {}", pid, e);
                }
            }
            _ => {}
        }
        self.forget(session);
        false
    }
}

/// State letter and start time (clock ticks after boot) from `/proc/<pid>/stat`
fn process_stat(pid: u32) -> Option<(char, u64)> {
    let stat = fs::read_to_string(format!("/proc/{}/stat", pid)).ok()?;
    // The command name may itself contain spaces and parentheses
    let (_, rest) = stat.rsplit_once(')')?;
    let fields: Vec<&str> = rest.split_whitespace().collect();
    let state = fields.first()?.chars().next()?;
    let start = fields.get(19)?.parse().ok()?;
    Some((state, start))
}

impl DetachedExecutor for ProcessGroupExecutor {
    fn name(&self) -> &'static str {
        "process"
    }

    fn launch(&self, task: &BackgroundTask) -> Result<()> {
        let mut cmd = Command::new("bash");
        cmd.arg("-c").arg(&task.script);
        if task.interactive {
            // Stays in our process group so it may read from the terminal
            cmd.stdin(Stdio::inherit())
                .stdout(Stdio::inherit())
                .stderr(Stdio::inherit());
        } else {
            cmd.stdin(Stdio::null())
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .in_new_session();
        }

        let child = cmd.spawn()?;
        let pid = child.id();
        tracing::info!(
            "Launched detached process {} as '{}': {}",
            pid,
            task.session,
            task.label
        );
        self.children().insert(task.session.clone(), child);
        self.record(&task.session, pid)
    }

    fn is_alive(&self, session: &str) -> Result<bool> {
        let exited = {
            let mut children = self.children();
            match children.get_mut(session) {
                Some(child) => match child.try_wait()? {
                    Some(status) => {
                        tracing::debug!("Session '{}' exited: {}", session, status);
                        children.remove(session);
                        true
                    }
                    None => return Ok(true),
                },
                None => false,
            }
        };
        if exited {
            self.forget(session);
            return Ok(false);
        }
        Ok(self.recorded_is_alive(session))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_wrap_command_redirects_and_writes_sentinel() {
        let script = wrap_command(
            "pacstrap /mnt base",
            Path::new("/tmp/install.log"),
            Path::new("/tmp/task.status"),
            false,
        );
        assert_eq!(
            script,
            "bash -c 'pacstrap /mnt base' >> '/tmp/install.log' 2>&1; echo $? > '/tmp/task.status'"
        );
    }

    #[test]
    fn test_wrap_interactive_keeps_terminal() {
        let script = wrap_command(
            "cfdisk /dev/vda",
            Path::new("/tmp/install.log"),
            Path::new("/tmp/task.status"),
            true,
        );
        assert!(!script.contains(">>"));
        assert!(script.ends_with("echo $? > '/tmp/task.status'"));
    }

    #[test]
    fn test_executor_for_kind() {
        let dir = Path::new("/tmp");
        assert_eq!(executor_for(ExecutorKind::Tmux, dir).name(), "tmux");
        assert_eq!(executor_for(ExecutorKind::Process, dir).name(), "process");
    }

    #[test]
    fn test_tmux_script_is_passed_as_argv() {
        let task = BackgroundTask::new(
            "pacstrap /mnt base",
            "Bootstrap",
            Path::new("/tmp/install.log"),
            "mainix-task",
            Path::new("/tmp/task.status"),
            false,
        );
        let args = new_session_args(&task);
        assert_eq!(&args[..4], ["new-session", "-d", "-s", "mainix-task"]);
        assert_eq!(&args[4..6], ["bash", "-c"]);
        assert_eq!(args[6], task.script);
    }

    #[test]
    fn test_attach_inside_tmux_switches_client() {
        assert_eq!(attach_args("mainix-task", false)[0], "attach-session");
        assert_eq!(
            attach_args("mainix-task", true),
            vec!["switch-client", "-t", "mainix-task"]
        );
    }

    #[test]
    fn test_process_executor_unknown_session_is_not_alive() {
        let dir = tempfile::tempdir().unwrap();
        let executor = ProcessGroupExecutor::with_state_dir(dir.path());
        assert!(!executor.is_alive("never-started").unwrap());
    }

    #[test]
    fn test_stale_pid_file_is_discarded() {
        let dir = tempfile::tempdir().unwrap();
        let executor = ProcessGroupExecutor::with_state_dir(dir.path());
        // Our own pid with a start time it never had
        std::fs::write(
            executor.pid_file("unit-stale-pid"),
            format!("{} 1\n", std::process::id()),
        )
        .unwrap();

        assert!(!executor.is_alive("unit-stale-pid").unwrap());
        assert!(!executor.pid_file("unit-stale-pid").exists());
    }

    #[test]
    fn test_process_stat_of_self() {
        let (state, start) = process_stat(std::process::id()).unwrap();
        assert_ne!(state, 'Z');
        assert!(start > 0);
    }

    #[test]
    fn test_process_executor_tracks_lifetime() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("run.log");
        let sentinel = dir.path().join("status");
        let task = BackgroundTask::new("sleep 0.3", "nap", &log, "unit-nap", &sentinel, false);

        let executor = ProcessGroupExecutor::with_state_dir(dir.path());
        executor.launch(&task).unwrap();
        assert!(executor.is_alive("unit-nap").unwrap());
        assert!(executor.pid_file("unit-nap").exists());

        let deadline = Instant::now() + Duration::from_secs(5);
        while executor.is_alive("unit-nap").unwrap() {
            assert!(Instant::now() < deadline, "task did not finish");
            std::thread::sleep(Duration::from_millis(50));
        }
        assert_eq!(std::fs::read_to_string(&sentinel).unwrap().trim(), "0");
        assert!(!executor.pid_file("unit-nap").exists());
    }

    #[test]
    fn test_task_outlives_the_executor_that_started_it() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("run.log");
        let sentinel = dir.path().join("status");
        let task = BackgroundTask::new("sleep 1", "nap", &log, "unit-reexec", &sentinel, false);

        let before = ProcessGroupExecutor::with_state_dir(dir.path());
        before.launch(&task).unwrap();

        // A fresh executor stands in for the re-executed installer
        let after = ProcessGroupExecutor::with_state_dir(dir.path());
        assert!(after.is_alive("unit-reexec").unwrap());

        let deadline = Instant::now() + Duration::from_secs(5);
        while after.is_alive("unit-reexec").unwrap() {
            assert!(Instant::now() < deadline, "task did not finish");
            std::thread::sleep(Duration::from_millis(50));
        }
        assert!(!after.pid_file("unit-reexec").exists());
    }
}
