//! Restart policy around the Step Engine
//!
//! One install *attempt* is: truncate the run log, re-check environment
//! preconditions, run the engine from the resume point. When a step fails the
//! failure is shown to the operator together with the run-log path, and after
//! acknowledgement the installer restarts at the failed step.
//!
//! # Restart modes
//!
//! - [`RestartMode::Exec`] replaces the current process image with a fresh
//!   invocation of the installer (`--resume-from N --attempt M` plus the
//!   non-secret context as overrides). Nothing survives in memory; secrets
//!   are asked for again.
//! - [`RestartMode::InProcess`] loops inside the same process and keeps the
//!   whole [`InstallContext`].
//!
//! Both re-enter the failed step with the same resume ordinal, and both
//! re-run the preflight before the first step of the new attempt.

use std::os::unix::process::CommandExt;
use std::path::PathBuf;
use std::process::Command;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::context::InstallContext;
use crate::engine::{EngineOutcome, StepEngine};
use crate::error::{InstallError, Result};
use crate::run_log::RunLog;
use crate::status::{Acknowledgement, StatusSink};

type Preflight<E> = Box<dyn Fn(&E) -> Result<()>>;
type Finalize<E> = Box<dyn Fn(&InstallContext, &E) -> Result<()>>;

/// How a failed attempt is restarted
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RestartMode {
    /// Re-execute `program` with `base_args` followed by the relaunch flags
    Exec {
        program: PathBuf,
        base_args: Vec<String>,
    },
    /// Loop within this process
    InProcess,
}

/// How a run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunSummary {
    Completed,
    /// Operator cancelled at this step ordinal
    Aborted { at: u32 },
}

/// Arguments for a relaunched process: `base`, then the non-secret context,
/// then the resume point and attempt counter.
pub fn build_relaunch_args(
    base: &[String],
    ctx: &InstallContext,
    resume_from: u32,
    attempt: u32,
) -> Vec<String> {
    let mut args = base.to_vec();
    args.extend(ctx.to_cli_args());
    args.push("--resume-from".to_string());
    args.push(resume_from.to_string());
    args.push("--attempt".to_string());
    args.push(attempt.to_string());
    args
}

pub struct Orchestrator<E> {
    engine: StepEngine<E>,
    log: RunLog,
    sink: Arc<dyn StatusSink>,
    restart: RestartMode,
    preflight: Option<Preflight<E>>,
    finalize: Option<Finalize<E>>,
    cancel: Option<Arc<AtomicBool>>,
}

impl<E> Orchestrator<E> {
    pub fn new(engine: StepEngine<E>, log: RunLog, sink: Arc<dyn StatusSink>, restart: RestartMode) -> Self {
        Self {
            engine,
            log,
            sink,
            restart,
            preflight: None,
            finalize: None,
            cancel: None,
        }
    }

    /// Checked at the start of every attempt
    pub fn with_preflight(mut self, check: impl Fn(&E) -> Result<()> + 'static) -> Self {
        self.preflight = Some(Box::new(check));
        self
    }

    /// Runs once, after the last step succeeded
    pub fn with_finalize(mut self, action: impl Fn(&InstallContext, &E) -> Result<()> + 'static) -> Self {
        self.finalize = Some(Box::new(action));
        self
    }

    pub fn with_cancel_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = Some(flag);
        self
    }

    pub fn engine(&self) -> &StepEngine<E> {
        &self.engine
    }

    fn is_cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::SeqCst))
    }

    /// Drive the install to completion or cancellation.
    ///
    /// `Err` means the run cannot continue at all: a failed precondition, a
    /// non-restartable step error, or a failed re-exec. In
    /// [`RestartMode::Exec`] a successful restart never returns.
    pub fn run(&mut self, ctx: &mut InstallContext, env: &E, start: u32, attempt: u32) -> Result<RunSummary> {
        self.engine.validate_start(start)?;
        let mut start = start;
        let mut attempt = attempt.max(1);

        loop {
            self.log.begin_attempt(attempt, start)?;
            tracing::info!("Install attempt {} starting at step {}", attempt, start);

            if let Some(preflight) = &self.preflight {
                preflight(env)?;
            }

            let failure = match self.engine.run(ctx, env, self.sink.as_ref(), start)? {
                EngineOutcome::Completed => {
                    if let Some(finalize) = &self.finalize {
                        finalize(ctx, env)?;
                    }
                    return Ok(RunSummary::Completed);
                }
                EngineOutcome::Aborted { at } => return Ok(RunSummary::Aborted { at }),
                EngineOutcome::Failed(failure) => failure,
            };

            let label = format!("Step {} ({})", failure.ordinal, failure.name);
            self.sink
                .failure(&label, &failure.error.detail(), self.log.path());

            if !failure.error.is_restartable() {
                return Err(failure.error);
            }
            if self.is_cancelled() {
                return Ok(RunSummary::Aborted { at: failure.ordinal });
            }
            if self.sink.acknowledge() == Acknowledgement::Abort {
                tracing::warn!("Operator aborted after step {} failed", failure.ordinal);
                return Ok(RunSummary::Aborted { at: failure.ordinal });
            }

            let resume = failure.ordinal;
            match &self.restart {
                RestartMode::Exec { program, base_args } => {
                    let args = build_relaunch_args(base_args, ctx, resume, attempt + 1);
                    tracing::info!("Relaunching {} at step {}", program.display(), resume);
                    // exec only returns on failure
                    let error = Command::new(program).args(&args).exec();
                    return Err(InstallError::Io(error));
                }
                RestartMode::InProcess => {
                    tracing::info!("Restarting at step {}", resume);
                    start = resume;
                    attempt += 1;
                }
            }
        }
    }
}
