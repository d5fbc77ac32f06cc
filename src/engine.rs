//! Step Engine
//!
//! Ordered, named install steps with resume support.
//!
//! # State machine
//!
//! ```text
//! per step:     Pending → Running → Succeeded
//!                                 ↘ Failed
//!               (Skipped for ordinals before the resume point)
//!
//! per run:      NotStarted → InProgress(n) → InProgress(n + 1) → … → Completed
//!                                  ↘ Aborted   (operator cancellation only)
//! ```
//!
//! A failing step does not abort the run. The engine stops, reports the
//! failure in its outcome, and leaves the restart decision to the
//! orchestrator. The resume point of a failure is the failed step itself:
//! restarting re-attempts it instead of skipping it.
//!
//! The engine is generic over the environment `E` handed to every step, so
//! tests can drive it with a fake world.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::context::InstallContext;
use crate::error::{InstallError, Result};
use crate::status::StatusSink;

/// Body of a step
pub type StepAction<E> = Box<dyn Fn(&mut InstallContext, &E) -> Result<()>>;

/// One named, ordered unit of the install sequence. Immutable once added.
pub struct Step<E> {
    ordinal: u32,
    name: String,
    action: StepAction<E>,
}

impl<E> Step<E> {
    pub fn ordinal(&self) -> u32 {
        self.ordinal
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl<E> fmt::Debug for Step<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Step")
            .field("ordinal", &self.ordinal)
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepState {
    Pending,
    Running,
    Succeeded,
    Failed,
    /// Before the resume point of this run
    Skipped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    NotStarted,
    InProgress(u32),
    Completed,
    Aborted,
}

/// A step that returned an error
#[derive(Debug)]
pub struct StepFailure {
    pub ordinal: u32,
    pub name: String,
    pub error: InstallError,
}

#[derive(Debug)]
pub enum EngineOutcome {
    Completed,
    Failed(StepFailure),
    /// Operator cancellation before or during step `at`
    Aborted { at: u32 },
}

impl EngineOutcome {
    /// Ordinal a restarted run should begin at
    pub fn resume_point(&self) -> Option<u32> {
        match self {
            Self::Failed(failure) => Some(failure.ordinal),
            Self::Completed | Self::Aborted { .. } => None,
        }
    }
}

pub struct StepEngine<E> {
    steps: Vec<Step<E>>,
    states: Vec<StepState>,
    run_state: RunState,
    last_started: Option<u32>,
    cancel: Option<Arc<AtomicBool>>,
}

impl<E> Default for StepEngine<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> StepEngine<E> {
    pub fn new() -> Self {
        Self {
            steps: Vec::new(),
            states: Vec::new(),
            run_state: RunState::NotStarted,
            last_started: None,
            cancel: None,
        }
    }

    /// Append a step; its ordinal is its 1-based position.
    pub fn step(
        mut self,
        name: impl Into<String>,
        action: impl Fn(&mut InstallContext, &E) -> Result<()> + 'static,
    ) -> Self {
        let ordinal = self.steps.len() as u32 + 1;
        self.steps.push(Step {
            ordinal,
            name: name.into(),
            action: Box::new(action),
        });
        self.states.push(StepState::Pending);
        self
    }

    /// Checked before every step
    pub fn with_cancel_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = Some(flag);
        self
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn steps(&self) -> &[Step<E>] {
        &self.steps
    }

    pub fn state(&self, ordinal: u32) -> Option<StepState> {
        let index = (ordinal as usize).checked_sub(1)?;
        self.states.get(index).copied()
    }

    pub fn states(&self) -> &[StepState] {
        &self.states
    }

    pub fn run_state(&self) -> RunState {
        self.run_state
    }

    /// Ordinal of the last step that began running
    pub fn last_started(&self) -> Option<u32> {
        self.last_started
    }

    /// Resume points outside `1..=len` are rejected
    pub fn validate_start(&self, start: u32) -> Result<()> {
        let len = self.steps.len() as u32;
        if start == 0 || start > len.max(1) {
            return Err(InstallError::validation(format!(
                "resume point {} is outside 1..={}",
                start,
                len.max(1)
            )));
        }
        Ok(())
    }

    fn is_cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::SeqCst))
    }

    /// Run every step from `start` on.
    ///
    /// Only an invalid `start` is an `Err`; step errors are reported as
    /// [`EngineOutcome::Failed`].
    pub fn run(
        &mut self,
        ctx: &mut InstallContext,
        env: &E,
        sink: &dyn StatusSink,
        start: u32,
    ) -> Result<EngineOutcome> {
        self.validate_start(start)?;

        for (index, state) in self.states.iter_mut().enumerate() {
            *state = if (index as u32) + 1 < start {
                StepState::Skipped
            } else {
                StepState::Pending
            };
        }
        self.last_started = None;
        self.run_state = RunState::InProgress(start);

        let total = self.steps.len();
        for index in (start as usize - 1)..total {
            let step = &self.steps[index];
            let ordinal = step.ordinal;

            if self.is_cancelled() {
                tracing::warn!("Cancellation requested before step {}", ordinal);
                self.run_state = RunState::Aborted;
                return Ok(EngineOutcome::Aborted { at: ordinal });
            }

            self.run_state = RunState::InProgress(ordinal);
            self.states[index] = StepState::Running;
            self.last_started = Some(ordinal);

            let percent = ((ordinal as usize - 1) * 100 / total) as u8;
            sink.report(&format!("[{}/{}] {}", ordinal, total, step.name), Some(percent));
            tracing::info!("Step {}/{}: {}", ordinal, total, step.name);

            match (step.action)(ctx, env) {
                Ok(()) => {
                    self.states[index] = StepState::Succeeded;
                    tracing::info!("Step {} succeeded", ordinal);
                }
                Err(InstallError::Cancelled) => {
                    self.states[index] = StepState::Failed;
                    self.run_state = RunState::Aborted;
                    tracing::warn!("Step {} cancelled by operator", ordinal);
                    return Ok(EngineOutcome::Aborted { at: ordinal });
                }
                Err(error) => {
                    self.states[index] = StepState::Failed;
                    tracing::error!("Step {} ({}) failed: {}", ordinal, step.name, error);
                    return Ok(EngineOutcome::Failed(StepFailure {
                        ordinal,
                        name: step.name.clone(),
                        error,
                    }));
                }
            }
        }

        self.run_state = RunState::Completed;
        sink.report("All steps completed", Some(100));
        Ok(EngineOutcome::Completed)
    }
}
