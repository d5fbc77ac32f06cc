//! MainiX installer library
//!
//! Installation orchestrator for MainiX 2 (Oak): an ordered, resumable
//! sequence of install steps driving external tools, with detached
//! long-running tasks supervised through a terminal multiplexer session.

pub mod cli;
pub mod config;
pub mod context;
pub mod engine;
pub mod error;
pub mod executor;
pub mod hardware;
pub mod inventory;
pub mod mounts;
pub mod orchestrator;
pub mod prompt;
pub mod run_log;
pub mod sanity;
pub mod signals;
pub mod status;
pub mod steps;
pub mod supervisor;
pub mod templates;

// Re-export main types for convenience
pub use config::InstallSettings;
pub use context::{InstallContext, Profile, Secret};
pub use engine::{EngineOutcome, StepEngine};
pub use error::{InstallError, Result};
pub use executor::{BackgroundTask, DetachedExecutor};
pub use hardware::FirmwareMode;
pub use orchestrator::{Orchestrator, RestartMode, RunSummary};
pub use status::StatusSink;
pub use supervisor::{TaskOutcome, TaskSupervisor};
