//! MainiX installer - main entry point
//!
//! Wires the live collaborators (lsblk, /proc mounts, tmux, console prompts)
//! into the library and maps the outcome to an exit code.

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use crossterm::style::Stylize;
use tracing_subscriber::EnvFilter;

use mainix::cli::{Cli, Commands, InstallArgs};
use mainix::config::InstallSettings;
use mainix::context::InstallContext;
use mainix::error::InstallError;
use mainix::executor::executor_for;
use mainix::hardware::detect_firmware_mode;
use mainix::inventory::{self, SystemProbe};
use mainix::mounts::ProcMounts;
use mainix::orchestrator::{Orchestrator, RestartMode, RunSummary};
use mainix::prompt::ConsolePrompter;
use mainix::status::{ConsoleSink, StatusSink};
use mainix::steps::{self, StepEnv};
use mainix::supervisor::TaskSupervisor;
use mainix::{sanity, signals};

/// Exit status of an operator-cancelled run
const EXIT_ABORTED: u8 = 130;

/// Initialize the subscriber: stderr, `info` unless RUST_LOG says otherwise
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn main() -> ExitCode {
    init_tracing();
    let cli = Cli::parse_args();
    tracing::debug!("CLI arguments parsed");

    match run(&cli) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{} {:#}", "✗".red().bold(), e);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: &Cli) -> anyhow::Result<ExitCode> {
    let mut settings = InstallSettings::load_or_default(cli.config.as_deref())?;
    cli.apply_to(&mut settings);

    match cli.command() {
        Commands::Install(args) => {
            args.apply_to(&mut settings);
            settings.validate()?;
            install(cli, &args, settings)
        }
        Commands::Disks => {
            let disks = inventory::list_disks(&SystemProbe);
            if disks.is_empty() {
                println!("No candidate disks found");
            }
            for disk in disks {
                println!("{}", disk.describe());
            }
            Ok(ExitCode::SUCCESS)
        }
        Commands::Partitions { disk } => {
            let partitions = inventory::list_partitions(&SystemProbe, &disk);
            if partitions.is_empty() {
                println!("No usable partitions on {}", disk.display());
            }
            for partition in partitions {
                println!("{}", partition.describe());
            }
            Ok(ExitCode::SUCCESS)
        }
        Commands::Verify { partition } => {
            match inventory::check_partition(&SystemProbe, &partition) {
                Ok(device) => {
                    println!("{} {}", "✓".green(), device.describe());
                    Ok(ExitCode::SUCCESS)
                }
                Err(reason) => {
                    println!("{} {}: {}", "✗".red(), partition.display(), reason);
                    Ok(ExitCode::FAILURE)
                }
            }
        }
        Commands::Steps => {
            for step in steps::install_steps().steps() {
                println!("{:>2}. {}", step.ordinal(), step.name());
            }
            Ok(ExitCode::SUCCESS)
        }
        Commands::Check => {
            let result = sanity::verify_environment(&settings, detect_firmware_mode());
            if result.is_ok() {
                println!("{} Environment ready", "✓".green());
                Ok(ExitCode::SUCCESS)
            } else {
                println!("{} {}", "✗".red(), result.describe());
                Ok(ExitCode::FAILURE)
            }
        }
        Commands::Config { write } => {
            settings.validate()?;
            match write {
                Some(path) => {
                    settings.save_to_file(&path)?;
                    println!("{} Settings written to {}", "✓".green(), path.display());
                }
                None => println!("{}", serde_json::to_string_pretty(&settings)?),
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn install(cli: &Cli, args: &InstallArgs, settings: InstallSettings) -> anyhow::Result<ExitCode> {
    let cancel = signals::install_cancel_handler().context("Failed to install signal handlers")?;
    let firmware = detect_firmware_mode();
    tracing::info!("MainiX installer starting ({} firmware)", firmware);
    if settings.dry_run {
        tracing::info!("Dry-run: commands are recorded in {}", settings.log_path.display());
    }

    let overrides = args.overrides().or(settings.answers.clone());
    let mut ctx = InstallContext::from_overrides(overrides, firmware);

    let sink: Arc<dyn StatusSink> = Arc::new(ConsoleSink::new());
    let supervisor = TaskSupervisor::from_settings(&settings, Arc::clone(&sink), executor_for(settings.executor, &settings.state_dir()))
        .with_cancel_flag(Arc::clone(&cancel));
    let log = supervisor.log().clone();

    let env = StepEnv {
        supervisor,
        prompter: Arc::new(ConsolePrompter::new()),
        probe: Box::new(SystemProbe),
        mounts: Box::new(ProcMounts),
        settings,
    };

    let restart = if args.no_reexec {
        RestartMode::InProcess
    } else {
        RestartMode::Exec {
            program: std::env::current_exe().context("Cannot locate the installer binary")?,
            base_args: cli.relaunch_base_args(args),
        }
    };

    let engine = steps::install_steps().with_cancel_flag(Arc::clone(&cancel));
    let mut orchestrator = Orchestrator::new(engine, log, sink, restart)
        .with_cancel_flag(cancel)
        .with_preflight(move |env: &StepEnv| sanity::check(&env.settings, firmware))
        .with_finalize(steps::finalize);

    let start = args.resume_from.unwrap_or(1);
    let attempt = args.attempt.unwrap_or(1);
    match orchestrator.run(&mut ctx, &env, start, attempt) {
        Ok(RunSummary::Completed) => Ok(ExitCode::SUCCESS),
        Ok(RunSummary::Aborted { at }) => {
            eprintln!(
                "{} Installation cancelled at step {}; resume with --resume-from {}",
                "!".yellow().bold(),
                at,
                at
            );
            Ok(ExitCode::from(EXIT_ABORTED))
        }
        Err(InstallError::EnvironmentPrecondition(reason)) => {
            eprintln!("{} Pre-flight check failed: {}", "✗".red().bold(), reason);
            Ok(ExitCode::FAILURE)
        }
        Err(e) => Err(e.into()),
    }
}
