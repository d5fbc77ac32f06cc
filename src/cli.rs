use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::config::{ExecutorKind, InstallSettings, PartitionMode};
use crate::context::{Overrides, Profile};

/// MainiX installer - resumable installation of MainiX 2 (Oak)
#[derive(Parser, Debug)]
#[command(name = "mainix-installer")]
#[command(about = "Installs MainiX 2 (Oak): partitioning, base system, users, profile, bootloader")]
#[command(version)]
pub struct Cli {
    /// Settings file (JSON); every field is optional
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Dry-run mode: record what would be executed without making changes.
    ///
    /// Commands and file writes are written to the run log with a
    /// `[dry-run]` tag. Read-only queries still run so device listings are
    /// realistic.
    #[arg(long, global = true)]
    pub dry_run: bool,

    /// Run log path (overrides the settings file)
    #[arg(long, global = true, value_name = "PATH")]
    pub log_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Run the installer (default)
    Install(InstallArgs),
    /// List candidate installation disks
    Disks,
    /// List usable partitions of a disk
    Partitions {
        /// Disk device (e.g., /dev/sda)
        disk: PathBuf,
    },
    /// Check that a partition is usable as an install target
    Verify {
        /// Partition device (e.g., /dev/sda1)
        partition: PathBuf,
    },
    /// Print the install steps with their ordinals
    Steps,
    /// Run the pre-flight environment checks only
    Check,
    /// Print the effective settings as JSON
    Config {
        /// Save them to this file instead (a starting point for `--config`)
        #[arg(long, value_name = "PATH")]
        write: Option<PathBuf>,
    },
}

#[derive(Args, Debug, Clone, Default, PartialEq, Eq)]
pub struct InstallArgs {
    /// Start at this step (see `steps`)
    #[arg(long, value_name = "N")]
    pub resume_from: Option<u32>,

    /// Whole disk to install to (e.g., /dev/sda)
    #[arg(long, value_name = "DEVICE")]
    pub disk: Option<PathBuf>,

    /// Root partition (e.g., /dev/sda2)
    #[arg(long, value_name = "DEVICE")]
    pub root_partition: Option<PathBuf>,

    /// EFI system partition (UEFI only)
    #[arg(long, value_name = "DEVICE")]
    pub efi_partition: Option<PathBuf>,

    #[arg(long)]
    pub hostname: Option<String>,

    #[arg(long)]
    pub username: Option<String>,

    /// System profile: base, desktop, webserver
    #[arg(long)]
    pub profile: Option<Profile>,

    /// Target mount point
    #[arg(long, value_name = "PATH")]
    pub target: Option<PathBuf>,

    /// manual (interactive disk tool) or auto (wipes the disk)
    #[arg(long)]
    pub partition_mode: Option<PartitionMode>,

    /// Detached task backend: tmux or process
    #[arg(long)]
    pub executor: Option<ExecutorKind>,

    /// Restart failed attempts inside this process instead of re-executing
    #[arg(long)]
    pub no_reexec: bool,

    /// Do not reboot after a successful install
    #[arg(long)]
    pub no_reboot: bool,

    /// Attempt counter, set by relaunches
    #[arg(long, hide = true)]
    pub attempt: Option<u32>,
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Subcommand to run; no subcommand means `install` with no flags
    pub fn command(&self) -> Commands {
        self.command
            .clone()
            .unwrap_or_else(|| Commands::Install(InstallArgs::default()))
    }

    /// Apply the global flags on top of loaded settings
    pub fn apply_to(&self, settings: &mut InstallSettings) {
        if self.dry_run {
            settings.dry_run = true;
        }
        if let Some(log_file) = &self.log_file {
            settings.log_path = log_file.clone();
        }
    }

    /// Leading arguments of a relaunched install: global flags, the
    /// `install` subcommand and its behavior flags. Context values, the
    /// resume point and the attempt counter are appended by the orchestrator.
    pub fn relaunch_base_args(&self, install: &InstallArgs) -> Vec<String> {
        let mut args = Vec::new();
        if let Some(config) = &self.config {
            args.push("--config".to_string());
            args.push(config.to_string_lossy().into_owned());
        }
        if self.dry_run {
            args.push("--dry-run".to_string());
        }
        if let Some(log_file) = &self.log_file {
            args.push("--log-file".to_string());
            args.push(log_file.to_string_lossy().into_owned());
        }
        args.push("install".to_string());
        if let Some(mode) = install.partition_mode {
            args.push("--partition-mode".to_string());
            args.push(mode.to_string());
        }
        if let Some(executor) = install.executor {
            args.push("--executor".to_string());
            args.push(executor.to_string());
        }
        if install.no_reboot {
            args.push("--no-reboot".to_string());
        }
        args
    }
}

impl InstallArgs {
    /// Context values given on the command line
    pub fn overrides(&self) -> Overrides {
        Overrides {
            disk: self.disk.clone(),
            root_partition: self.root_partition.clone(),
            efi_partition: self.efi_partition.clone(),
            hostname: self.hostname.clone(),
            username: self.username.clone(),
            profile: self.profile,
            target: self.target.clone(),
        }
    }

    /// Apply the install flags on top of loaded settings
    pub fn apply_to(&self, settings: &mut InstallSettings) {
        if let Some(mode) = self.partition_mode {
            settings.partition_mode = mode;
        }
        if let Some(executor) = self.executor {
            settings.executor = executor;
        }
        if self.no_reboot {
            settings.reboot = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn install_args(cli: &Cli) -> InstallArgs {
        match cli.command() {
            Commands::Install(args) => args,
            other => panic!("expected install, got {:?}", other),
        }
    }

    #[test]
    fn test_no_subcommand_means_install() {
        let cli = Cli::try_parse_from(["mainix-installer"]).unwrap();
        assert_eq!(install_args(&cli), InstallArgs::default());
    }

    #[test]
    fn test_install_flags_parse() {
        let cli = Cli::try_parse_from([
            "mainix-installer",
            "--dry-run",
            "install",
            "--resume-from",
            "3",
            "--hostname",
            "mainix",
            "--profile",
            "webserver",
            "--partition-mode",
            "auto",
            "--executor",
            "process",
        ])
        .unwrap();
        assert!(cli.dry_run);
        let args = install_args(&cli);
        assert_eq!(args.resume_from, Some(3));
        assert_eq!(args.profile, Some(Profile::WebServer));
        assert_eq!(args.partition_mode, Some(PartitionMode::Auto));
        assert_eq!(args.executor, Some(ExecutorKind::Process));
        assert_eq!(args.overrides().hostname.as_deref(), Some("mainix"));
    }

    #[test]
    fn test_relaunch_base_args_reparse() {
        let cli = Cli::try_parse_from([
            "mainix-installer",
            "--config",
            "/etc/mainix.json",
            "--dry-run",
            "install",
            "--no-reboot",
            "--executor",
            "process",
            "--hostname",
            "mainix",
        ])
        .unwrap();
        let args = install_args(&cli);
        let mut relaunch = vec!["mainix-installer".to_string()];
        relaunch.extend(cli.relaunch_base_args(&args));
        relaunch.extend(["--resume-from".to_string(), "2".to_string()]);

        let reparsed = Cli::try_parse_from(&relaunch).unwrap();
        assert_eq!(reparsed.config, cli.config);
        assert!(reparsed.dry_run);
        let again = install_args(&reparsed);
        assert!(again.no_reboot);
        assert_eq!(again.executor, Some(ExecutorKind::Process));
        assert_eq!(again.resume_from, Some(2));
        // context values are not part of the base arguments
        assert_eq!(again.hostname, None);
    }

    #[test]
    fn test_read_only_subcommands() {
        let cli = Cli::try_parse_from(["mainix-installer", "partitions", "/dev/vda"]).unwrap();
        assert!(matches!(cli.command(), Commands::Partitions { disk } if disk == PathBuf::from("/dev/vda")));
        let cli = Cli::try_parse_from(["mainix-installer", "steps"]).unwrap();
        assert!(matches!(cli.command(), Commands::Steps));
        let cli = Cli::try_parse_from(["mainix-installer", "config"]).unwrap();
        assert!(matches!(cli.command(), Commands::Config { write: None }));
        let cli = Cli::try_parse_from(["mainix-installer", "config", "--write", "/tmp/mainix.json"]).unwrap();
        assert!(
            matches!(cli.command(), Commands::Config { write: Some(path) } if path == PathBuf::from("/tmp/mainix.json"))
        );
    }

    #[test]
    fn test_apply_to_settings() {
        let cli = Cli::try_parse_from([
            "mainix-installer",
            "--log-file",
            "/tmp/custom.log",
            "install",
            "--no-reboot",
        ])
        .unwrap();
        let mut settings = InstallSettings::default();
        cli.apply_to(&mut settings);
        install_args(&cli).apply_to(&mut settings);
        assert_eq!(settings.log_path, PathBuf::from("/tmp/custom.log"));
        assert!(!settings.reboot);
    }
}
