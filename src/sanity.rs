//! Pre-flight sanity checks for the runtime environment
//!
//! Verified at the start of every install attempt:
//! - Required runtime binaries are present (the set depends on settings)
//! - Running with root privileges (EUID 0)
//!
//! A failure is an [`InstallError::EnvironmentPrecondition`], which the
//! orchestrator never restarts.

use std::env;

use crate::config::{ExecutorKind, InstallSettings, PartitionMode};
use crate::error::{InstallError, Result};
use crate::hardware::FirmwareMode;

/// Result of environment verification
#[derive(Debug)]
pub struct SanityCheckResult {
    pub missing_binaries: Vec<String>,
    pub is_root: bool,
}

impl SanityCheckResult {
    /// Returns true if all checks passed
    pub fn is_ok(&self) -> bool {
        self.missing_binaries.is_empty() && self.is_root
    }

    /// Operator-facing description of every failed check
    pub fn describe(&self) -> String {
        let mut lines = Vec::new();
        if !self.is_root {
            lines.push("root privileges required (run with sudo or as root)".to_string());
        }
        if !self.missing_binaries.is_empty() {
            let packages: Vec<&str> = self
                .missing_binaries
                .iter()
                .map(|b| package_for_binary(b))
                .collect();
            lines.push(format!(
                "missing required tools: {} (install: pacman -S {})",
                self.missing_binaries.join(", "),
                dedup(packages).join(" ")
            ));
        }
        lines.join("; ")
    }
}

/// Binaries the install run will call for these settings
pub fn required_binaries(settings: &InstallSettings, firmware: FirmwareMode) -> Vec<String> {
    let mut binaries: Vec<String> = [
        "bash",
        "lsblk",
        "mount",
        "umount",
        "udevadm",
        "mkfs.ext4",
        "pacstrap",
        "genfstab",
    ]
    .iter()
    .map(|b| b.to_string())
    .collect();

    if let Some(program) = settings.chroot_program().split_whitespace().next() {
        binaries.push(program.to_string());
    }
    if firmware.is_uefi() {
        binaries.push("mkfs.fat".to_string());
    }
    if settings.executor == ExecutorKind::Tmux {
        binaries.push("tmux".to_string());
    }
    match settings.partition_mode {
        PartitionMode::Auto => {
            binaries.push("parted".to_string());
            binaries.push("partprobe".to_string());
        }
        PartitionMode::Manual => {
            if let Some(tool) = settings.disk_tool.split_whitespace().next() {
                binaries.push(tool.to_string());
            }
        }
    }
    binaries
}

/// Check if a binary is available in PATH
pub fn binary_exists(name: &str) -> bool {
    which::which(name).is_ok()
}

/// Check if running as root (EUID 0)
fn is_running_as_root() -> bool {
    nix::unistd::geteuid().is_root()
}

/// Skip root check (for development/testing)
/// Set MAINIX_SKIP_ROOT_CHECK=1 to skip
pub fn should_skip_root_check() -> bool {
    env::var("MAINIX_SKIP_ROOT_CHECK")
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

/// Perform all sanity checks and return the result
pub fn verify_environment(settings: &InstallSettings, firmware: FirmwareMode) -> SanityCheckResult {
    let missing_binaries = required_binaries(settings, firmware)
        .into_iter()
        .filter(|binary| !binary_exists(binary))
        .collect();

    SanityCheckResult {
        missing_binaries,
        is_root: is_running_as_root() || should_skip_root_check(),
    }
}

/// Verify the environment, as a precondition error on failure.
///
/// In dry-run mode nothing is executed, so failed checks are only warned about.
pub fn check(settings: &InstallSettings, firmware: FirmwareMode) -> Result<()> {
    tracing::debug!("Running pre-flight sanity checks...");
    let result = verify_environment(settings, firmware);
    if result.is_ok() {
        tracing::info!("Pre-flight checks passed");
        return Ok(());
    }
    if settings.dry_run {
        tracing::warn!("Pre-flight checks failed (ignored in dry-run): {}", result.describe());
        return Ok(());
    }
    Err(InstallError::precondition(result.describe()))
}

/// Map binary names to their Arch Linux package names
fn package_for_binary(binary: &str) -> &str {
    match binary {
        "bash" => "bash",
        "lsblk" | "mount" | "umount" | "cfdisk" | "fdisk" | "sfdisk" => "util-linux",
        "udevadm" => "systemd",
        "mkfs.ext4" => "e2fsprogs",
        "mkfs.fat" => "dosfstools",
        "pacstrap" | "genfstab" | "arch-chroot" => "arch-install-scripts",
        "chroot" => "coreutils",
        "tmux" => "tmux",
        "parted" | "partprobe" => "parted",
        "gdisk" | "cgdisk" | "sgdisk" => "gptfdisk",
        other => other,
    }
}

fn dedup(mut items: Vec<&str>) -> Vec<&str> {
    let mut seen = Vec::new();
    items.retain(|item| {
        if seen.contains(item) {
            false
        } else {
            seen.push(*item);
            true
        }
    });
    items
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ChrootTool;

    #[test]
    fn test_binary_exists_bash() {
        assert!(binary_exists("bash"), "bash should be available");
    }

    #[test]
    fn test_binary_exists_nonexistent() {
        assert!(!binary_exists("this_binary_definitely_does_not_exist_12345"));
    }

    #[test]
    fn test_required_binaries_follow_settings() {
        let mut settings = InstallSettings::default();
        settings.executor = ExecutorKind::Tmux;
        settings.partition_mode = PartitionMode::Manual;
        settings.disk_tool = "cfdisk".to_string();
        let bios = required_binaries(&settings, FirmwareMode::Bios);
        assert!(bios.contains(&"tmux".to_string()));
        assert!(bios.contains(&"cfdisk".to_string()));
        assert!(bios.contains(&"arch-chroot".to_string()));
        assert!(!bios.contains(&"mkfs.fat".to_string()));

        settings.executor = ExecutorKind::Process;
        settings.partition_mode = PartitionMode::Auto;
        settings.chroot_tool = ChrootTool::Chroot;
        let uefi = required_binaries(&settings, FirmwareMode::Uefi);
        assert!(!uefi.contains(&"tmux".to_string()));
        assert!(uefi.contains(&"parted".to_string()));
        assert!(uefi.contains(&"chroot".to_string()));
        assert!(uefi.contains(&"mkfs.fat".to_string()));
    }

    #[test]
    fn test_package_mapping() {
        assert_eq!(package_for_binary("pacstrap"), "arch-install-scripts");
        assert_eq!(package_for_binary("mkfs.fat"), "dosfstools");
        assert_eq!(package_for_binary("partprobe"), "parted");
    }

    #[test]
    fn test_sanity_result_is_ok() {
        let ok_result = SanityCheckResult {
            missing_binaries: vec![],
            is_root: true,
        };
        assert!(ok_result.is_ok());

        let missing_binary = SanityCheckResult {
            missing_binaries: vec!["pacstrap".to_string(), "genfstab".to_string()],
            is_root: true,
        };
        assert!(!missing_binary.is_ok());
        let description = missing_binary.describe();
        assert!(description.contains("pacstrap, genfstab"));
        assert!(description.ends_with("pacman -S arch-install-scripts)"));

        let not_root = SanityCheckResult {
            missing_binaries: vec![],
            is_root: false,
        };
        assert!(!not_root.is_ok());
        assert!(not_root.describe().contains("root privileges"));
    }

    #[test]
    fn test_dry_run_tolerates_missing_tools() {
        let mut settings = InstallSettings::default();
        settings.disk_tool = "this_binary_definitely_does_not_exist_12345".to_string();
        settings.dry_run = true;
        assert!(check(&settings, FirmwareMode::Bios).is_ok());

        settings.dry_run = false;
        let err = check(&settings, FirmwareMode::Bios).unwrap_err();
        assert!(matches!(err, InstallError::EnvironmentPrecondition(_)));
    }
}
