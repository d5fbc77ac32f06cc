//! Install context
//!
//! The single carrier of cross-step state. Created once at process start
//! (optionally pre-populated from command-line overrides or configuration
//! answers), owned by the caller of the Step Engine and passed by reference
//! to every step. A step that collects a value stores it here; no step
//! re-derives a value another step already collected.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use strum::{Display, EnumIter, EnumString};

use crate::hardware::FirmwareMode;

/// Default mount point of the target root filesystem
pub const DEFAULT_TARGET: &str = "/mnt";

/// Credential held only in memory.
///
/// No `Display` impl and a redacted `Debug`: a secret never reaches a log line.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Access the raw value. Only for feeding an external tool's stdin.
    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(***)")
    }
}

/// System profile installed on top of the base system
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[derive(Display, EnumString, EnumIter)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum Profile {
    /// Minimal system with networking only
    Base,
    /// Budgie desktop with GDM
    #[default]
    Desktop,
    /// nginx + PHP-FPM + OpenSSH
    #[strum(serialize = "webserver")]
    WebServer,
}

impl Profile {
    /// Packages installed into the target for this profile
    pub fn packages(self) -> &'static [&'static str] {
        match self {
            Self::Base => &["networkmanager"],
            Self::Desktop => &[
                "budgie-desktop",
                "gnome-terminal",
                "networkmanager",
                "firefox",
                "gnome-themes-extra",
                "adwaita-icon-theme",
                "gdm",
            ],
            Self::WebServer => &["networkmanager", "nginx", "php-fpm", "openssh"],
        }
    }

    /// Services enabled in the target for this profile
    pub fn services(self) -> &'static [&'static str] {
        match self {
            Self::Base => &["NetworkManager"],
            Self::Desktop => &["NetworkManager", "gdm"],
            Self::WebServer => &["NetworkManager", "nginx", "php-fpm", "sshd"],
        }
    }

    /// Human-readable description for the selection menu
    pub fn description(self) -> &'static str {
        match self {
            Self::Base => "Base (minimal, networking only)",
            Self::Desktop => "Desktop (Budgie)",
            Self::WebServer => "Web server (nginx + PHP)",
        }
    }
}

/// Non-secret values that may be supplied up front.
///
/// Used for command-line overrides, configuration-file answers, and the
/// arguments of a relaunched process.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Overrides {
    pub disk: Option<PathBuf>,
    pub root_partition: Option<PathBuf>,
    pub efi_partition: Option<PathBuf>,
    pub hostname: Option<String>,
    pub username: Option<String>,
    pub profile: Option<Profile>,
    pub target: Option<PathBuf>,
}

impl Overrides {
    /// Fill every unset field of `self` from `fallback`.
    pub fn or(self, fallback: Overrides) -> Overrides {
        Overrides {
            disk: self.disk.or(fallback.disk),
            root_partition: self.root_partition.or(fallback.root_partition),
            efi_partition: self.efi_partition.or(fallback.efi_partition),
            hostname: self.hostname.or(fallback.hostname),
            username: self.username.or(fallback.username),
            profile: self.profile.or(fallback.profile),
            target: self.target.or(fallback.target),
        }
    }
}

/// Mutable state threaded through the whole run.
#[derive(Debug, Clone)]
pub struct InstallContext {
    /// Whole disk the system is installed to (e.g. `/dev/sda`)
    pub disk: Option<PathBuf>,
    /// Root partition (e.g. `/dev/sda2`)
    pub root_partition: Option<PathBuf>,
    /// EFI system partition, only on UEFI installs
    pub efi_partition: Option<PathBuf>,
    pub hostname: Option<String>,
    pub username: Option<String>,
    pub user_password: Option<Secret>,
    pub root_password: Option<Secret>,
    pub profile: Option<Profile>,
    /// Target mount point
    pub target: PathBuf,
    /// Firmware the live system booted with
    pub firmware: FirmwareMode,
}

impl Default for InstallContext {
    fn default() -> Self {
        Self::new()
    }
}

impl InstallContext {
    pub fn new() -> Self {
        Self {
            disk: None,
            root_partition: None,
            efi_partition: None,
            hostname: None,
            username: None,
            user_password: None,
            root_password: None,
            profile: None,
            target: PathBuf::from(DEFAULT_TARGET),
            firmware: FirmwareMode::Bios,
        }
    }

    /// Build a context pre-populated from overrides.
    pub fn from_overrides(overrides: Overrides, firmware: FirmwareMode) -> Self {
        Self {
            disk: overrides.disk,
            root_partition: overrides.root_partition,
            efi_partition: overrides.efi_partition,
            hostname: overrides.hostname,
            username: overrides.username,
            profile: overrides.profile,
            target: overrides
                .target
                .unwrap_or_else(|| PathBuf::from(DEFAULT_TARGET)),
            firmware,
            ..Self::new()
        }
    }

    /// Path of `absolute` inside the target root.
    ///
    /// `ctx.in_target("/etc/hostname")` → `/mnt/etc/hostname`
    pub fn in_target(&self, absolute: impl AsRef<Path>) -> PathBuf {
        let relative = absolute
            .as_ref()
            .strip_prefix("/")
            .unwrap_or(absolute.as_ref());
        self.target.join(relative)
    }

    /// Non-secret overrides reproducing this context in a relaunched process.
    pub fn overrides(&self) -> Overrides {
        Overrides {
            disk: self.disk.clone(),
            root_partition: self.root_partition.clone(),
            efi_partition: self.efi_partition.clone(),
            hostname: self.hostname.clone(),
            username: self.username.clone(),
            profile: self.profile,
            target: Some(self.target.clone()),
        }
    }

    /// Command-line flags for [`InstallContext::overrides`]. Secrets are
    /// never included; a relaunched run prompts for them again.
    pub fn to_cli_args(&self) -> Vec<String> {
        let o = self.overrides();
        let mut args = Vec::new();
        let mut push = |flag: &str, value: Option<String>| {
            if let Some(value) = value {
                args.push(flag.to_string());
                args.push(value);
            }
        };
        let lossy = |p: Option<PathBuf>| p.map(|p| p.to_string_lossy().into_owned());
        push("--disk", lossy(o.disk));
        push("--root-partition", lossy(o.root_partition));
        push("--efi-partition", lossy(o.efi_partition));
        push("--hostname", o.hostname);
        push("--username", o.username);
        push("--profile", o.profile.map(|p| p.to_string()));
        push("--target", lossy(o.target));
        args
    }
}
