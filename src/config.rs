//! Installer settings
//!
//! Settings come from an optional JSON file (`--config`), with every field
//! defaulted so an empty object (or no file at all) is a valid configuration.
//! Command-line flags are applied on top by the binary.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use strum::{Display, EnumIter, EnumString};

use crate::context::Overrides;

/// How the disk gets partitioned
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[derive(Display, EnumString, EnumIter)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum PartitionMode {
    /// Interactive disk tool, operator decides the layout
    #[default]
    Manual,
    /// Fixed layout written with `parted --script` (wipes the disk)
    Auto,
}

/// Backend that runs detached tasks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[derive(Display, EnumString, EnumIter)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum ExecutorKind {
    /// Named, detached tmux session
    #[default]
    Tmux,
    /// Native child process in its own session (no terminal multiplexer)
    Process,
}

/// Tool used to run commands inside the target root
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[derive(Display, EnumString, EnumIter)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case", ascii_case_insensitive)]
pub enum ChrootTool {
    /// `arch-chroot`, which sets up its own API filesystem mounts
    #[default]
    ArchChroot,
    /// Plain `chroot`; the installer bind-mounts /proc, /sys, /dev, /run itself
    Chroot,
}

impl ChrootTool {
    pub fn binary(self) -> &'static str {
        match self {
            Self::ArchChroot => "arch-chroot",
            Self::Chroot => "chroot",
        }
    }
}

/// Every tunable of an install run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InstallSettings {
    // Supervisor
    pub log_path: PathBuf,
    pub sentinel_path: PathBuf,
    pub session_name: String,
    pub poll_interval_secs: u64,
    pub executor: ExecutorKind,

    // Timeouts for detached tasks
    pub disk_tool_timeout_secs: u64,
    pub bootstrap_timeout_secs: u64,
    pub package_timeout_secs: u64,

    // Disk
    pub partition_mode: PartitionMode,
    pub disk_tool: String,

    // Target system
    pub chroot_tool: ChrootTool,
    /// Program run in place of the chroot tool's own binary
    pub chroot_program: Option<String>,
    pub base_packages: Vec<String>,
    pub timezone: String,
    pub locales: Vec<String>,
    pub lang: String,
    pub keymap: String,
    pub console_font: String,
    pub wallpaper: Option<PathBuf>,

    // Run behaviour
    pub reboot: bool,
    pub dry_run: bool,

    /// Non-secret answers used when not given on the command line
    pub answers: Overrides,
}

impl Default for InstallSettings {
    fn default() -> Self {
        Self {
            log_path: PathBuf::from("/tmp/mainix-install.log"),
            sentinel_path: PathBuf::from("/tmp/mainix-task.status"),
            session_name: "mainix-task".to_string(),
            poll_interval_secs: 1,
            executor: ExecutorKind::Tmux,
            disk_tool_timeout_secs: 60 * 60,
            bootstrap_timeout_secs: 2 * 60 * 60,
            package_timeout_secs: 2 * 60 * 60,
            partition_mode: PartitionMode::Manual,
            disk_tool: "cfdisk".to_string(),
            chroot_tool: ChrootTool::ArchChroot,
            chroot_program: None,
            base_packages: ["base", "base-devel", "linux-zen", "linux-firmware"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            timezone: "Europe/Moscow".to_string(),
            locales: vec!["en_US.UTF-8 UTF-8".to_string(), "ru_RU.UTF-8 UTF-8".to_string()],
            lang: "en_US.UTF-8".to_string(),
            keymap: "ru".to_string(),
            console_font: "cyr-sun16".to_string(),
            wallpaper: Some(PathBuf::from("wallpaper.jpg")),
            reboot: true,
            dry_run: false,
            answers: Overrides::default(),
        }
    }
}

impl InstallSettings {
    /// Load settings from a JSON file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read settings from {:?}", path.as_ref()))?;

        let settings: Self =
            serde_json::from_str(&content).context("Failed to parse settings JSON")?;

        Ok(settings)
    }

    /// Load from `path` when given, defaults otherwise
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load_from_file(path),
            None => Ok(Self::default()),
        }
    }

    /// Save settings to a JSON file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let json = serde_json::to_string_pretty(self)
            .context("Failed to serialize settings to JSON")?;

        fs::write(&path, json)
            .with_context(|| format!("Failed to write settings to {:?}", path.as_ref()))?;

        Ok(())
    }

    /// Validate the settings
    pub fn validate(&self) -> Result<()> {
        if self.poll_interval_secs == 0 {
            anyhow::bail!("poll_interval_secs must be at least 1");
        }
        if self.disk_tool_timeout_secs == 0
            || self.bootstrap_timeout_secs == 0
            || self.package_timeout_secs == 0
        {
            anyhow::bail!("Detached task timeouts must be non-zero");
        }
        let session = self.session_name.trim();
        if session.is_empty() {
            anyhow::bail!("session_name must be specified");
        }
        // tmux treats ':' and '.' as target separators
        if session.contains([':', '.']) || session.contains(char::is_whitespace) {
            anyhow::bail!("session_name cannot contain ':', '.' or whitespace");
        }
        if self.base_packages.iter().all(|p| p.trim().is_empty()) {
            anyhow::bail!("base_packages must name at least one package");
        }
        if self.disk_tool.trim().is_empty() {
            anyhow::bail!("disk_tool must be specified");
        }
        if self.log_path == self.sentinel_path {
            anyhow::bail!("log_path and sentinel_path must differ");
        }
        Ok(())
    }

    /// Directory holding the sentinel, also used for executor state
    pub fn state_dir(&self) -> PathBuf {
        match self.sentinel_path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
            _ => PathBuf::from("."),
        }
    }

    /// Program that runs commands inside the target
    pub fn chroot_program(&self) -> &str {
        self.chroot_program
            .as_deref()
            .unwrap_or_else(|| self.chroot_tool.binary())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn disk_tool_timeout(&self) -> Duration {
        Duration::from_secs(self.disk_tool_timeout_secs)
    }

    pub fn bootstrap_timeout(&self) -> Duration {
        Duration::from_secs(self.bootstrap_timeout_secs)
    }

    pub fn package_timeout(&self) -> Duration {
        Duration::from_secs(self.package_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_settings_are_valid() {
        let settings = InstallSettings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.poll_interval(), Duration::from_secs(1));
        assert_eq!(settings.session_name, "mainix-task");
    }

    #[test]
    fn test_empty_object_uses_defaults() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "{{}}").unwrap();
        let settings = InstallSettings::load_from_file(file.path()).unwrap();
        assert_eq!(settings, InstallSettings::default());
    }

    #[test]
    fn test_partial_file_overrides_fields() {
        let mut file = NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"executor": "process", "chroot_tool": "chroot", "answers": {{"hostname": "mainix", "profile": "webserver"}}}}"#
        )
        .unwrap();
        let settings = InstallSettings::load_from_file(file.path()).unwrap();
        assert_eq!(settings.executor, ExecutorKind::Process);
        assert_eq!(settings.chroot_tool, ChrootTool::Chroot);
        assert_eq!(settings.answers.hostname.as_deref(), Some("mainix"));
        assert_eq!(settings.answers.profile, Some(crate::context::Profile::WebServer));
        assert_eq!(settings.partition_mode, PartitionMode::Manual);
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let file = NamedTempFile::new().unwrap();
        let mut settings = InstallSettings::default();
        settings.partition_mode = PartitionMode::Auto;
        settings.reboot = false;
        settings.save_to_file(file.path()).unwrap();

        let loaded = InstallSettings::load_from_file(file.path()).unwrap();
        assert_eq!(loaded, settings);
    }

    #[test]
    fn test_invalid_json_is_an_error() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();
        assert!(InstallSettings::load_from_file(file.path()).is_err());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut settings = InstallSettings::default();
        settings.poll_interval_secs = 0;
        assert!(settings.validate().is_err());

        let mut settings = InstallSettings::default();
        settings.session_name = "bad:name".into();
        assert!(settings.validate().is_err());

        let mut settings = InstallSettings::default();
        settings.base_packages.clear();
        assert!(settings.validate().is_err());

        let mut settings = InstallSettings::default();
        settings.sentinel_path = settings.log_path.clone();
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_enum_strings() {
        assert_eq!(ChrootTool::ArchChroot.to_string(), "arch-chroot");
        assert_eq!("arch-chroot".parse::<ChrootTool>().unwrap(), ChrootTool::ArchChroot);
        assert_eq!(ChrootTool::Chroot.binary(), "chroot");

        let mut settings = InstallSettings::default();
        assert_eq!(settings.chroot_program(), "arch-chroot");
        settings.chroot_program = Some("/usr/local/bin/arch-chroot".to_string());
        assert_eq!(settings.chroot_program(), "/usr/local/bin/arch-chroot");
        assert_eq!(settings.state_dir(), PathBuf::from("/tmp"));
        assert_eq!("AUTO".parse::<PartitionMode>().unwrap(), PartitionMode::Auto);
        assert_eq!(ExecutorKind::Process.to_string(), "process");
    }
}
