//! Firmware detection
//!
//! Decides between the UEFI and BIOS variants of the automatic partition
//! layout and the bootloader target. Pure filesystem check, no shelling out.

use std::fmt;
use std::path::Path;

/// Detected firmware mode of the live system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FirmwareMode {
    /// UEFI firmware: GPT + EFI system partition
    Uefi,
    /// Legacy BIOS firmware: msdos label, GRUB in the MBR
    Bios,
}

impl FirmwareMode {
    pub fn is_uefi(self) -> bool {
        matches!(self, Self::Uefi)
    }
}

impl fmt::Display for FirmwareMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Uefi => write!(f, "UEFI"),
            Self::Bios => write!(f, "BIOS"),
        }
    }
}

/// Detect firmware mode by checking for the EFI variables directory.
///
/// The kernel only exposes `/sys/firmware/efi/efivars` when booted through
/// UEFI with runtime services available, which is what `grub-install
/// --target=x86_64-efi` needs.
pub fn detect_firmware_mode() -> FirmwareMode {
    detect_firmware_mode_at(Path::new("/sys/firmware/efi/efivars"))
}

/// Same as [`detect_firmware_mode`] with an explicit probe path.
pub fn detect_firmware_mode_at(efivars: &Path) -> FirmwareMode {
    if efivars.exists() {
        tracing::info!("UEFI firmware detected ({} exists)", efivars.display());
        FirmwareMode::Uefi
    } else {
        tracing::info!("BIOS firmware detected ({} not found)", efivars.display());
        FirmwareMode::Bios
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_firmware_mode_display() {
        assert_eq!(FirmwareMode::Uefi.to_string(), "UEFI");
        assert_eq!(FirmwareMode::Bios.to_string(), "BIOS");
    }

    #[test]
    fn test_detect_with_existing_path_is_uefi() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(detect_firmware_mode_at(dir.path()), FirmwareMode::Uefi);
    }

    #[test]
    fn test_detect_with_missing_path_is_bios() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("efivars");
        assert_eq!(detect_firmware_mode_at(&missing), FirmwareMode::Bios);
    }
}
