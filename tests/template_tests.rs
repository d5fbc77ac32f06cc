//! File template integration tests
//!
//! Every edit applied to its own output must be a no-op, because a restarted
//! step runs it again over the file it already wrote.

use mainix::templates::{
    BOOTLOADER_ID, append_lines_if_absent, brand_os_release, enable_wheel,
    ensure_grub_distributor, hostname_file, hosts_file, identity_file, parse_identity,
};

const ARCH_OS_RELEASE: &str = "NAME=\"Arch Linux\"\n\
PRETTY_NAME=\"Arch Linux\"\n\
ID=arch\n\
BUILD_ID=rolling\n\
ANSI_COLOR=\"38;2;23;147;209\"\n\
HOME_URL=\"https://archlinux.org/\"\n";

const STOCK_SUDOERS: &str = "root ALL=(ALL:ALL) ALL\n\
## Uncomment to allow members of group wheel to execute any command\n\
# %wheel ALL=(ALL:ALL) ALL\n";

const STOCK_GRUB: &str = "GRUB_DEFAULT=0\n\
GRUB_TIMEOUT=5\n\
GRUB_DISTRIBUTOR=\"Arch\"\n\
GRUB_CMDLINE_LINUX_DEFAULT=\"loglevel=3 quiet\"\n";

// =============================================================================
// Identity
// =============================================================================

#[test]
fn test_identity_and_hostname_carry_literal_values() {
    let identity = identity_file("mainix", "user");
    assert!(identity.lines().any(|l| l == "HOSTNAME=mainix"));
    assert!(identity.lines().any(|l| l == "USERNAME=user"));
    assert_eq!(
        parse_identity(&identity),
        (Some("mainix".to_string()), Some("user".to_string()))
    );

    assert_eq!(hostname_file("mainix"), "mainix\n");
    assert!(hosts_file("mainix").contains("mainix.localdomain mainix"));
}

// =============================================================================
// Idempotent edits
// =============================================================================

#[test]
fn test_os_release_branding() {
    let branded = brand_os_release(ARCH_OS_RELEASE);
    assert!(branded.contains("NAME=\"MainiX 2 (Oak)\"\n"));
    assert!(branded.contains("ID=mainix\n"));
    assert!(branded.contains("ID_LIKE=arch\n"));
    assert!(branded.contains("BUILD_ID=rolling\n"));
    assert!(!branded.contains("Arch Linux"));
    assert_eq!(brand_os_release(&branded), branded);
}

#[test]
fn test_wheel_enabled_once() {
    let enabled = enable_wheel(STOCK_SUDOERS);
    assert!(enabled.lines().any(|l| l.trim() == "%wheel ALL=(ALL:ALL) ALL"));
    assert_eq!(enable_wheel(&enabled), enabled);
}

#[test]
fn test_grub_distributor() {
    let updated = ensure_grub_distributor(STOCK_GRUB);
    assert!(updated.contains(&format!("GRUB_DISTRIBUTOR=\"{}\"", BOOTLOADER_ID)));
    assert_eq!(updated.matches("GRUB_DISTRIBUTOR=").count(), 1);
    assert_eq!(ensure_grub_distributor(&updated), updated);
}

#[test]
fn test_locale_lines_appended_once() {
    let locales = vec!["en_US.UTF-8 UTF-8".to_string()];
    let first = append_lines_if_absent("#en_US.UTF-8 UTF-8\n", &locales).unwrap();
    assert!(first.lines().any(|l| l == "en_US.UTF-8 UTF-8"));
    assert_eq!(append_lines_if_absent(&first, &locales), None);
}
