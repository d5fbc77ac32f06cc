//! Property-Based Tests for the MainiX installer
//!
//! Uses proptest for testing invariants and edge cases
//!
//! These tests verify:
//! - Shell quoting survives a real shell unchanged
//! - Disk listing never offers a digit-named, read-only or removable device
//! - Identity file round-trips
//! - Enum string round-trips (to_string → parse)

use proptest::prelude::*;
use std::process::Command;

use mainix::config::{ChrootTool, ExecutorKind, PartitionMode};
use mainix::context::Profile;
use mainix::inventory::{FixtureProbe, list_disks};
use mainix::supervisor::shell_quote;
use mainix::templates::{identity_file, parse_identity};
use strum::IntoEnumIterator;

// =============================================================================
// Shell Quoting Property Tests
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// bash reads a quoted word back as the original string
    #[test]
    fn shell_quote_round_trips_through_bash(value in "[^\\x00]{0,40}") {
        let output = Command::new("bash")
            .arg("-c")
            .arg(format!("printf '%s' {}", shell_quote(&value)))
            .output()
            .unwrap();
        prop_assert!(output.status.success());
        prop_assert_eq!(String::from_utf8_lossy(&output.stdout).into_owned(), value);
    }
}

// =============================================================================
// Disk Filter Property Tests
// =============================================================================

#[derive(Debug, Clone)]
struct FakeDisk {
    name: String,
    ro: bool,
    rm: bool,
}

fn disk_strategy() -> impl Strategy<Value = FakeDisk> {
    ("[a-z]{2,4}[0-9]?(n[0-9])?", any::<bool>(), any::<bool>())
        .prop_map(|(name, ro, rm)| FakeDisk { name, ro, rm })
}

fn lsblk_json(disks: &[FakeDisk]) -> String {
    let rows: Vec<String> = disks
        .iter()
        .map(|d| {
            format!(
                r#"{{"name": "{}", "path": "/dev/{}", "size": 1073741824, "type": "disk", "ro": {}, "rm": {}}}"#,
                d.name, d.name, d.ro, d.rm
            )
        })
        .collect();
    format!(r#"{{"blockdevices": [{}]}}"#, rows.join(","))
}

proptest! {
    /// Every listed disk is writable, fixed and digit-free; every such input disk is listed
    #[test]
    fn list_disks_applies_every_filter(generated in prop::collection::vec(disk_strategy(), 0..8)) {
        let mut disks: Vec<FakeDisk> = Vec::new();
        for disk in generated {
            if !disks.iter().any(|d| d.name == disk.name) {
                disks.push(disk);
            }
        }
        let probe = FixtureProbe::from_json(&lsblk_json(&disks)).unwrap();
        let listed = list_disks(&probe);

        for disk in &listed {
            let name = disk.path.file_name().unwrap().to_string_lossy().into_owned();
            prop_assert!(!name.chars().any(|c| c.is_ascii_digit()));
            let source = disks.iter().find(|d| d.name == name).unwrap();
            prop_assert!(!source.ro && !source.rm);
        }

        let expected = disks
            .iter()
            .filter(|d| !d.ro && !d.rm && !d.name.chars().any(|c| c.is_ascii_digit()))
            .count();
        prop_assert_eq!(listed.len(), expected);
    }
}

// =============================================================================
// Identity File Property Tests
// =============================================================================

proptest! {
    #[test]
    fn identity_file_round_trips(hostname in "[a-z][a-z0-9-]{2,30}", username in "[a-z][a-z0-9_-]{2,30}") {
        let content = identity_file(&hostname, &username);
        prop_assert_eq!(parse_identity(&content), (Some(hostname), Some(username)));
    }
}

// =============================================================================
// Enum Round-Trip Tests
// =============================================================================

#[test]
fn enum_strings_round_trip() {
    for profile in Profile::iter() {
        assert_eq!(profile.to_string().parse::<Profile>().unwrap(), profile);
    }
    for mode in PartitionMode::iter() {
        assert_eq!(mode.to_string().parse::<PartitionMode>().unwrap(), mode);
    }
    for kind in ExecutorKind::iter() {
        assert_eq!(kind.to_string().parse::<ExecutorKind>().unwrap(), kind);
    }
    for tool in ChrootTool::iter() {
        assert_eq!(tool.to_string().parse::<ChrootTool>().unwrap(), tool);
    }
}
