//! Step 1: disk selection, partitioning and formatting.
//!
//! Manual mode hands the disk to the interactive disk tool in a detached
//! session; auto mode writes a fixed layout:
//!
//! ```text
//! UEFI: gpt   | 1: ESP, fat32, 1MiB-513MiB | 2: root, ext4, rest
//! BIOS: msdos | 1: root, ext4, bootable, whole disk
//! ```
//!
//! If the target is already mounted, an earlier attempt got past this step
//! and nothing is repartitioned or reformatted.

use std::path::{Path, PathBuf};

use crate::config::PartitionMode;
use crate::context::InstallContext;
use crate::error::{InstallError, Result};
use crate::inventory::{self, BlockDevice, PartitionCheck};
use crate::mounts;
use crate::prompt::ask_valid;
use crate::supervisor::quote_path;

use super::StepEnv;

const MANUAL_ENTRY: &str = "other (enter a device path)";

pub fn run(ctx: &mut InstallContext, env: &StepEnv) -> Result<()> {
    if !env.supervisor.is_dry_run() {
        if let Some(entry) = mounts::find_mount(env.mounts.as_ref(), &ctx.target)? {
            tracing::info!(
                "{} already mounted from {}; partitioning was done by an earlier attempt",
                ctx.target.display(),
                entry.source
            );
            if ctx.root_partition.is_none() {
                ctx.root_partition = Some(PathBuf::from(&entry.source));
            }
            return env.ensure_target_mounted(ctx);
        }
    }

    let disk = select_disk(ctx, env)?;
    match env.settings.partition_mode {
        PartitionMode::Manual => partition_manually(ctx, env, &disk)?,
        PartitionMode::Auto => partition_automatically(ctx, env, &disk)?,
    }

    select_partitions(ctx, env, &disk)?;
    format_partitions(ctx, env)?;
    env.ensure_target_mounted(ctx)
}

// ============================================================================
// Disk
// ============================================================================

fn select_disk(ctx: &mut InstallContext, env: &StepEnv) -> Result<PathBuf> {
    if let Some(disk) = ctx.disk.clone() {
        check_disk(env, &disk)?;
        return Ok(disk);
    }

    let disk = ask_valid(env.prompter.as_ref(), || {
        let disks = inventory::list_disks(env.probe.as_ref());
        let disk = pick_device(env, "Install to disk", &disks)?;
        check_disk(env, &disk)?;
        Ok(disk)
    })?;
    tracing::info!("Selected disk {}", disk.display());
    ctx.disk = Some(disk.clone());
    Ok(disk)
}

fn check_disk(env: &StepEnv, disk: &Path) -> Result<()> {
    if env.supervisor.is_dry_run() || env.probe.is_block_device(disk) {
        Ok(())
    } else {
        Err(InstallError::validation(format!(
            "{} is not a block device",
            disk.display()
        )))
    }
}

/// Menu of `devices` plus a manual entry; an empty inventory goes straight
/// to asking for a path.
fn pick_device(env: &StepEnv, question: &str, devices: &[BlockDevice]) -> Result<PathBuf> {
    if devices.is_empty() {
        env.prompter.show("No candidates detected automatically.");
        let path = env.prompter.ask(&format!("{} (device path)", question), None)?;
        return parse_device_path(&path);
    }

    let mut options: Vec<String> = devices.iter().map(|d| d.describe()).collect();
    options.push(MANUAL_ENTRY.to_string());
    let index = env.prompter.choose(question, &options)?;
    match devices.get(index) {
        Some(device) => Ok(device.path.clone()),
        None => {
            let path = env.prompter.ask(&format!("{} (device path)", question), None)?;
            parse_device_path(&path)
        }
    }
}

fn parse_device_path(answer: &str) -> Result<PathBuf> {
    let answer = answer.trim();
    if !answer.starts_with("/dev/") {
        return Err(InstallError::validation(format!(
            "'{}' is not a /dev path",
            answer
        )));
    }
    Ok(PathBuf::from(answer))
}

// ============================================================================
// Partitioning
// ============================================================================

fn partition_manually(ctx: &InstallContext, env: &StepEnv, disk: &Path) -> Result<()> {
    let wanted = if ctx.firmware.is_uefi() {
        "an EFI system partition and a root partition"
    } else {
        "a root partition"
    };
    env.prompter.show(&format!(
        "Starting {} on {}. Create {}, write the table and quit when done.",
        env.settings.disk_tool,
        disk.display(),
        wanted
    ));
    env.supervisor.run_interactive(
        &format!("{} {}", env.settings.disk_tool, quote_path(disk)),
        &format!("Partitioning {}", disk.display()),
        env.settings.disk_tool_timeout(),
    )
}

fn partition_automatically(ctx: &InstallContext, env: &StepEnv, disk: &Path) -> Result<()> {
    let answer = env.prompter.ask(
        &format!("All data on {} will be erased. Type 'yes' to continue", disk.display()),
        None,
    )?;
    if !answer.trim().eq_ignore_ascii_case("yes") {
        return Err(InstallError::Cancelled);
    }

    let d = quote_path(disk);
    let script = if ctx.firmware.is_uefi() {
        format!(
            "parted --script {d} mklabel gpt \
             mkpart ESP fat32 1MiB 513MiB set 1 esp on \
             mkpart root ext4 513MiB 100%"
        )
    } else {
        format!(
            "parted --script {d} mklabel msdos \
             mkpart primary ext4 1MiB 100% set 1 boot on"
        )
    };
    env.supervisor
        .run(&script, &format!("Writing {} partition table", ctx.firmware))?;
    // The kernel re-reads the table asynchronously
    env.supervisor
        .run(&format!("partprobe {d} && udevadm settle"), "Re-reading partition table")?;
    Ok(())
}

// ============================================================================
// Partition selection and formatting
// ============================================================================

fn select_partitions(ctx: &mut InstallContext, env: &StepEnv, disk: &Path) -> Result<()> {
    let auto = env.settings.partition_mode == PartitionMode::Auto;
    let uefi = ctx.firmware.is_uefi();

    if ctx.root_partition.is_none() {
        let root = if auto {
            inventory::partition_path(disk, if uefi { 2 } else { 1 })
        } else {
            choose_partition(env, disk, "Root partition", None)?
        };
        tracing::info!("Root partition {}", root.display());
        ctx.root_partition = Some(root);
    }

    if uefi && ctx.efi_partition.is_none() {
        let esp = if auto {
            inventory::partition_path(disk, 1)
        } else {
            choose_partition(env, disk, "EFI system partition", ctx.root_partition.as_deref())?
        };
        tracing::info!("EFI system partition {}", esp.display());
        ctx.efi_partition = Some(esp);
    }

    if ctx.efi_partition.is_some() && ctx.root_partition == ctx.efi_partition {
        return Err(InstallError::validation(
            "root and EFI system partition must differ",
        ));
    }
    Ok(())
}

/// Re-queries the inventory on every attempt: the table just changed.
fn choose_partition(
    env: &StepEnv,
    disk: &Path,
    question: &str,
    exclude: Option<&Path>,
) -> Result<PathBuf> {
    ask_valid(env.prompter.as_ref(), || {
        let partitions: Vec<BlockDevice> = inventory::list_partitions(env.probe.as_ref(), disk)
            .into_iter()
            .filter(|p| Some(p.path.as_path()) != exclude)
            .collect();
        let path = pick_device(env, question, &partitions)?;
        if !env.supervisor.is_dry_run() {
            inventory::check_partition_device(env.probe.as_ref(), &path)
                .map_err(|reason| InstallError::validation(reason.to_string()))?;
        }
        Ok(path)
    })
}

fn format_partitions(ctx: &InstallContext, env: &StepEnv) -> Result<()> {
    let dry_run = env.supervisor.is_dry_run();
    let root = ctx
        .root_partition
        .as_deref()
        .ok_or_else(|| InstallError::validation("no root partition chosen"))?;

    // Never format a phantom node
    if !dry_run {
        inventory::check_partition_device(env.probe.as_ref(), root)
            .map_err(|reason| InstallError::validation(reason.to_string()))?;
    }
    env.supervisor.run(
        &format!("mkfs.ext4 -F {}", quote_path(root)),
        &format!("Formatting {} as ext4", root.display()),
    )?;

    if let (true, Some(esp)) = (ctx.firmware.is_uefi(), ctx.efi_partition.as_deref()) {
        let needs_format = dry_run
            || matches!(
                inventory::check_partition(env.probe.as_ref(), esp),
                Err(PartitionCheck::NoFilesystem(_))
            );
        if needs_format {
            env.supervisor.run(
                &format!("mkfs.fat -F32 {}", quote_path(esp)),
                &format!("Formatting {} as FAT32", esp.display()),
            )?;
        } else {
            tracing::info!("{} already has a filesystem, keeping it", esp.display());
        }
    }

    if !dry_run {
        // lsblk reads filesystem types from the udev database
        env.supervisor.query("udevadm settle", "Waiting for udev")?;
        inventory::check_partition(env.probe.as_ref(), root).map_err(|reason| {
            InstallError::validation(format!("root partition unusable after formatting: {}", reason))
        })?;
    }
    Ok(())
}
