//! Install Actions
//!
//! Step bodies for the Step Engine. Each one is a short composition of
//! Device Inventory queries, Task Supervisor invocations and small file
//! writes, and each one may be re-entered after a restart: every mutation is
//! guarded by a check of the current system state (mount table, existing
//! users, file contents), never by an in-memory flag.
//!
//! | # | Step                        | Module        |
//! |---|-----------------------------|---------------|
//! | 1 | Disk partitioning           | [`disk`]      |
//! | 2 | Installing base system      | [`base`]      |
//! | 3 | User configuration          | [`users`]     |
//! | 4 | Branding                    | [`branding`]  |
//! | 5 | Installing profile packages | [`profiles`]  |
//! | 6 | Installing bootloader       | [`bootloader`]|
//! | 7 | Enabling services           | [`services`]  |

pub mod base;
pub mod bootloader;
pub mod branding;
pub mod disk;
pub mod profiles;
pub mod services;
pub mod users;

use std::path::Path;
use std::sync::Arc;

use crate::config::{ChrootTool, InstallSettings};
use crate::context::InstallContext;
use crate::engine::StepEngine;
use crate::error::{InstallError, Result};
use crate::inventory::{self, DeviceProbe};
use crate::mounts::{self, MountTable};
use crate::prompt::Prompter;
use crate::supervisor::{CommandOutput, TaskSupervisor, quote_path, shell_quote};

/// Mount point of the EFI system partition, relative to the target root
pub const ESP_MOUNT: &str = "/boot/EFI";

/// API filesystems bound into the target when plain `chroot` is used
const CHROOT_BINDS: &[&str] = &["/proc", "/sys", "/dev", "/run"];

/// Collaborators shared by every step.
pub struct StepEnv {
    pub supervisor: TaskSupervisor,
    pub prompter: Arc<dyn Prompter>,
    pub probe: Box<dyn DeviceProbe>,
    pub mounts: Box<dyn MountTable>,
    pub settings: InstallSettings,
}

impl StepEnv {
    /// `command` wrapped to run inside the target root
    pub fn chroot_command(&self, ctx: &InstallContext, command: &str) -> String {
        format!(
            "{} {} bash -c {}",
            self.settings.chroot_program(),
            quote_path(&ctx.target),
            shell_quote(command)
        )
    }

    /// Make the target usable by the chroot tool.
    ///
    /// `arch-chroot` sets up its own API mounts; plain `chroot` needs them
    /// bound in, each only if not already mounted.
    pub fn prepare_chroot(&self, ctx: &InstallContext) -> Result<()> {
        if self.settings.chroot_tool == ChrootTool::ArchChroot {
            return Ok(());
        }
        for source in CHROOT_BINDS {
            mounts::ensure_bind_mount(
                self.mounts.as_ref(),
                &self.supervisor,
                Path::new(source),
                &ctx.in_target(source),
            )?;
        }
        Ok(())
    }

    /// Blocking command inside the target
    pub fn chroot(&self, ctx: &InstallContext, command: &str, label: &str) -> Result<CommandOutput> {
        self.supervisor.run(&self.chroot_command(ctx, command), label)
    }

    /// Probe inside the target; a non-zero exit is an answer
    pub fn chroot_query(&self, ctx: &InstallContext, command: &str, label: &str) -> Result<CommandOutput> {
        self.supervisor.query(&self.chroot_command(ctx, command), label)
    }

    /// Blocking command inside the target with `input` on stdin (never logged)
    pub fn chroot_with_input(
        &self,
        ctx: &InstallContext,
        command: &str,
        label: &str,
        input: &str,
    ) -> Result<CommandOutput> {
        self.supervisor
            .run_with_input(&self.chroot_command(ctx, command), label, input)
    }

    /// Write `contents` to the absolute path `path` inside the target
    pub fn write_target_file(&self, ctx: &InstallContext, path: &str, contents: &str) -> Result<()> {
        self.supervisor.write_file(&ctx.in_target(path), contents)
    }

    /// Current content of `path` inside the target, empty when missing
    pub fn read_target_file(&self, ctx: &InstallContext, path: &str) -> Result<String> {
        Ok(self
            .supervisor
            .read_file(&ctx.in_target(path))?
            .unwrap_or_default())
    }

    /// Mount the root partition (and the ESP on UEFI) unless already mounted.
    ///
    /// Every step after partitioning starts here, so a restarted run
    /// re-validates its mounts before touching the target.
    pub fn ensure_target_mounted(&self, ctx: &InstallContext) -> Result<()> {
        let root = ctx.root_partition.as_deref().ok_or_else(|| {
            InstallError::validation("no root partition chosen; pass --root-partition or resume from step 1")
        })?;
        self.verify_before_mount(root)?;
        mounts::ensure_mounted(self.mounts.as_ref(), &self.supervisor, root, &ctx.target)?;

        if ctx.firmware.is_uefi() {
            if let Some(esp) = ctx.efi_partition.as_deref() {
                self.verify_before_mount(esp)?;
                mounts::ensure_mounted(
                    self.mounts.as_ref(),
                    &self.supervisor,
                    esp,
                    &ctx.in_target(ESP_MOUNT),
                )?;
            }
        }
        Ok(())
    }

    fn verify_before_mount(&self, partition: &Path) -> Result<()> {
        if self.supervisor.is_dry_run() {
            tracing::info!("[dry-run] skipping verification of {}", partition.display());
            return Ok(());
        }
        inventory::check_partition(self.probe.as_ref(), partition)
            .map(|_| ())
            .map_err(|reason| InstallError::validation(format!("partition check failed: {}", reason)))
    }
}

/// The install sequence, in order.
pub fn install_steps() -> StepEngine<StepEnv> {
    StepEngine::new()
        .step("Disk partitioning", disk::run)
        .step("Installing base system", base::run)
        .step("User configuration", users::run)
        .step("Branding", branding::run)
        .step("Installing profile packages", profiles::run)
        .step("Installing bootloader", bootloader::run)
        .step("Enabling services", services::run)
}

/// After the last step: unmount the target and reboot.
pub fn finalize(ctx: &InstallContext, env: &StepEnv) -> Result<()> {
    env.supervisor.sink().report("Finalizing installation", Some(100));
    mounts::unmount_recursive(env.mounts.as_ref(), &env.supervisor, &ctx.target)?;
    if env.settings.reboot {
        env.supervisor.run("reboot", "Rebooting into the installed system")?;
    } else {
        env.prompter
            .show("Installation complete. Reboot when ready.");
    }
    Ok(())
}
