//! Step 6: GRUB.

use crate::context::InstallContext;
use crate::error::{InstallError, Result};
use crate::supervisor::quote_path;
use crate::templates;

use super::{ESP_MOUNT, StepEnv};

pub fn run(ctx: &mut InstallContext, env: &StepEnv) -> Result<()> {
    env.ensure_target_mounted(ctx)?;
    env.prepare_chroot(ctx)?;
    let uefi = ctx.firmware.is_uefi();

    let packages = if uefi { "grub efibootmgr" } else { "grub" };
    env.chroot(
        ctx,
        &format!("pacman -S --noconfirm --needed {}", packages),
        "Installing GRUB packages",
    )?;

    // grub-install overwrites its previous files, so it is safe to repeat
    let install = if uefi {
        format!(
            "grub-install --target=x86_64-efi --efi-directory={} --bootloader-id={}",
            ESP_MOUNT,
            templates::BOOTLOADER_ID
        )
    } else {
        let disk = ctx.disk.as_deref().ok_or_else(|| {
            InstallError::validation("no disk chosen for the BIOS boot sector; pass --disk")
        })?;
        format!("grub-install --target=i386-pc {}", quote_path(disk))
    };
    env.chroot(ctx, &install, &format!("Installing GRUB ({})", ctx.firmware))?;

    let defaults = env.read_target_file(ctx, "/etc/default/grub")?;
    let updated = templates::ensure_grub_distributor(&defaults);
    if updated != defaults {
        env.write_target_file(ctx, "/etc/default/grub", &updated)?;
    }

    env.chroot(
        ctx,
        "grub-mkconfig -o /boot/grub/grub.cfg",
        "Generating GRUB configuration",
    )?;
    Ok(())
}
