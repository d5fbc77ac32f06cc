//! Step 2: bootstrap the base system and generate fstab.

use crate::context::InstallContext;
use crate::error::Result;
use crate::supervisor::{quote_path, shell_quote};

use super::StepEnv;

pub fn run(ctx: &mut InstallContext, env: &StepEnv) -> Result<()> {
    env.ensure_target_mounted(ctx)?;

    // --needed makes a re-run after a partial bootstrap cheap
    let packages: Vec<String> = env
        .settings
        .base_packages
        .iter()
        .map(|p| p.trim())
        .filter(|p| !p.is_empty())
        .map(shell_quote)
        .collect();
    let command = format!(
        "pacstrap {} --needed {}",
        quote_path(&ctx.target),
        packages.join(" ")
    );
    env.supervisor.run_to_completion(
        &command,
        "Installing base system",
        env.settings.bootstrap_timeout(),
    )?;

    // Overwritten, not appended, so repeated runs do not duplicate entries
    let fstab = env.supervisor.run(
        &format!("genfstab -U {}", quote_path(&ctx.target)),
        "Generating fstab",
    )?;
    env.write_target_file(ctx, "/etc/fstab", &fstab.stdout)?;
    Ok(())
}
