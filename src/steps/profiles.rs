//! Step 5: profile packages (desktop, web server, or networking only).

use strum::IntoEnumIterator;

use crate::context::{InstallContext, Profile};
use crate::error::Result;
use crate::prompt::ask_valid;

use super::StepEnv;

pub fn run(ctx: &mut InstallContext, env: &StepEnv) -> Result<()> {
    env.ensure_target_mounted(ctx)?;
    env.prepare_chroot(ctx)?;
    let profile = require_profile(ctx, env)?;

    let command = format!(
        "pacman -S --noconfirm --needed {}",
        profile.packages().join(" ")
    );
    // Detached: package downloads can outlast any sane blocking call
    env.supervisor.run_to_completion(
        &env.chroot_command(ctx, &command),
        &format!("Installing {} packages", profile),
        env.settings.package_timeout(),
    )
}

/// Profile from the context, chosen from a menu when missing
pub fn require_profile(ctx: &mut InstallContext, env: &StepEnv) -> Result<Profile> {
    if let Some(profile) = ctx.profile {
        return Ok(profile);
    }
    let profiles: Vec<Profile> = Profile::iter().collect();
    let options: Vec<String> = profiles
        .iter()
        .map(|p| format!("{} - {}", p, p.description()))
        .collect();
    let index = ask_valid(env.prompter.as_ref(), || {
        env.prompter.choose("System profile", &options)
    })?;
    let profile = profiles[index];
    tracing::info!("Selected profile {}", profile);
    ctx.profile = Some(profile);
    Ok(profile)
}
