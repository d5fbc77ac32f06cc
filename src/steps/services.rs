//! Step 7: enable the profile's services.

use crate::context::InstallContext;
use crate::error::Result;

use super::StepEnv;
use super::profiles::require_profile;

pub fn run(ctx: &mut InstallContext, env: &StepEnv) -> Result<()> {
    env.ensure_target_mounted(ctx)?;
    env.prepare_chroot(ctx)?;
    let profile = require_profile(ctx, env)?;

    // `systemctl enable` is idempotent
    for service in profile.services() {
        env.chroot(
            ctx,
            &format!("systemctl enable {}", service),
            &format!("Enabling {}", service),
        )?;
    }
    Ok(())
}
