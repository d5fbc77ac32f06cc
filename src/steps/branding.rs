//! Step 4: distribution identity, console font, wallpaper.

use crate::context::InstallContext;
use crate::error::Result;
use crate::templates;

use super::StepEnv;
use super::users::{require_hostname, require_username};

/// Wallpaper location inside the target
pub const WALLPAPER_PATH: &str = "/usr/share/backgrounds/mainix-wallpaper.jpg";

pub fn run(ctx: &mut InstallContext, env: &StepEnv) -> Result<()> {
    env.ensure_target_mounted(ctx)?;
    let hostname = require_hostname(ctx, env)?;
    let username = require_username(ctx, env)?;

    let os_release = env.read_target_file(ctx, "/etc/os-release")?;
    let branded = templates::brand_os_release(&os_release);
    if branded != os_release {
        env.write_target_file(ctx, "/etc/os-release", &branded)?;
    }

    env.write_target_file(
        ctx,
        templates::IDENTITY_PATH,
        &templates::identity_file(&hostname, &username),
    )?;
    env.write_target_file(
        ctx,
        "/etc/vconsole.conf",
        &templates::vconsole_conf(&env.settings.keymap, &env.settings.console_font),
    )?;

    match env.settings.wallpaper.as_deref() {
        Some(wallpaper) if wallpaper.is_file() => {
            env.supervisor
                .install_file(wallpaper, &ctx.in_target(WALLPAPER_PATH))?;
        }
        Some(wallpaper) => {
            tracing::info!("No wallpaper at {}, skipping", wallpaper.display());
        }
        None => {}
    }
    Ok(())
}
