//! Step 3: hostname, time zone, locale, accounts.
//!
//! Credentials only ever travel through `chpasswd`'s standard input.

use crate::context::{InstallContext, Secret};
use crate::error::{InstallError, Result};
use crate::prompt::{Prompter, ask_valid, validate_hostname, validate_password, validate_username};
use crate::supervisor::shell_quote;
use crate::templates;

use super::StepEnv;

pub fn run(ctx: &mut InstallContext, env: &StepEnv) -> Result<()> {
    env.ensure_target_mounted(ctx)?;
    env.prepare_chroot(ctx)?;

    let hostname = require_hostname(ctx, env)?;
    let username = require_username(ctx, env)?;
    let root_password = match ctx.root_password.clone() {
        Some(secret) => secret,
        None => {
            let secret = ask_new_password(env.prompter.as_ref(), "root")?;
            ctx.root_password = Some(secret.clone());
            secret
        }
    };
    let user_password = match ctx.user_password.clone() {
        Some(secret) => secret,
        None => {
            let secret = ask_new_password(env.prompter.as_ref(), &username)?;
            ctx.user_password = Some(secret.clone());
            secret
        }
    };

    env.write_target_file(ctx, "/etc/hostname", &templates::hostname_file(&hostname))?;
    env.write_target_file(ctx, "/etc/hosts", &templates::hosts_file(&hostname))?;

    configure_time_and_locale(ctx, env)?;

    env.chroot_with_input(ctx, "chpasswd", "Setting root password", &chpasswd_line("root", &root_password))?;

    let exists = env
        .chroot_query(ctx, &format!("id -u {}", shell_quote(&username)), "Checking for existing user")?
        .success;
    if exists {
        tracing::info!("User {} already exists", username);
    } else {
        env.chroot(
            ctx,
            &format!("useradd -m -G wheel -s /bin/bash {}", shell_quote(&username)),
            &format!("Creating user {}", username),
        )?;
    }
    env.chroot_with_input(
        ctx,
        "chpasswd",
        &format!("Setting password for {}", username),
        &chpasswd_line(&username, &user_password),
    )?;

    let sudoers = env.read_target_file(ctx, "/etc/sudoers")?;
    let enabled = templates::enable_wheel(&sudoers);
    if enabled != sudoers {
        env.write_target_file(ctx, "/etc/sudoers", &enabled)?;
    }
    Ok(())
}

fn configure_time_and_locale(ctx: &InstallContext, env: &StepEnv) -> Result<()> {
    let settings = &env.settings;
    env.chroot(
        ctx,
        &format!(
            "ln -sf {} /etc/localtime",
            shell_quote(&format!("/usr/share/zoneinfo/{}", settings.timezone))
        ),
        &format!("Setting time zone {}", settings.timezone),
    )?;
    env.chroot(ctx, "hwclock --systohc", "Syncing hardware clock")?;

    let locale_gen = env.read_target_file(ctx, "/etc/locale.gen")?;
    if let Some(updated) = templates::append_lines_if_absent(&locale_gen, &settings.locales) {
        env.write_target_file(ctx, "/etc/locale.gen", &updated)?;
    }
    env.write_target_file(ctx, "/etc/locale.conf", &templates::locale_conf(&settings.lang))?;
    env.chroot(ctx, "locale-gen", "Generating locales")?;
    Ok(())
}

/// `user:password\n`, the input format of chpasswd
fn chpasswd_line(user: &str, password: &Secret) -> String {
    format!("{}:{}\n", user, password.expose())
}

/// Hostname from the context, asked for when missing
pub fn require_hostname(ctx: &mut InstallContext, env: &StepEnv) -> Result<String> {
    if let Some(hostname) = &ctx.hostname {
        validate_hostname(hostname)?;
        return Ok(hostname.clone());
    }
    let hostname = ask_valid(env.prompter.as_ref(), || {
        let answer = env.prompter.ask("Hostname", Some("mainix"))?;
        validate_hostname(&answer)?;
        Ok(answer)
    })?;
    ctx.hostname = Some(hostname.clone());
    Ok(hostname)
}

/// Username from the context, asked for when missing
pub fn require_username(ctx: &mut InstallContext, env: &StepEnv) -> Result<String> {
    if let Some(username) = &ctx.username {
        validate_username(username)?;
        return Ok(username.clone());
    }
    let username = ask_valid(env.prompter.as_ref(), || {
        let answer = env.prompter.ask("Username", None)?;
        validate_username(&answer)?;
        Ok(answer)
    })?;
    ctx.username = Some(username.clone());
    Ok(username)
}

/// Ask twice and compare.
fn ask_new_password(prompter: &dyn Prompter, account: &str) -> Result<Secret> {
    ask_valid(prompter, || {
        let first = prompter.ask_secret(&format!("Password for {}", account))?;
        validate_password(&first)?;
        let second = prompter.ask_secret(&format!("Repeat password for {}", account))?;
        if first != second {
            return Err(InstallError::validation("passwords do not match"));
        }
        Ok(first)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prompt::ScriptedPrompter;

    #[test]
    fn test_chpasswd_line() {
        assert_eq!(chpasswd_line("user", &Secret::new("pw")), "user:pw\n");
    }

    #[test]
    fn test_password_mismatch_reprompts() {
        let prompter = ScriptedPrompter::new(["one", "two", "same", "same"]);
        let secret = ask_new_password(&prompter, "root").unwrap();
        assert_eq!(secret.expose(), "same");
        assert!(prompter.shown()[0].contains("do not match"));
    }
}
