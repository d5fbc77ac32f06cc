//! File templates
//!
//! Pure renderers for the small configuration files the install steps
//! write. Every function that edits an existing file is idempotent:
//! applying it to its own output changes nothing, so a restarted step can
//! safely run it again.

/// Name shown in os-release, the identity file and GRUB
pub const DISTRO_NAME: &str = "MainiX 2 (Oak)";
pub const DISTRO_ID: &str = "mainix";
pub const DISTRO_ID_LIKE: &str = "arch";
/// Boot entry and GRUB_DISTRIBUTOR value
pub const BOOTLOADER_ID: &str = "MainiX";

/// Identity file inside the target
pub const IDENTITY_PATH: &str = "/etc/mainix-release";

pub fn hostname_file(hostname: &str) -> String {
    format!("{}\n", hostname)
}

pub fn hosts_file(hostname: &str) -> String {
    format!(
        "127.0.0.1   localhost\n::1         localhost\n127.0.1.1   {host}.localdomain {host}\n",
        host = hostname
    )
}

/// Identity file: distribution, hostname and primary user.
pub fn identity_file(hostname: &str, username: &str) -> String {
    format!(
        "DISTRIB_NAME=\"{}\"\nHOSTNAME={}\nUSERNAME={}\n",
        DISTRO_NAME, hostname, username
    )
}

/// Hostname and username read back from an identity file
pub fn parse_identity(content: &str) -> (Option<String>, Option<String>) {
    let mut hostname = None;
    let mut username = None;
    for line in content.lines() {
        if let Some(value) = line.strip_prefix("HOSTNAME=") {
            hostname = Some(value.to_string());
        } else if let Some(value) = line.strip_prefix("USERNAME=") {
            username = Some(value.to_string());
        }
    }
    (hostname, username)
}

/// Rebrand an os-release file.
///
/// Rewrites `NAME`, `PRETTY_NAME`, `ID` and `ID_LIKE`, appending whichever
/// is missing. Other keys are kept as they are.
pub fn brand_os_release(existing: &str) -> String {
    let branded = [
        ("NAME", format!("\"{}\"", DISTRO_NAME)),
        ("PRETTY_NAME", format!("\"{}\"", DISTRO_NAME)),
        ("ID", DISTRO_ID.to_string()),
        ("ID_LIKE", DISTRO_ID_LIKE.to_string()),
    ];

    let mut seen = [false; 4];
    let mut out = String::new();
    for line in existing.lines() {
        let key = line.split_once('=').map(|(k, _)| k.trim());
        match branded.iter().position(|(k, _)| Some(*k) == key) {
            Some(i) => {
                if !seen[i] {
                    out.push_str(&format!("{}={}\n", branded[i].0, branded[i].1));
                    seen[i] = true;
                }
            }
            None => {
                out.push_str(line);
                out.push('\n');
            }
        }
    }
    for (i, (key, value)) in branded.iter().enumerate() {
        if !seen[i] {
            out.push_str(&format!("{}={}\n", key, value));
        }
    }
    out
}

/// Append every line of `lines` that `existing` does not contain yet.
///
/// Returns `None` when the file already has all of them.
pub fn append_lines_if_absent(existing: &str, lines: &[String]) -> Option<String> {
    let present: Vec<&str> = existing.lines().map(str::trim).collect();
    let missing: Vec<&String> = lines
        .iter()
        .filter(|l| !present.contains(&l.trim()))
        .collect();
    if missing.is_empty() {
        return None;
    }

    let mut out = existing.to_string();
    if !out.is_empty() && !out.ends_with('\n') {
        out.push('\n');
    }
    for line in missing {
        out.push_str(line.trim());
        out.push('\n');
    }
    Some(out)
}

pub fn locale_conf(lang: &str) -> String {
    format!("LANG={}\n", lang)
}

pub fn vconsole_conf(keymap: &str, font: &str) -> String {
    format!("KEYMAP={}\nFONT={}\n", keymap, font)
}

/// Let members of `wheel` use sudo.
///
/// Uncomments the stock `# %wheel ALL=(ALL:ALL) ALL` (or the older
/// `(ALL)` form); appends a rule when neither is present.
pub fn enable_wheel(sudoers: &str) -> String {
    let is_wheel_rule = |line: &str| {
        let rule = line.split_whitespace().collect::<Vec<_>>().join(" ");
        rule == "%wheel ALL=(ALL:ALL) ALL" || rule == "%wheel ALL=(ALL) ALL"
    };

    let mut enabled = sudoers.lines().any(is_wheel_rule);
    let mut out = String::new();
    for line in sudoers.lines() {
        let uncommented = line.trim_start().strip_prefix('#').map(str::trim_start);
        match uncommented {
            Some(rule) if !enabled && is_wheel_rule(rule) => {
                out.push_str(rule);
                enabled = true;
            }
            _ => out.push_str(line),
        }
        out.push('\n');
    }
    if !enabled {
        out.push_str("%wheel ALL=(ALL:ALL) ALL\n");
    }
    out
}

/// Set `GRUB_DISTRIBUTOR` in `/etc/default/grub`.
pub fn ensure_grub_distributor(existing: &str) -> String {
    let wanted = format!("GRUB_DISTRIBUTOR=\"{}\"", BOOTLOADER_ID);
    let mut found = false;
    let mut out = String::new();
    for line in existing.lines() {
        if line.trim_start().starts_with("GRUB_DISTRIBUTOR=") {
            if !found {
                out.push_str(&wanted);
                out.push('\n');
                found = true;
            }
        } else {
            out.push_str(line);
            out.push('\n');
        }
    }
    if !found {
        out.push_str(&wanted);
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const ARCH_OS_RELEASE: &str = "NAME=\"Arch Linux\"\nPRETTY_NAME=\"Arch Linux\"\nID=arch\nBUILD_ID=rolling\nHOME_URL=\"https://archlinux.org/\"\n";

    #[test]
    fn test_hostname_file() {
        assert_eq!(hostname_file("mainix"), "mainix\n");
        assert!(hosts_file("mainix").contains("127.0.1.1   mainix.localdomain mainix"));
    }

    #[test]
    fn test_identity_round_trip() {
        let content = identity_file("mainix", "user");
        assert!(content.contains("MainiX 2 (Oak)"));
        assert_eq!(
            parse_identity(&content),
            (Some("mainix".to_string()), Some("user".to_string()))
        );
    }

    #[test]
    fn test_brand_os_release() {
        let branded = brand_os_release(ARCH_OS_RELEASE);
        assert!(branded.contains("NAME=\"MainiX 2 (Oak)\"\n"));
        assert!(branded.contains("PRETTY_NAME=\"MainiX 2 (Oak)\"\n"));
        assert!(branded.contains("ID=mainix\n"));
        assert!(branded.contains("ID_LIKE=arch\n"));
        assert!(branded.contains("BUILD_ID=rolling\n"));
        assert!(!branded.contains("Arch Linux"));
        assert_eq!(brand_os_release(&branded), branded);
    }

    #[test]
    fn test_append_lines_if_absent() {
        let lines = vec!["en_US.UTF-8 UTF-8".to_string(), "ru_RU.UTF-8 UTF-8".to_string()];
        let once = append_lines_if_absent("#en_US.UTF-8 UTF-8", &lines).unwrap();
        assert_eq!(once, "#en_US.UTF-8 UTF-8\nen_US.UTF-8 UTF-8\nru_RU.UTF-8 UTF-8\n");
        assert_eq!(append_lines_if_absent(&once, &lines), None);
    }

    #[test]
    fn test_enable_wheel_uncomments_stock_rule() {
        let stock = "root ALL=(ALL:ALL) ALL\n# %wheel ALL=(ALL:ALL) ALL\n# %wheel ALL=(ALL:ALL) NOPASSWD: ALL\n";
        let enabled = enable_wheel(stock);
        assert!(enabled.contains("\n%wheel ALL=(ALL:ALL) ALL\n"));
        assert!(enabled.contains("# %wheel ALL=(ALL:ALL) NOPASSWD: ALL"));
        assert_eq!(enable_wheel(&enabled), enabled);
    }

    #[test]
    fn test_enable_wheel_appends_when_missing() {
        let enabled = enable_wheel("root ALL=(ALL:ALL) ALL\n");
        assert!(enabled.ends_with("%wheel ALL=(ALL:ALL) ALL\n"));
        assert_eq!(enable_wheel(&enabled), enabled);
    }

    #[test]
    fn test_grub_distributor() {
        let stock = "GRUB_DEFAULT=0\nGRUB_DISTRIBUTOR=\"Arch\"\n";
        let updated = ensure_grub_distributor(stock);
        assert_eq!(updated, "GRUB_DEFAULT=0\nGRUB_DISTRIBUTOR=\"MainiX\"\n");
        assert_eq!(ensure_grub_distributor(&updated), updated);
        assert!(ensure_grub_distributor("").contains("GRUB_DISTRIBUTOR=\"MainiX\""));
    }

    #[test]
    fn test_console_and_locale() {
        assert_eq!(vconsole_conf("ru", "cyr-sun16"), "KEYMAP=ru\nFONT=cyr-sun16\n");
        assert_eq!(locale_conf("en_US.UTF-8"), "LANG=en_US.UTF-8\n");
    }
}
