//! Mount state
//!
//! Mount decisions are made from the kernel's current mount table, never
//! from an in-memory "already mounted" flag: a restarted installer loses its
//! memory, the mounts persist.

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{InstallError, Result};
use crate::supervisor::{TaskSupervisor, quote_path};

/// One line of `/proc/self/mountinfo`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountEntry {
    pub mount_point: PathBuf,
    pub source: String,
    pub fstype: String,
}

/// Parse mountinfo content.
///
/// `<id> <parent> <maj:min> <root> <mount point> <opts...> - <fstype> <source> <superopts>`
pub fn parse_mountinfo(content: &str) -> Vec<MountEntry> {
    content
        .lines()
        .filter_map(|line| {
            let (pre, post) = line.split_once(" - ")?;
            let pre_fields: Vec<&str> = pre.split_whitespace().collect();
            if pre_fields.len() < 5 {
                return None;
            }
            let mut post_fields = post.split_whitespace();
            let fstype = post_fields.next()?.to_string();
            let source = unescape_mount_path(post_fields.next()?);
            Some(MountEntry {
                mount_point: PathBuf::from(unescape_mount_path(pre_fields[4])),
                source,
                fstype,
            })
        })
        .collect()
}

/// Undo the octal escapes the kernel applies to paths
pub fn unescape_mount_path(raw: &str) -> String {
    raw.replace("\\040", " ")
        .replace("\\011", "\t")
        .replace("\\012", "\n")
        .replace("\\134", "\\")
}

fn normalize(path: &Path) -> PathBuf {
    let s = path.to_string_lossy();
    if s.len() > 1 && s.ends_with('/') {
        PathBuf::from(s.trim_end_matches('/'))
    } else {
        path.to_path_buf()
    }
}

/// Source of the current mount table
pub trait MountTable: Send + Sync {
    fn entries(&self) -> Result<Vec<MountEntry>>;
}

/// Live table from `/proc/self/mountinfo`
#[derive(Debug, Default, Clone)]
pub struct ProcMounts;

impl MountTable for ProcMounts {
    fn entries(&self) -> Result<Vec<MountEntry>> {
        let content = fs::read_to_string("/proc/self/mountinfo")?;
        Ok(parse_mountinfo(&content))
    }
}

/// Fixed table for tests
#[derive(Debug, Default, Clone)]
pub struct StaticMounts(pub Vec<MountEntry>);

impl StaticMounts {
    pub fn from_mountinfo(content: &str) -> Self {
        Self(parse_mountinfo(content))
    }
}

impl MountTable for StaticMounts {
    fn entries(&self) -> Result<Vec<MountEntry>> {
        Ok(self.0.clone())
    }
}

/// Topmost mount at exactly `mount_point`
pub fn find_mount(table: &dyn MountTable, mount_point: &Path) -> Result<Option<MountEntry>> {
    let target = normalize(mount_point);
    Ok(table
        .entries()?
        .into_iter()
        .rev()
        .find(|e| normalize(&e.mount_point) == target))
}

pub fn is_mounted(table: &dyn MountTable, mount_point: &Path) -> Result<bool> {
    Ok(find_mount(table, mount_point)?.is_some())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MountAction {
    Mounted,
    AlreadyMounted,
}

fn same_device(source: &str, device: &Path) -> bool {
    if Path::new(source) == device {
        return true;
    }
    // by-uuid / by-label links resolve to the kernel name
    match (fs::canonicalize(source), fs::canonicalize(device)) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

/// Mount `device` at `target` unless it is already mounted there.
///
/// A different device at `target` is an error: mounting over it would hide
/// whatever an earlier step put there.
pub fn ensure_mounted(
    table: &dyn MountTable,
    sup: &TaskSupervisor,
    device: &Path,
    target: &Path,
) -> Result<MountAction> {
    if !sup.is_dry_run() {
        if let Some(entry) = find_mount(table, target)? {
            if same_device(&entry.source, device) {
                tracing::info!("{} already mounted at {}", device.display(), target.display());
                return Ok(MountAction::AlreadyMounted);
            }
            return Err(InstallError::validation(format!(
                "{} is already mounted from {}, not {}",
                target.display(),
                entry.source,
                device.display()
            )));
        }
    }

    sup.create_dir_all(target)?;
    sup.run(
        &format!("mount {} {}", quote_path(device), quote_path(target)),
        &format!("Mounting {} at {}", device.display(), target.display()),
    )?;
    Ok(MountAction::Mounted)
}

/// Bind `source` onto `target` unless something is mounted there already.
pub fn ensure_bind_mount(
    table: &dyn MountTable,
    sup: &TaskSupervisor,
    source: &Path,
    target: &Path,
) -> Result<MountAction> {
    if !sup.is_dry_run() && is_mounted(table, target)? {
        tracing::debug!("{} already mounted", target.display());
        return Ok(MountAction::AlreadyMounted);
    }
    sup.create_dir_all(target)?;
    sup.run(
        &format!("mount --rbind {} {}", quote_path(source), quote_path(target)),
        &format!("Binding {} into the target", source.display()),
    )?;
    Ok(MountAction::Mounted)
}

/// Recursively unmount `target` if it is mounted.
pub fn unmount_recursive(table: &dyn MountTable, sup: &TaskSupervisor, target: &Path) -> Result<bool> {
    if !sup.is_dry_run() && !is_mounted(table, target)? {
        tracing::info!("{} is not mounted", target.display());
        return Ok(false);
    }
    sup.run(
        &format!("umount -R {}", quote_path(target)),
        &format!("Unmounting {}", target.display()),
    )?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::ProcessGroupExecutor;
    use crate::run_log::RunLog;
    use crate::status::RecordingSink;
    use std::sync::Arc;

    fn supervisor(dir: &Path, dry_run: bool) -> TaskSupervisor {
        TaskSupervisor::new(
            RunLog::new(dir.join("run.log")),
            Arc::new(RecordingSink::default()),
            Box::new(ProcessGroupExecutor::with_state_dir(dir)),
        )
        .with_dry_run(dry_run)
    }

    const SAMPLE: &str = "36 28 0:31 / / rw,relatime - ext4 /dev/sda3 rw\n\
                          37 36 0:32 / /mnt rw,relatime - ext4 /dev/vda1 rw\n\
                          38 37 0:33 / /mnt/boot/EFI rw,relatime - vfat /dev/vda2 rw\n";

    #[test]
    fn test_parse_mountinfo_sources() {
        let entries = parse_mountinfo(SAMPLE);
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[1].mount_point, PathBuf::from("/mnt"));
        assert_eq!(entries[1].source, "/dev/vda1");
        assert_eq!(entries[2].fstype, "vfat");
    }

    #[test]
    fn test_unescape_paths() {
        let entries = parse_mountinfo("36 28 0:31 / /mnt/data\\040disk rw - ext4 /dev/sdb1 rw\n");
        assert_eq!(entries[0].mount_point, PathBuf::from("/mnt/data disk"));
    }

    #[test]
    fn test_find_mount_ignores_trailing_slash() {
        let table = StaticMounts::from_mountinfo(SAMPLE);
        let entry = find_mount(&table, Path::new("/mnt/")).unwrap().unwrap();
        assert_eq!(entry.source, "/dev/vda1");
        assert!(!is_mounted(&table, Path::new("/mnt/home")).unwrap());
    }

    #[test]
    fn test_malformed_lines_are_skipped() {
        assert!(parse_mountinfo("garbage\n36 28 0:31 /\n").is_empty());
    }

    #[test]
    fn test_same_device_is_left_mounted() {
        let dir = tempfile::tempdir().unwrap();
        let sup = supervisor(dir.path(), false);
        let table = StaticMounts::from_mountinfo(SAMPLE);

        let action = ensure_mounted(&table, &sup, Path::new("/dev/vda1"), Path::new("/mnt")).unwrap();
        assert_eq!(action, MountAction::AlreadyMounted);
        let action = ensure_mounted(&table, &sup, Path::new("/dev/vda2"), Path::new("/mnt/boot/EFI")).unwrap();
        assert_eq!(action, MountAction::AlreadyMounted);
        assert!(sup.log().commands().unwrap().is_empty());
    }

    #[test]
    fn test_foreign_device_is_not_mounted_over() {
        let dir = tempfile::tempdir().unwrap();
        let sup = supervisor(dir.path(), false);
        let table = StaticMounts::from_mountinfo(SAMPLE);

        let err = ensure_mounted(&table, &sup, Path::new("/dev/vdb1"), Path::new("/mnt")).unwrap_err();
        assert!(matches!(err, InstallError::Validation(_)));
        assert!(sup.log().commands().unwrap().is_empty());
    }

    #[test]
    fn test_unmounted_target_gets_mounted() {
        let dir = tempfile::tempdir().unwrap();
        let sup = supervisor(dir.path(), true);
        let table = StaticMounts::default();

        let action = ensure_mounted(&table, &sup, Path::new("/dev/vda1"), Path::new("/mnt")).unwrap();
        assert_eq!(action, MountAction::Mounted);
        assert_eq!(sup.log().commands().unwrap(), vec!["mount '/dev/vda1' '/mnt'"]);
    }

    #[test]
    fn test_bind_mount_only_when_absent() {
        let dir = tempfile::tempdir().unwrap();
        let sup = supervisor(dir.path(), false);
        let table = StaticMounts::from_mountinfo(
            "40 37 0:5 / /mnt/proc rw - proc proc rw\n",
        );

        let action = ensure_bind_mount(&table, &sup, Path::new("/proc"), Path::new("/mnt/proc")).unwrap();
        assert_eq!(action, MountAction::AlreadyMounted);
        assert!(sup.log().commands().unwrap().is_empty());

        let sup = supervisor(dir.path(), true);
        let action = ensure_bind_mount(&table, &sup, Path::new("/sys"), Path::new("/mnt/sys")).unwrap();
        assert_eq!(action, MountAction::Mounted);
        assert_eq!(sup.log().commands().unwrap(), vec!["mount --rbind '/sys' '/mnt/sys'"]);
    }

    #[test]
    fn test_unmount_skips_unmounted_target() {
        let dir = tempfile::tempdir().unwrap();
        let sup = supervisor(dir.path(), false);
        let table = StaticMounts::default();
        assert!(!unmount_recursive(&table, &sup, Path::new("/mnt")).unwrap());
        assert!(sup.log().commands().unwrap().is_empty());
    }
}
