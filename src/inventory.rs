//! Device Inventory
//!
//! Enumerates block devices and partitions from `lsblk --json` and validates
//! a chosen partition before anything destructive touches it.
//!
//! Records are never cached: every query re-reads the block-device table,
//! because partitioning changes it underneath us.
//!
//! Listing never fails. A query error is logged and yields an empty list so
//! the caller can show "no candidates" and fall back to asking for a path.

use serde::{Deserialize, Deserializer};
use serde_json::Value;
use std::collections::HashSet;
use std::fs;
use std::os::unix::fs::FileTypeExt;
use std::path::{Path, PathBuf};
use std::process::Command;
use thiserror::Error;

/// Columns requested from lsblk
pub const LSBLK_COLUMNS: &str = "NAME,PATH,SIZE,TYPE,RO,RM,MODEL,FSTYPE,PARTTYPE";

/// MBR extended partition type codes (DOS, LBA, Linux)
const EXTENDED_PARTTYPES: &[&str] = &["0x5", "0xf", "0x85"];
/// MBR and GPT swap partition types
const SWAP_PARTTYPES: &[&str] = &["0x82", "0657fd6d-a4ab-43c4-84e5-0933c84b4f4f"];

// ============================================================================
// Records
// ============================================================================

/// Device or partition as presented to the operator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockDevice {
    pub path: PathBuf,
    pub size_bytes: u64,
    /// Model for disks, filesystem type for partitions
    pub label: String,
}

impl BlockDevice {
    /// Human-readable size, e.g. `20.0G`
    pub fn size(&self) -> String {
        human_size(self.size_bytes)
    }

    /// One menu line: path, size, label
    pub fn describe(&self) -> String {
        let line = format!("{} {} {}", self.path.display(), self.size(), self.label);
        line.trim_end().to_string()
    }
}

/// Binary-prefixed size with one decimal.
pub fn human_size(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "K", "M", "G", "T", "P"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{}B", bytes)
    } else {
        format!("{:.1}{}", value, UNITS[unit])
    }
}

/// One row of `lsblk --json --bytes`.
///
/// Older util-linux prints sizes and flags as strings, newer ones as
/// numbers and booleans; both are accepted.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BlockNode {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default, deserialize_with = "flexible_u64")]
    pub size: u64,
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default, deserialize_with = "flexible_flag")]
    pub ro: bool,
    #[serde(default, deserialize_with = "flexible_flag")]
    pub rm: bool,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub fstype: Option<String>,
    #[serde(default)]
    pub parttype: Option<String>,
    #[serde(default)]
    pub children: Vec<BlockNode>,
}

impl BlockNode {
    /// Device path, falling back to `/dev/<name>` for old lsblk without PATH
    pub fn device_path(&self) -> PathBuf {
        match self.path.as_deref() {
            Some(p) if !p.is_empty() => PathBuf::from(p),
            _ => Path::new("/dev").join(&self.name),
        }
    }

    /// Non-empty detected filesystem type
    pub fn filesystem(&self) -> Option<&str> {
        self.fstype
            .as_deref()
            .map(str::trim)
            .filter(|f| !f.is_empty())
    }

    fn find(&self, path: &Path) -> Option<&BlockNode> {
        if self.device_path() == path {
            return Some(self);
        }
        self.children.iter().find_map(|c| c.find(path))
    }
}

#[derive(Debug, Deserialize)]
struct LsblkResponse {
    #[serde(default)]
    blockdevices: Vec<BlockNode>,
}

fn flexible_u64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
    Ok(match Value::deserialize(deserializer)? {
        Value::Number(n) => n.as_u64().unwrap_or(0),
        Value::String(s) => s.trim().parse().unwrap_or(0),
        _ => 0,
    })
}

fn flexible_flag<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
    Ok(match Value::deserialize(deserializer)? {
        Value::Bool(b) => b,
        Value::Number(n) => n.as_u64().unwrap_or(0) != 0,
        Value::String(s) => matches!(s.trim(), "1" | "true"),
        _ => false,
    })
}

/// Parse the JSON printed by `lsblk -J -b -o` [`LSBLK_COLUMNS`].
pub fn parse_lsblk(json: &str) -> anyhow::Result<Vec<BlockNode>> {
    let response: LsblkResponse = serde_json::from_str(json)?;
    Ok(response.blockdevices)
}

// ============================================================================
// Probe
// ============================================================================

/// Source of block-device information.
pub trait DeviceProbe: Send + Sync {
    /// Block-device tree, for every device or rooted at `device`
    fn block_tree(&self, device: Option<&Path>) -> anyhow::Result<Vec<BlockNode>>;

    /// Whether `path` is a block special file
    fn is_block_device(&self, path: &Path) -> bool;
}

/// Live system: `lsblk` and `stat`.
#[derive(Debug, Default, Clone)]
pub struct SystemProbe;

impl DeviceProbe for SystemProbe {
    fn block_tree(&self, device: Option<&Path>) -> anyhow::Result<Vec<BlockNode>> {
        let mut cmd = Command::new("lsblk");
        cmd.args(["-J", "-b", "-o", LSBLK_COLUMNS]);
        if let Some(device) = device {
            cmd.arg(device);
        }
        let output = cmd.output()?;
        if !output.status.success() {
            anyhow::bail!(
                "lsblk failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        parse_lsblk(&String::from_utf8_lossy(&output.stdout))
    }

    fn is_block_device(&self, path: &Path) -> bool {
        fs::metadata(path)
            .map(|m| m.file_type().is_block_device())
            .unwrap_or(false)
    }
}

/// Synthetic inventory for tests and previews.
#[derive(Debug, Clone, Default)]
pub struct FixtureProbe {
    nodes: Vec<BlockNode>,
    block_devices: HashSet<PathBuf>,
    fail: bool,
}

impl FixtureProbe {
    /// Inventory from lsblk JSON. Every listed path counts as a block device.
    pub fn from_json(json: &str) -> anyhow::Result<Self> {
        let nodes = parse_lsblk(json)?;
        let mut block_devices = HashSet::new();
        fn collect(node: &BlockNode, out: &mut HashSet<PathBuf>) {
            out.insert(node.device_path());
            for child in &node.children {
                collect(child, out);
            }
        }
        for node in &nodes {
            collect(node, &mut block_devices);
        }
        Ok(Self {
            nodes,
            block_devices,
            fail: false,
        })
    }

    /// Probe whose every query fails
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    /// Treat `path` as a stale node that is not a block device any more
    pub fn without_block_device(mut self, path: impl AsRef<Path>) -> Self {
        self.block_devices.remove(path.as_ref());
        self
    }
}

impl DeviceProbe for FixtureProbe {
    fn block_tree(&self, device: Option<&Path>) -> anyhow::Result<Vec<BlockNode>> {
        if self.fail {
            anyhow::bail!("lsblk: fixture configured to fail");
        }
        match device {
            None => Ok(self.nodes.clone()),
            Some(path) => self
                .nodes
                .iter()
                .find_map(|n| n.find(path))
                .map(|n| vec![n.clone()])
                .ok_or_else(|| anyhow::anyhow!("lsblk: {}: not a block device", path.display())),
        }
    }

    fn is_block_device(&self, path: &Path) -> bool {
        self.block_devices.contains(path)
    }
}

// ============================================================================
// Queries
// ============================================================================

/// Whole disks available as install targets.
///
/// Skips loop, read-only and removable devices, and any name containing a
/// digit (partition heuristic; misclassifies NVMe/MMC names, which is why
/// the disk can always be given explicitly).
pub fn list_disks(probe: &dyn DeviceProbe) -> Vec<BlockDevice> {
    let nodes = match probe.block_tree(None) {
        Ok(nodes) => nodes,
        Err(e) => {
            tracing::warn!("Disk query failed: {:#}", e);
            return Vec::new();
        }
    };

    nodes
        .iter()
        .filter(|n| n.kind == "disk")
        .filter(|n| !n.ro && !n.rm)
        .filter(|n| !n.name.chars().any(|c| c.is_ascii_digit()))
        .map(|n| BlockDevice {
            path: n.device_path(),
            size_bytes: n.size,
            label: n.model.as_deref().unwrap_or("").trim().to_string(),
        })
        .collect()
}

/// Partitions of `disk`, without extended and swap partitions.
pub fn list_partitions(probe: &dyn DeviceProbe, disk: &Path) -> Vec<BlockDevice> {
    let nodes = match probe.block_tree(Some(disk)) {
        Ok(nodes) => nodes,
        Err(e) => {
            tracing::warn!("Partition query for {} failed: {:#}", disk.display(), e);
            return Vec::new();
        }
    };

    let mut partitions = Vec::new();
    for node in &nodes {
        collect_partitions(node, disk, &mut partitions);
    }
    partitions
}

fn collect_partitions(node: &BlockNode, disk: &Path, out: &mut Vec<BlockDevice>) {
    let is_disk_row = node.device_path() == disk || node.kind == "disk";
    if !is_disk_row && node.kind == "part" && !is_extended(node) && !is_swap(node) {
        out.push(BlockDevice {
            path: node.device_path(),
            size_bytes: node.size,
            label: node.filesystem().unwrap_or("").to_string(),
        });
    }
    for child in &node.children {
        collect_partitions(child, disk, out);
    }
}

fn is_extended(node: &BlockNode) -> bool {
    node.parttype
        .as_deref()
        .is_some_and(|t| EXTENDED_PARTTYPES.contains(&t.to_ascii_lowercase().as_str()))
}

fn is_swap(node: &BlockNode) -> bool {
    node.filesystem() == Some("swap")
        || node
            .parttype
            .as_deref()
            .is_some_and(|t| SWAP_PARTTYPES.contains(&t.to_ascii_lowercase().as_str()))
}

/// Why a partition failed verification
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PartitionCheck {
    #[error("{0} is not a block device")]
    NotBlockDevice(PathBuf),
    #[error("could not query {path}: {reason}")]
    QueryFailed { path: PathBuf, reason: String },
    #[error("{0} reports a size of zero")]
    ZeroSize(PathBuf),
    #[error("{0} has no filesystem")]
    NoFilesystem(PathBuf),
}

/// Full gate before mounting: block device, non-zero size, filesystem.
pub fn check_partition(probe: &dyn DeviceProbe, path: &Path) -> Result<BlockDevice, PartitionCheck> {
    let node = check_node(probe, path)?;
    let Some(fstype) = node.filesystem() else {
        return Err(PartitionCheck::NoFilesystem(path.to_path_buf()));
    };
    Ok(BlockDevice {
        path: path.to_path_buf(),
        size_bytes: node.size,
        label: fstype.to_string(),
    })
}

/// Gate before formatting: block device with a non-zero size.
///
/// A freshly created partition has no filesystem yet, so that check is left
/// to [`check_partition`] once the format is done.
pub fn check_partition_device(
    probe: &dyn DeviceProbe,
    path: &Path,
) -> Result<BlockDevice, PartitionCheck> {
    let node = check_node(probe, path)?;
    Ok(BlockDevice {
        path: path.to_path_buf(),
        size_bytes: node.size,
        label: node.filesystem().unwrap_or("").to_string(),
    })
}

fn check_node(probe: &dyn DeviceProbe, path: &Path) -> Result<BlockNode, PartitionCheck> {
    if !probe.is_block_device(path) {
        return Err(PartitionCheck::NotBlockDevice(path.to_path_buf()));
    }
    let nodes = probe
        .block_tree(Some(path))
        .map_err(|e| PartitionCheck::QueryFailed {
            path: path.to_path_buf(),
            reason: format!("{:#}", e),
        })?;
    let node = nodes
        .into_iter()
        .next()
        .ok_or_else(|| PartitionCheck::QueryFailed {
            path: path.to_path_buf(),
            reason: "no lsblk entry".to_string(),
        })?;
    if node.size == 0 {
        return Err(PartitionCheck::ZeroSize(path.to_path_buf()));
    }
    Ok(node)
}

/// True only for a usable, formatted partition. The failing check is logged.
pub fn verify_partition(probe: &dyn DeviceProbe, path: &Path) -> bool {
    match check_partition(probe, path) {
        Ok(_) => true,
        Err(reason) => {
            tracing::warn!("Partition verification failed: {}", reason);
            false
        }
    }
}

/// Kernel name of partition `number` on `disk`.
///
/// `/dev/sda` → `/dev/sda1`, `/dev/nvme0n1` → `/dev/nvme0n1p1`
pub fn partition_path(disk: &Path, number: u32) -> PathBuf {
    let disk = disk.to_string_lossy();
    if disk.ends_with(|c: char| c.is_ascii_digit()) {
        PathBuf::from(format!("{}p{}", disk, number))
    } else {
        PathBuf::from(format!("{}{}", disk, number))
    }
}
