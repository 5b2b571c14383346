use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Deserializer};
use tokio::process::Command;

use crate::core::disk_ops::{DiskManager, unix_identifier};
use crate::core::runner::CommandSpec;
use crate::core::{Device, DiskError, FileSystemType, NO_LABEL, UNKNOWN_FS, Usage};
use crate::utils::{is_root, volume_usage};

/// Mount points that mark a disk as the running system
const SYSTEM_MOUNTS: &[&str] = &["/", "/boot", "/boot/efi", "[SWAP]"];

/// Linux-specific disk manager using lsblk and standard Linux tools
pub struct LinuxDiskManager;

impl LinuxDiskManager {
    pub fn new() -> Self {
        Self
    }

    /// Parse lsblk JSON output into one Device per volume
    fn parse_lsblk_output(&self, output: &str) -> Result<Vec<Device>, DiskError> {
        let lsblk: LsblkOutput =
            serde_json::from_str(output).map_err(|e| DiskError::ParseError(e.to_string()))?;

        let mut devices = Vec::new();

        for disk in &lsblk.blockdevices {
            // Skip loop devices and other non-physical devices
            if disk.name.starts_with("loop") || disk.name.starts_with("ram") || disk.name.starts_with("zram") {
                continue;
            }
            if disk.device_type != "disk" {
                continue;
            }

            let disk_removable = disk.rm || disk.hotplug;
            let children = disk.children.as_deref().unwrap_or_default();
            let is_system = disk.is_system() || children.iter().any(BlockDevice::is_system);

            if children.is_empty() {
                // Superfloppy layout: filesystem written straight onto the disk
                if disk.fstype.is_some() {
                    devices.push(disk.to_device(disk_removable, is_system));
                }
                continue;
            }

            for part in children.iter().filter(|c| c.device_type == "part") {
                devices.push(part.to_device(disk_removable || part.rm || part.hotplug, is_system));
            }
        }

        Ok(devices)
    }
}

/// Structures for parsing lsblk JSON output
#[derive(Debug, Deserialize)]
struct LsblkOutput {
    blockdevices: Vec<BlockDevice>,
}

#[derive(Debug, Deserialize)]
struct BlockDevice {
    name: String,
    size: String,
    #[serde(rename = "type")]
    device_type: String,
    fstype: Option<String>,
    label: Option<String>,
    mountpoint: Option<String>,
    path: Option<String>,
    #[serde(default, deserialize_with = "flag")]
    rm: bool,
    #[serde(default, deserialize_with = "flag")]
    hotplug: bool,
    children: Option<Vec<BlockDevice>>,
}

impl BlockDevice {
    fn is_system(&self) -> bool {
        self.mountpoint
            .as_deref()
            .is_some_and(|m| SYSTEM_MOUNTS.contains(&m))
    }

    fn to_device(&self, is_removable: bool, is_protected: bool) -> Device {
        Device {
            identifier: self
                .path
                .clone()
                .unwrap_or_else(|| format!("/dev/{}", self.name)),
            label: self
                .label
                .clone()
                .filter(|l| !l.is_empty())
                .unwrap_or_else(|| NO_LABEL.to_string()),
            filesystem: self
                .fstype
                .clone()
                .unwrap_or_else(|| UNKNOWN_FS.to_string()),
            size_bytes: parse_size(&self.size),
            mount_point: self.mountpoint.as_ref().filter(|m| m.starts_with('/')).map(PathBuf::from),
            is_removable,
            is_protected,
        }
    }
}

/// Older lsblk prints flags as "0"/"1", newer releases as JSON booleans
fn flag<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Flag {
        Bool(bool),
        Text(String),
        Number(u8),
    }

    Ok(match Option::<Flag>::deserialize(deserializer)? {
        Some(Flag::Bool(b)) => b,
        Some(Flag::Text(s)) => s == "1",
        Some(Flag::Number(n)) => n == 1,
        None => false,
    })
}

/// Parse size string from lsblk (e.g., "500G", "1T", "256M") to bytes
fn parse_size(size_str: &str) -> u64 {
    let size_str = size_str.trim();
    if size_str.is_empty() {
        return 0;
    }

    let (num_str, suffix) = size_str.split_at(size_str.len().saturating_sub(1));
    let multiplier: u64 = match suffix.to_uppercase().as_str() {
        "B" => 1,
        "K" => 1024,
        "M" => 1024 * 1024,
        "G" => 1024 * 1024 * 1024,
        "T" => 1024 * 1024 * 1024 * 1024,
        "P" => 1024 * 1024 * 1024 * 1024 * 1024,
        _ => {
            // No suffix, try to parse as bytes
            return size_str.parse().unwrap_or(0);
        }
    };

    num_str
        .trim()
        .replace(',', ".")
        .parse::<f64>()
        .map(|n| (n * multiplier as f64) as u64)
        .unwrap_or(0)
}

#[async_trait]
impl DiskManager for LinuxDiskManager {
    async fn list_devices(&self) -> Result<Vec<Device>, DiskError> {
        let output = Command::new("lsblk")
            .args([
                "--json",
                "-o",
                "NAME,SIZE,TYPE,FSTYPE,LABEL,MOUNTPOINT,PATH,RM,HOTPLUG",
            ])
            .output()
            .await?;

        if !output.status.success() {
            return Err(DiskError::CommandFailed(
                String::from_utf8_lossy(&output.stderr).to_string(),
            ));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        self.parse_lsblk_output(&stdout)
    }

    fn parse_identifier(&self, selection: &str) -> Option<String> {
        unix_identifier(selection)
    }

    async fn usage(&self, device: &Device) -> Result<Usage, DiskError> {
        let mount = device
            .mount_point
            .as_ref()
            .ok_or_else(|| DiskError::NotMounted(device.identifier.clone()))?;
        Ok(volume_usage(mount)?)
    }

    /// fsck and mkfs refuse (or corrupt) mounted filesystems
    async fn prepare_exclusive(&self, device: &Device) -> Result<bool, DiskError> {
        if device.mount_point.is_none() {
            return Ok(false);
        }

        let output = Command::new("umount").arg(&device.identifier).output().await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            if stderr.contains("busy") || stderr.contains("target is busy") {
                return Err(DiskError::DeviceBusy);
            }
            if stderr.contains("not mounted") {
                // Already unmounted, treat as success
                return Ok(false);
            }
            return Err(DiskError::CommandFailed(stderr.to_string()));
        }

        Ok(true)
    }

    fn repair_command(&self, device: &Device) -> Result<CommandSpec, DiskError> {
        // fsck exit 1 means errors were corrected
        Ok(CommandSpec::new("fsck")
            .args(["-y", device.identifier.as_str()])
            .elevated()
            .succeeds_with(&[0, 1]))
    }

    fn format_command(
        &self,
        device: &Device,
        fs_type: FileSystemType,
        label: &str,
    ) -> Result<CommandSpec, DiskError> {
        let label = crate::core::format::sanitize_label(label, fs_type);
        let label = label.as_str();
        let path = device.identifier.as_str();
        let (cmd, args) = match fs_type {
            FileSystemType::Fat32 => ("mkfs.vfat", vec!["-F", "32", "-n", label, path]),
            FileSystemType::Fat => ("mkfs.vfat", vec!["-F", "16", "-n", label, path]),
            FileSystemType::ExFat => ("mkfs.exfat", vec!["-n", label, path]),
            FileSystemType::Ntfs => ("mkfs.ntfs", vec!["-f", "-L", label, path]),
            FileSystemType::Ext4 => ("mkfs.ext4", vec!["-F", "-L", label, path]),
            FileSystemType::Apfs => {
                return Err(DiskError::UnsupportedFilesystem(
                    "APFS is not supported on Linux".to_string(),
                ));
            }
        };

        Ok(CommandSpec::new(cmd).args(args).elevated())
    }

    fn format_options(&self) -> Vec<FileSystemType> {
        FileSystemType::linux_options()
    }

    fn has_privileges(&self) -> bool {
        is_root()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
       "blockdevices": [
          {"name":"sda", "size":"476.9G", "type":"disk", "fstype":null, "label":null, "mountpoint":null, "path":"/dev/sda", "rm":false, "hotplug":false,
             "children": [
                {"name":"sda1", "size":"512M", "type":"part", "fstype":"vfat", "label":null, "mountpoint":"/boot/efi", "path":"/dev/sda1", "rm":false, "hotplug":false},
                {"name":"sda2", "size":"476.4G", "type":"part", "fstype":"ext4", "label":null, "mountpoint":"/", "path":"/dev/sda2", "rm":false, "hotplug":false}
             ]
          },
          {"name":"sdb", "size":"14.9G", "type":"disk", "fstype":null, "label":null, "mountpoint":null, "path":"/dev/sdb", "rm":"1", "hotplug":"1",
             "children": [
                {"name":"sdb1", "size":"14.9G", "type":"part", "fstype":"exfat", "label":"STICK", "mountpoint":"/media/user/STICK", "path":"/dev/sdb1", "rm":"1", "hotplug":"1"}
             ]
          },
          {"name":"sdc", "size":"1.8T", "type":"disk", "fstype":"ext4", "label":"", "mountpoint":null, "path":"/dev/sdc", "rm":false, "hotplug":true},
          {"name":"loop0", "size":"4K", "type":"loop", "fstype":"squashfs", "label":null, "mountpoint":"/snap/bare/5", "path":"/dev/loop0", "rm":false, "hotplug":false}
       ]
    }"#;

    #[test]
    fn test_parse_size() {
        assert_eq!(parse_size("512M"), 512 * 1024 * 1024);
        assert_eq!(parse_size("1,5K"), 1536);
        assert_eq!(parse_size("4096"), 4096);
        assert_eq!(parse_size(""), 0);
    }

    #[test]
    fn test_parse_lsblk_lists_volumes() {
        let devices = LinuxDiskManager::new()
            .parse_lsblk_output(SAMPLE)
            .expect("parse");
        let ids: Vec<&str> = devices.iter().map(|d| d.identifier.as_str()).collect();
        assert_eq!(ids, vec!["/dev/sda1", "/dev/sda2", "/dev/sdb1", "/dev/sdc"]);

        let root = &devices[1];
        assert!(root.is_protected);
        assert!(!root.is_removable);
        assert_eq!(root.label, NO_LABEL);

        let stick = &devices[2];
        assert!(stick.is_removable);
        assert!(!stick.is_protected);
        assert_eq!(stick.label, "STICK");
        assert_eq!(stick.filesystem, "exfat");
        assert_eq!(stick.mount_point, Some(PathBuf::from("/media/user/STICK")));

        let superfloppy = &devices[3];
        assert!(superfloppy.is_removable);
        assert_eq!(superfloppy.label, NO_LABEL);
        assert_eq!(superfloppy.mount_point, None);
    }

    #[test]
    fn test_parse_lsblk_is_stable() {
        let manager = LinuxDiskManager::new();
        assert_eq!(
            manager.parse_lsblk_output(SAMPLE).expect("first"),
            manager.parse_lsblk_output(SAMPLE).expect("second")
        );
    }

    #[test]
    fn test_parse_lsblk_rejects_garbage() {
        assert!(matches!(
            LinuxDiskManager::new().parse_lsblk_output("not json"),
            Err(DiskError::ParseError(_))
        ));
    }

    #[test]
    fn test_repair_command_targets_volume() {
        let devices = LinuxDiskManager::new().parse_lsblk_output(SAMPLE).expect("parse");
        let spec = LinuxDiskManager::new().repair_command(&devices[2]).expect("spec");
        assert_eq!(spec.display(), "fsck -y /dev/sdb1");
        assert!(spec.requires_elevation);
    }

    #[test]
    fn test_format_command() {
        let devices = LinuxDiskManager::new().parse_lsblk_output(SAMPLE).expect("parse");
        let manager = LinuxDiskManager::new();
        let spec = manager
            .format_command(&devices[2], FileSystemType::Fat32, "backup")
            .expect("spec");
        assert_eq!(spec.display(), "mkfs.vfat -F 32 -n BACKUP /dev/sdb1");
        assert!(matches!(
            manager.format_command(&devices[2], FileSystemType::Apfs, "x"),
            Err(DiskError::UnsupportedFilesystem(_))
        ));
    }
}
