use std::path::PathBuf;

use async_trait::async_trait;
use tokio::process::Command;

use crate::core::disk_ops::{DiskManager, unix_identifier};
use crate::core::runner::CommandSpec;
use crate::core::{Device, DiskError, FileSystemType, NO_LABEL, UNKNOWN_FS, Usage};
use crate::utils::{is_root, volume_usage};

pub struct MacOSDiskManager;

impl MacOSDiskManager {
    pub fn new() -> Self {
        Self
    }

    async fn diskutil_plist(&self, args: &[&str]) -> Result<plist::Value, DiskError> {
        let output = Command::new("diskutil").args(args).output().await?;

        if !output.status.success() {
            return Err(DiskError::CommandFailed(
                String::from_utf8_lossy(&output.stderr).to_string(),
            ));
        }

        plist::from_bytes(&output.stdout).map_err(|e| DiskError::ParseError(e.to_string()))
    }

    /// Asks diskutil about one identifier, whole disk or partition
    async fn info_is_removable(&self, identifier: &str) -> Result<bool, DiskError> {
        let info = self.diskutil_plist(&["info", "-plist", identifier]).await?;
        Ok(removable_from_info(&info))
    }
}

fn removable_from_info(info: &plist::Value) -> bool {
    let Some(dict) = info.as_dictionary() else {
        return false;
    };
    let flag = |key: &str| dict.get(key).and_then(|v| v.as_boolean());

    flag("RemovableMedia") == Some(true)
        || flag("Removable") == Some(true)
        || (flag("Ejectable") == Some(true) && flag("Internal") == Some(false))
}

/// Parse diskutil list -plist output into one Device per volume.
/// `removable` reports the classification for each whole-disk identifier.
fn parse_diskutil_output(
    plist: &plist::Value,
    removable: &dyn Fn(&str) -> bool,
) -> Result<Vec<Device>, DiskError> {
    let mut devices = Vec::new();

    // Get AllDisksAndPartitions array
    let all_disks = plist
        .as_dictionary()
        .and_then(|d| d.get("AllDisksAndPartitions"))
        .and_then(|v| v.as_array())
        .ok_or_else(|| DiskError::ParseError("Missing AllDisksAndPartitions".to_string()))?;

    for disk in all_disks {
        let disk_dict = match disk.as_dictionary() {
            Some(d) => d,
            None => continue,
        };

        // Get disk identifier (e.g., disk0)
        let disk_identifier = match disk_dict.get("DeviceIdentifier").and_then(|v| v.as_string()) {
            Some(id) => id,
            None => continue,
        };

        let partitions: Vec<&plist::Dictionary> = disk_dict
            .get("Partitions")
            .and_then(|v| v.as_array())
            .map(|parts| parts.iter().filter_map(|p| p.as_dictionary()).collect())
            .unwrap_or_default();

        // Heuristic for system disk: disk0 or contains the root mount point
        let is_system = disk_identifier == "disk0"
            || partitions
                .iter()
                .any(|p| p.get("MountPoint").and_then(|v| v.as_string()) == Some("/"));
        let disk_removable = !is_system && removable(disk_identifier);

        for part in partitions {
            let Some(identifier) = part.get("DeviceIdentifier").and_then(|v| v.as_string()) else {
                continue;
            };
            let content = part.get("Content").and_then(|v| v.as_string()).unwrap_or(UNKNOWN_FS);
            // EFI service partitions are not user volumes
            if content == "EFI" {
                continue;
            }

            devices.push(Device {
                identifier: format!("/dev/{}", identifier),
                label: part
                    .get("VolumeName")
                    .and_then(|v| v.as_string())
                    .filter(|l| !l.is_empty())
                    .unwrap_or(NO_LABEL)
                    .to_string(),
                filesystem: content.to_string(),
                size_bytes: part.get("Size").and_then(|v| v.as_unsigned_integer()).unwrap_or(0),
                mount_point: part
                    .get("MountPoint")
                    .and_then(|v| v.as_string())
                    .map(PathBuf::from),
                is_removable: disk_removable,
                is_protected: is_system,
            });
        }
    }

    Ok(devices)
}

#[async_trait]
impl DiskManager for MacOSDiskManager {
    async fn list_devices(&self) -> Result<Vec<Device>, DiskError> {
        let listing = self.diskutil_plist(&["list", "-plist"]).await?;

        // Classify each whole disk once, then let partitions inherit it
        let mut removable_disks = Vec::new();
        if let Some(all) = listing
            .as_dictionary()
            .and_then(|d| d.get("WholeDisks"))
            .and_then(|v| v.as_array())
        {
            for disk in all.iter().filter_map(|v| v.as_string()) {
                if self.info_is_removable(disk).await.unwrap_or(false) {
                    removable_disks.push(disk.to_string());
                }
            }
        }

        parse_diskutil_output(&listing, &|id| removable_disks.iter().any(|d| d == id))
    }

    async fn is_removable(&self, identifier: &str) -> bool {
        let name = identifier.strip_prefix("/dev/").unwrap_or(identifier);
        self.info_is_removable(name).await.unwrap_or(false)
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

    fn repair_command(&self, device: &Device) -> Result<CommandSpec, DiskError> {
        Ok(CommandSpec::new("diskutil")
            .args(["repairVolume", device.identifier.as_str()])
            .elevated())
    }

    fn format_command(
        &self,
        device: &Device,
        fs_type: FileSystemType,
        label: &str,
    ) -> Result<CommandSpec, DiskError> {
        // Extract disk identifier from path (e.g., /dev/disk2s1 -> disk2s1)
        let identifier = device
            .identifier
            .strip_prefix("/dev/")
            .ok_or_else(|| DiskError::DeviceNotFound(device.identifier.clone()))?;
        let format = fs_type
            .as_diskutil_format()
            .ok_or_else(|| DiskError::UnsupportedFilesystem(fs_type.display_name().to_string()))?;

        // eraseDisk requires the whole disk identifier
        let target_disk = extract_parent_disk(identifier);
        let label = crate::core::format::sanitize_label(label, fs_type);

        Ok(CommandSpec::new("diskutil")
            .args(["eraseDisk", format, label.as_str(), target_disk.as_str()])
            .elevated())
    }

    fn format_options(&self) -> Vec<FileSystemType> {
        FileSystemType::macos_options()
    }

    fn has_privileges(&self) -> bool {
        is_root()
    }
}

/// Extract parent disk from partition identifier
/// e.g., disk4s1 -> disk4, disk4s2 -> disk4, disk0s1 -> disk0
fn extract_parent_disk(identifier: &str) -> String {
    // Find the position of 's' that follows a digit (partition separator)
    let bytes = identifier.as_bytes();
    for i in (1..bytes.len()).rev() {
        if bytes[i] == b's' && bytes[i - 1].is_ascii_digit() {
            return identifier[..i].to_string();
        }
    }
    // No partition separator found, return as-is
    identifier.to_string()
}
