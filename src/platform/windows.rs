use std::path::PathBuf;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;

use crate::core::disk_ops::{DiskManager, drive_letter};
use crate::core::format::diskpart_script;
use crate::core::runner::CommandSpec;
use crate::core::{Device, DiskError, FileSystemType, NO_LABEL, UNKNOWN_FS, Usage};
use crate::utils::is_root;

const LIST_VOLUMES: &str = "Get-Volume | Where-Object { $_.DriveLetter } | \
    Select-Object @{n='DriveLetter';e={[string]$_.DriveLetter}}, FileSystemLabel, FileSystem, \
    @{n='DriveType';e={[string]$_.DriveType}}, Size, SizeRemaining | ConvertTo-Json -Compress";

/// Windows disk manager built on PowerShell storage cmdlets, chkdsk and diskpart
pub struct WindowsDiskManager;

impl WindowsDiskManager {
    pub fn new() -> Self {
        Self
    }

    async fn volumes(&self) -> Result<Vec<Volume>, DiskError> {
        let output = Command::new("powershell")
            .args(["-NoProfile", "-NonInteractive", "-Command", LIST_VOLUMES])
            .output()
            .await?;

        if !output.status.success() {
            return Err(DiskError::CommandFailed(
                String::from_utf8_lossy(&output.stderr).to_string(),
            ));
        }

        parse_volumes(&String::from_utf8_lossy(&output.stdout))
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Volume {
    drive_letter: String,
    file_system_label: Option<String>,
    file_system: Option<String>,
    drive_type: Option<String>,
    size: Option<u64>,
    size_remaining: Option<u64>,
}

/// ConvertTo-Json emits a bare object when there is a single volume
#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    One(Volume),
    Many(Vec<Volume>),
}

fn parse_volumes(output: &str) -> Result<Vec<Volume>, DiskError> {
    let output = output.trim();
    if output.is_empty() {
        return Ok(Vec::new());
    }
    match serde_json::from_str(output).map_err(|e| DiskError::ParseError(e.to_string()))? {
        OneOrMany::One(volume) => Ok(vec![volume]),
        OneOrMany::Many(volumes) => Ok(volumes),
    }
}

impl Volume {
    fn identifier(&self) -> String {
        format!("{}:", self.drive_letter.trim().to_ascii_uppercase())
    }

    fn to_device(&self, system_drive: &str) -> Device {
        let identifier = self.identifier();
        Device {
            label: self
                .file_system_label
                .clone()
                .filter(|l| !l.is_empty())
                .unwrap_or_else(|| NO_LABEL.to_string()),
            filesystem: self
                .file_system
                .clone()
                .filter(|f| !f.is_empty())
                .unwrap_or_else(|| UNKNOWN_FS.to_string()),
            size_bytes: self.size.unwrap_or(0),
            mount_point: Some(PathBuf::from(format!("{}\\", identifier))),
            is_removable: self.drive_type.as_deref() == Some("Removable"),
            is_protected: identifier.eq_ignore_ascii_case(system_drive),
            identifier,
        }
    }
}

#[async_trait]
impl DiskManager for WindowsDiskManager {
    async fn list_devices(&self) -> Result<Vec<Device>, DiskError> {
        let system_drive = std::env::var("SystemDrive").unwrap_or_else(|_| "C:".to_string());
        Ok(self
            .volumes()
            .await?
            .iter()
            .map(|v| v.to_device(&system_drive))
            .collect())
    }

    fn parse_identifier(&self, selection: &str) -> Option<String> {
        drive_letter(selection)
    }

    async fn usage(&self, device: &Device) -> Result<Usage, DiskError> {
        let volume = self
            .volumes()
            .await?
            .into_iter()
            .find(|v| v.identifier() == device.identifier)
            .ok_or_else(|| DiskError::DeviceNotFound(device.identifier.clone()))?;
        let total = volume.size.unwrap_or(0);
        let free = volume.size_remaining.unwrap_or(0);
        Ok(Usage {
            total,
            used: total.saturating_sub(free),
            free,
        })
    }

    fn repair_command(&self, device: &Device) -> Result<CommandSpec, DiskError> {
        // chkdsk: 1 = errors fixed, 2 = cleanup performed
        Ok(CommandSpec::new("chkdsk")
            .args([device.identifier.as_str(), "/f"])
            .elevated()
            .succeeds_with(&[0, 1, 2]))
    }

    fn format_command(
        &self,
        device: &Device,
        fs_type: FileSystemType,
        label: &str,
    ) -> Result<CommandSpec, DiskError> {
        let script = diskpart_script(&device.identifier, fs_type, label)?;
        Ok(CommandSpec::new("diskpart")
            .with_script(Some("/s"), script)
            .elevated())
    }

    fn format_options(&self) -> Vec<FileSystemType> {
        FileSystemType::windows_options()
    }

    fn has_privileges(&self) -> bool {
        is_root()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_single_and_many_volumes() {
        let one = r#"{"DriveLetter":"E","FileSystemLabel":"STICK","FileSystem":"FAT32","DriveType":"Removable","Size":16008609792,"SizeRemaining":1000}"#;
        let volumes = parse_volumes(one).expect("one");
        assert_eq!(volumes.len(), 1);

        let device = volumes[0].to_device("C:");
        assert_eq!(device.identifier, "E:");
        assert!(device.is_removable);
        assert!(!device.is_protected);
        assert_eq!(device.mount_point, Some(PathBuf::from("E:\\")));

        let many = format!(
            "[{},{}]",
            one,
            r#"{"DriveLetter":"C","FileSystemLabel":"","FileSystem":"NTFS","DriveType":"Fixed","Size":1,"SizeRemaining":0}"#
        );
        let volumes = parse_volumes(&many).expect("many");
        let system = volumes[1].to_device("C:");
        assert!(system.is_protected);
        assert_eq!(system.label, NO_LABEL);
    }

    #[test]
    fn test_parse_empty_output() {
        assert!(parse_volumes("  ").expect("empty").is_empty());
    }
}
