use async_trait::async_trait;

use super::runner::CommandSpec;
use super::{Device, DiskError, FileSystemType, Usage};

/// Trait for platform-specific disk operations
#[async_trait]
pub trait DiskManager: Send + Sync {
    /// Scans the system for volumes. Every call is a fresh snapshot.
    async fn list_devices(&self) -> Result<Vec<Device>, DiskError>;

    /// Classifies one identifier. False negatives are acceptable, so lookup
    /// failures count as "not removable".
    async fn is_removable(&self, identifier: &str) -> bool {
        match self.list_devices().await {
            Ok(devices) => devices
                .iter()
                .any(|d| d.identifier == identifier && d.is_removable),
            Err(_) => false,
        }
    }

    /// Pulls the raw identifier out of a possibly decorated selection string
    fn parse_identifier(&self, selection: &str) -> Option<String>;

    /// Reads total/used/free space of a mounted volume
    async fn usage(&self, device: &Device) -> Result<Usage, DiskError>;

    /// Takes the volume offline when the platform's repair or format tool needs it.
    /// Returns true when this call unmounted the volume.
    async fn prepare_exclusive(&self, _device: &Device) -> Result<bool, DiskError> {
        Ok(false)
    }

    /// Command that checks and fixes the filesystem on the volume
    fn repair_command(&self, device: &Device) -> Result<CommandSpec, DiskError>;

    /// Command that erases the volume with a new filesystem
    fn format_command(
        &self,
        device: &Device,
        fs_type: FileSystemType,
        label: &str,
    ) -> Result<CommandSpec, DiskError>;

    /// Filesystems offered by `format_command` on this platform
    fn format_options(&self) -> Vec<FileSystemType>;

    /// Checks if running with elevated privileges (root/admin)
    fn has_privileges(&self) -> bool;
}

/// Extracts a `/dev/...` identifier, e.g. `/dev/sdb1 (STICK)` -> `/dev/sdb1`
pub fn unix_identifier(selection: &str) -> Option<String> {
    let token = selection.split_whitespace().next()?;
    let name = token.strip_prefix("/dev/")?;
    if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-') {
        return None;
    }
    Some(token.to_string())
}

/// Extracts a drive letter identifier, e.g. `e:\ [USB]` -> `E:`
pub fn drive_letter(selection: &str) -> Option<String> {
    let token = selection.split_whitespace().next()?;
    let mut chars = token.chars();
    let letter = chars.next().filter(|c| c.is_ascii_alphabetic())?;
    if chars.next() != Some(':') {
        return None;
    }
    match chars.as_str() {
        "" | "\\" | "/" => Some(format!("{}:", letter.to_ascii_uppercase())),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unix_identifier() {
        assert_eq!(unix_identifier("/dev/sdb1"), Some("/dev/sdb1".into()));
        assert_eq!(unix_identifier("  /dev/disk4s1 (STICK, ExFAT)"), Some("/dev/disk4s1".into()));
        assert_eq!(unix_identifier("/dev/"), None);
        assert_eq!(unix_identifier("sdb1"), None);
        assert_eq!(unix_identifier("/dev/../etc/passwd"), None);
        assert_eq!(unix_identifier(""), None);
    }

    #[test]
    fn test_drive_letter() {
        assert_eq!(drive_letter("E:"), Some("E:".into()));
        assert_eq!(drive_letter("e:\\ [USB]"), Some("E:".into()));
        assert_eq!(drive_letter("E:/"), Some("E:".into()));
        assert_eq!(drive_letter("EE:"), None);
        assert_eq!(drive_letter("E:\\folder"), None);
        assert_eq!(drive_letter("1:"), None);
    }
}
