use tracing::warn;

use super::disk_ops::DiskManager;
use super::{Device, ValidationError};

/// Re-checks a selection against a fresh enumeration.
///
/// Checks run in order and the first failure wins: empty selection,
/// unparseable identifier, device absent (or unmounted when `needs_mount`),
/// device not removable.
pub async fn validate(
    disks: &dyn DiskManager,
    selection: &str,
    needs_mount: bool,
) -> Result<Device, ValidationError> {
    let selection = selection.trim();
    if selection.is_empty() {
        return Err(ValidationError::Empty);
    }

    let identifier = disks
        .parse_identifier(selection)
        .ok_or_else(|| ValidationError::Malformed(selection.to_string()))?;

    let devices = match disks.list_devices().await {
        Ok(devices) => devices,
        Err(e) => {
            warn!("Device enumeration failed during validation: {}", e);
            return Err(ValidationError::NotFound(identifier));
        }
    };

    let device = devices
        .into_iter()
        .find(|d| d.identifier == identifier)
        .filter(|d| !needs_mount || d.mount_point.is_some())
        .ok_or_else(|| ValidationError::NotFound(identifier.clone()))?;

    if device.is_protected || !disks.is_removable(&identifier).await {
        return Err(ValidationError::NotRemovable(identifier));
    }

    Ok(device)
}

#[cfg(test)]
pub(crate) mod tests {
    use std::path::PathBuf;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::core::disk_ops::unix_identifier;
    use crate::core::runner::CommandSpec;
    use crate::core::{DiskError, FileSystemType, Usage};

    /// In-memory registry used by the core tests
    pub(crate) struct FakeDisks {
        pub devices: Mutex<Vec<Device>>,
        pub repair: CommandSpec,
        pub format: CommandSpec,
        pub prepared: AtomicUsize,
        pub elevated: bool,
    }

    impl FakeDisks {
        pub fn new(devices: Vec<Device>) -> Self {
            Self {
                devices: Mutex::new(devices),
                repair: CommandSpec::new("/nonexistent/usbcheck-fsck").elevated(),
                format: CommandSpec::new("/nonexistent/usbcheck-mkfs").elevated(),
                prepared: AtomicUsize::new(0),
                elevated: false,
            }
        }
    }

    pub(crate) fn stick(identifier: &str, mount: Option<PathBuf>) -> Device {
        Device {
            identifier: identifier.to_string(),
            label: "STICK".to_string(),
            filesystem: "vfat".to_string(),
            size_bytes: 8 * 1024 * 1024 * 1024,
            mount_point: mount,
            is_removable: true,
            is_protected: false,
        }
    }

    #[async_trait]
    impl DiskManager for FakeDisks {
        async fn list_devices(&self) -> Result<Vec<Device>, DiskError> {
            Ok(self.devices.lock().expect("devices").clone())
        }

        fn parse_identifier(&self, selection: &str) -> Option<String> {
            unix_identifier(selection)
        }

        async fn usage(&self, device: &Device) -> Result<Usage, DiskError> {
            Ok(Usage {
                total: device.size_bytes,
                used: device.size_bytes / 4,
                free: device.size_bytes - device.size_bytes / 4,
            })
        }

        async fn prepare_exclusive(&self, device: &Device) -> Result<bool, DiskError> {
            self.prepared.fetch_add(1, Ordering::SeqCst);
            Ok(device.mount_point.is_some())
        }

        fn repair_command(&self, _device: &Device) -> Result<CommandSpec, DiskError> {
            Ok(self.repair.clone())
        }

        fn format_command(
            &self,
            _device: &Device,
            _fs_type: FileSystemType,
            _label: &str,
        ) -> Result<CommandSpec, DiskError> {
            Ok(self.format.clone())
        }

        fn format_options(&self) -> Vec<FileSystemType> {
            FileSystemType::linux_options()
        }

        fn has_privileges(&self) -> bool {
            self.elevated
        }
    }

    fn registry() -> FakeDisks {
        let mut fixed = stick("/dev/sda1", Some(PathBuf::from("/")));
        fixed.is_removable = false;
        fixed.is_protected = true;
        FakeDisks::new(vec![
            stick("/dev/sdb1", Some(PathBuf::from("/media/stick"))),
            stick("/dev/sdc1", None),
            fixed,
        ])
    }

    #[tokio::test]
    async fn accepts_present_removable_device() {
        let disks = registry();
        let device = validate(&disks, "/dev/sdb1 (STICK, vfat)", true)
            .await
            .expect("valid");
        assert_eq!(device.identifier, "/dev/sdb1");
    }

    #[tokio::test]
    async fn rejections_follow_check_order() {
        let disks = registry();
        assert_eq!(validate(&disks, "   ", true).await, Err(ValidationError::Empty));
        assert_eq!(
            validate(&disks, "No USB drives found", true).await,
            Err(ValidationError::Malformed("No USB drives found".into()))
        );
        assert_eq!(
            validate(&disks, "/dev/sdz9", true).await,
            Err(ValidationError::NotFound("/dev/sdz9".into()))
        );
        assert_eq!(
            validate(&disks, "/dev/sda1", true).await,
            Err(ValidationError::NotRemovable("/dev/sda1".into()))
        );
    }

    #[tokio::test]
    async fn unmounted_device_only_fails_when_mount_is_needed() {
        let disks = registry();
        assert_eq!(
            validate(&disks, "/dev/sdc1", true).await,
            Err(ValidationError::NotFound("/dev/sdc1".into()))
        );
        assert!(validate(&disks, "/dev/sdc1", false).await.is_ok());
    }

    #[tokio::test]
    async fn unplugged_device_is_caught_on_revalidation() {
        let disks = registry();
        assert!(validate(&disks, "/dev/sdb1", true).await.is_ok());

        disks
            .devices
            .lock()
            .expect("devices")
            .retain(|d| d.identifier != "/dev/sdb1");

        assert_eq!(
            validate(&disks, "/dev/sdb1", true).await,
            Err(ValidationError::NotFound("/dev/sdb1".into()))
        );
    }
}
