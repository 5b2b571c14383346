pub mod backup;
pub mod benchmark;
pub mod coordinator;
pub mod disk_ops;
pub mod events;
pub mod format;
pub mod runner;
pub mod validator;

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// Label shown for volumes that report no name
pub const NO_LABEL: &str = "No Label";

/// Filesystem shown when the platform does not report one
pub const UNKNOWN_FS: &str = "Unknown";

/// One candidate storage volume, as seen by the last enumeration
#[derive(Debug, Clone, PartialEq)]
pub struct Device {
    pub identifier: String,
    pub label: String,
    pub filesystem: String,
    pub size_bytes: u64,
    pub mount_point: Option<PathBuf>,
    pub is_removable: bool,
    pub is_protected: bool,
}

impl Device {
    /// Text used in lists and status lines. Never parsed back into an identifier.
    pub fn display_name(&self) -> String {
        format!("{} ({}, {})", self.identifier, self.label, self.filesystem)
    }
}

/// Capacity figures for a mounted volume
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Usage {
    pub total: u64,
    pub used: u64,
    pub free: u64,
}

/// Supported filesystem types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileSystemType {
    Fat,
    Fat32,
    ExFat,
    Ntfs,
    Ext4,
    Apfs,
}

impl FileSystemType {
    /// Get the filesystem name as used by diskutil
    pub fn as_diskutil_format(&self) -> Option<&'static str> {
        match self {
            FileSystemType::Fat32 => Some("FAT32"),
            FileSystemType::ExFat => Some("ExFAT"),
            FileSystemType::Apfs => Some("APFS"),
            FileSystemType::Fat | FileSystemType::Ntfs | FileSystemType::Ext4 => None,
        }
    }

    /// Get the `fs=` value understood by diskpart
    pub fn as_diskpart_format(&self) -> Option<&'static str> {
        match self {
            FileSystemType::Fat => Some("fat"),
            FileSystemType::Fat32 => Some("fat32"),
            FileSystemType::ExFat => Some("exfat"),
            FileSystemType::Ntfs => Some("ntfs"),
            FileSystemType::Ext4 | FileSystemType::Apfs => None,
        }
    }

    /// Get display name
    pub fn display_name(&self) -> &'static str {
        match self {
            FileSystemType::Fat => "FAT",
            FileSystemType::Fat32 => "FAT32",
            FileSystemType::ExFat => "exFAT",
            FileSystemType::Ntfs => "NTFS",
            FileSystemType::Ext4 => "ext4",
            FileSystemType::Apfs => "APFS",
        }
    }

    /// Get available filesystems for macOS
    pub fn macos_options() -> Vec<FileSystemType> {
        vec![
            FileSystemType::Apfs,
            FileSystemType::ExFat,
            FileSystemType::Fat32,
        ]
    }

    /// Get available filesystems for Linux
    pub fn linux_options() -> Vec<FileSystemType> {
        vec![
            FileSystemType::Ext4,
            FileSystemType::ExFat,
            FileSystemType::Fat32,
            FileSystemType::Ntfs,
        ]
    }

    /// Get available filesystems for Windows
    pub fn windows_options() -> Vec<FileSystemType> {
        vec![
            FileSystemType::Fat,
            FileSystemType::Fat32,
            FileSystemType::Ntfs,
            FileSystemType::ExFat,
        ]
    }
}

/// A unit of work the coordinator can run against a device
#[derive(Debug, Clone, PartialEq)]
pub enum OperationKind {
    Analyze,
    Repair,
    Benchmark,
    Backup { destination: PathBuf },
    Format { filesystem: FileSystemType, label: String },
}

impl OperationKind {
    pub fn name(&self) -> &'static str {
        match self {
            OperationKind::Analyze => "Analyze",
            OperationKind::Repair => "Repair",
            OperationKind::Benchmark => "Benchmark",
            OperationKind::Backup { .. } => "Backup",
            OperationKind::Format { .. } => "Format",
        }
    }

    /// Whether the operation reads or writes files through the mount point
    pub fn needs_mount(&self) -> bool {
        matches!(
            self,
            OperationKind::Analyze | OperationKind::Benchmark | OperationKind::Backup { .. }
        )
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Lifecycle of a single operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationState {
    Idle,
    Validating,
    Running,
    Completed,
    Failed,
}

impl OperationState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, OperationState::Completed | OperationState::Failed)
    }

    pub fn can_transition_to(&self, next: OperationState) -> bool {
        use OperationState::*;
        matches!(
            (self, next),
            (Idle, Validating)
                | (Validating, Running)
                | (Validating, Failed)
                | (Running, Completed)
                | (Running, Failed)
        )
    }
}

/// Errors that can occur during disk operations
#[derive(Error, Debug)]
pub enum DiskError {
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("Device is not mounted: {0}")]
    NotMounted(String),

    #[error("Device is busy or in use")]
    DeviceBusy,

    #[error("Unsupported filesystem: {0}")]
    UnsupportedFilesystem(String),

    #[error("Command failed: {0}")]
    CommandFailed(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Reasons a selection is rejected before an operation starts
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("No device selected")]
    Empty,

    #[error("Could not read a device identifier from '{0}'")]
    Malformed(String),

    #[error("Device {0} is not present or not mounted")]
    NotFound(String),

    #[error("Device {0} is not removable")]
    NotRemovable(String),
}

/// Errors surfaced by a requested operation
#[derive(Error, Debug)]
pub enum OperationError {
    #[error("Insufficient privileges - run as root/admin")]
    InsufficientPrivilege,

    #[error("Failed to start {program}: {source}")]
    SpawnFailed {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Process exited with code {0}")]
    NonZeroExit(i32),

    #[error("Output stream interrupted: {0}")]
    StreamInterrupted(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Another operation is already running")]
    Busy,

    #[error("Measured duration too short to compute throughput")]
    DegenerateTiming,

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Disk(#[from] DiskError),

    #[error("Operation aborted: {0}")]
    Aborted(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_machine_only_moves_forward() {
        use OperationState::*;
        assert!(Idle.can_transition_to(Validating));
        assert!(Validating.can_transition_to(Failed));
        assert!(Running.can_transition_to(Completed));
        assert!(!Idle.can_transition_to(Running));
        assert!(!Completed.can_transition_to(Running));
        assert!(!Failed.can_transition_to(Validating));
        assert!(!Running.can_transition_to(Validating));
    }

    #[test]
    fn only_file_level_operations_need_a_mount() {
        assert!(OperationKind::Analyze.needs_mount());
        assert!(OperationKind::Benchmark.needs_mount());
        assert!(!OperationKind::Repair.needs_mount());
        assert!(
            !OperationKind::Format {
                filesystem: FileSystemType::Fat32,
                label: "USB".into()
            }
            .needs_mount()
        );
    }
}
