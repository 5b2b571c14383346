use super::{DiskError, FileSystemType};

/// Builds the diskpart script that wipes a volume and recreates it with one
/// primary partition. `volume` is a drive letter identifier such as `E:`.
pub fn diskpart_script(
    volume: &str,
    fs_type: FileSystemType,
    label: &str,
) -> Result<String, DiskError> {
    let letter = volume
        .chars()
        .next()
        .filter(|c| c.is_ascii_alphabetic())
        .ok_or_else(|| DiskError::DeviceNotFound(volume.to_string()))?;
    let fs = fs_type
        .as_diskpart_format()
        .ok_or_else(|| DiskError::UnsupportedFilesystem(fs_type.display_name().to_string()))?;

    let mut script = String::new();
    script.push_str(&format!("select volume {}\n", letter));
    script.push_str("clean\n");
    script.push_str("create partition primary\n");
    script.push_str(&format!(
        "format fs={} quick label=\"{}\"\n",
        fs,
        sanitize_label(label, fs_type)
    ));
    script.push_str(&format!("assign letter={}\n", letter));
    script.push_str("exit\n");
    Ok(script)
}

/// Used when a label sanitises down to nothing
pub const DEFAULT_LABEL: &str = "USB";

/// Trims a volume label to what the filesystem accepts
pub fn sanitize_label(label: &str, fs_type: FileSystemType) -> String {
    let max = match fs_type {
        FileSystemType::Fat | FileSystemType::Fat32 => 11,
        FileSystemType::ExFat => 15,
        FileSystemType::Ext4 => 16,
        FileSystemType::Ntfs | FileSystemType::Apfs => 32,
    };
    let cleaned: String = label
        .chars()
        .filter(|c| !c.is_control() && !matches!(c, '"' | '\\' | '/' | ':' | '*' | '?' | '<' | '>' | '|'))
        .take(max)
        .collect();
    let cleaned = cleaned.trim();
    let cleaned = if cleaned.is_empty() { DEFAULT_LABEL } else { cleaned };
    match fs_type {
        FileSystemType::Fat | FileSystemType::Fat32 => cleaned.to_uppercase(),
        _ => cleaned.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn script_selects_wipes_formats_and_reassigns() {
        let script = diskpart_script("E:", FileSystemType::Ntfs, "Backup").expect("script");
        assert_eq!(
            script,
            "select volume E\nclean\ncreate partition primary\nformat fs=ntfs quick label=\"Backup\"\nassign letter=E\nexit\n"
        );
    }

    #[test]
    fn script_rejects_unsupported_filesystem() {
        assert!(matches!(
            diskpart_script("E:", FileSystemType::Ext4, "x"),
            Err(DiskError::UnsupportedFilesystem(_))
        ));
        assert!(matches!(
            diskpart_script("", FileSystemType::Fat32, "x"),
            Err(DiskError::DeviceNotFound(_))
        ));
    }

    #[test]
    fn fat_labels_are_short_and_uppercase() {
        assert_eq!(sanitize_label("my \"usb\" stick", FileSystemType::Fat32), "MY USB STIC");
        assert_eq!(sanitize_label("Photos", FileSystemType::ExFat), "Photos");
    }

    #[test]
    fn blank_labels_fall_back() {
        assert_eq!(sanitize_label(" ?* ", FileSystemType::Ntfs), DEFAULT_LABEL);
    }
}
