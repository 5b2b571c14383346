use std::io;
use std::path::Path;
use std::sync::OnceLock;

use crate::core::Usage;

static IS_ROOT: OnceLock<bool> = OnceLock::new();

/// Returns whether the current process is running as root/admin.
/// The result is cached on first call using OnceLock.
pub fn is_root() -> bool {
    *IS_ROOT.get_or_init(probe_root)
}

#[cfg(unix)]
fn probe_root() -> bool {
    use elevate::RunningAs;
    matches!(elevate::check(), RunningAs::Root | RunningAs::Suid)
}

// `net session` only succeeds from an elevated prompt
#[cfg(windows)]
fn probe_root() -> bool {
    std::process::Command::new("net")
        .arg("session")
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .status()
        .map(|status| status.success())
        .unwrap_or(false)
}

/// Capacity of the filesystem holding `path`, computed like `df`:
/// used counts all allocated blocks, free counts what an unprivileged user can still write.
#[cfg(unix)]
pub fn volume_usage(path: &Path) -> io::Result<Usage> {
    use std::ffi::CString;
    use std::os::unix::ffi::OsStrExt;

    let c_path = CString::new(path.as_os_str().as_bytes())
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
    let mut stat: libc::statvfs = unsafe { std::mem::zeroed() };
    let rc = unsafe { libc::statvfs(c_path.as_ptr(), &mut stat) };
    if rc != 0 {
        return Err(io::Error::last_os_error());
    }

    let block = stat.f_frsize as u64;
    let total = stat.f_blocks as u64 * block;
    let free = stat.f_bavail as u64 * block;
    let used = total.saturating_sub(stat.f_bfree as u64 * block);
    Ok(Usage { total, used, free })
}

#[cfg(not(unix))]
pub fn volume_usage(_path: &Path) -> io::Result<Usage> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "statvfs is not available on this platform",
    ))
}

/// Convert bytes to human-readable format (KB, MB, GB, TB)
pub fn bytes_to_human(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;
    const TB: u64 = GB * 1024;

    if bytes >= TB {
        format!("{:.2} TB", bytes as f64 / TB as f64)
    } else if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bytes_to_human() {
        assert_eq!(bytes_to_human(0), "0 B");
        assert_eq!(bytes_to_human(512), "512 B");
        assert_eq!(bytes_to_human(1024), "1.00 KB");
        assert_eq!(bytes_to_human(1536), "1.50 KB");
        assert_eq!(bytes_to_human(1048576), "1.00 MB");
        assert_eq!(bytes_to_human(1073741824), "1.00 GB");
        assert_eq!(bytes_to_human(1099511627776), "1.00 TB");
    }

    #[cfg(unix)]
    #[test]
    fn test_volume_usage() {
        let dir = tempfile::tempdir().expect("tempdir");
        let usage = volume_usage(dir.path()).expect("statvfs");
        assert!(usage.total > 0);
        assert!(usage.used <= usage.total);
        assert!(usage.free <= usage.total);
    }

    #[cfg(unix)]
    #[test]
    fn test_volume_usage_missing_path() {
        assert!(volume_usage(Path::new("/nonexistent/usbcheck")).is_err());
    }
}
