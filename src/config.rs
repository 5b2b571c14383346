use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use directories::{ProjectDirs, UserDirs};

use crate::core::benchmark::BenchmarkConfig;

#[derive(Parser, Debug)]
#[command(name = "usbcheck")]
#[command(about = "Analyze, repair, benchmark and back up removable USB drives")]
#[command(version)]
pub struct Cli {
    /// Directory for the log file
    #[arg(long, env = "USBCHECK_LOG_DIR")]
    pub log_dir: Option<PathBuf>,

    /// Log file is restarted once it would grow past this size
    #[arg(long, env = "USBCHECK_LOG_MAX_BYTES", default_value_t = 1024 * 1024)]
    pub log_max_bytes: u64,

    /// Log filter, e.g. "info" or "usbcheck=debug"
    #[arg(long, env = "USBCHECK_LOG", default_value = "info")]
    pub log_level: String,

    /// UI refresh interval in milliseconds
    #[arg(long, env = "USBCHECK_TICK_MS", default_value_t = 100)]
    pub tick_ms: u64,

    /// Size of the benchmark test file in MiB
    #[arg(long, env = "USBCHECK_BENCH_SIZE_MIB", default_value_t = 16)]
    pub bench_size_mib: usize,

    /// Read chunk size for the benchmark in KiB
    #[arg(long, env = "USBCHECK_BENCH_CHUNK_KIB", default_value_t = 1024)]
    pub bench_chunk_kib: usize,

    /// Default backup destination
    #[arg(long, env = "USBCHECK_BACKUP_DIR")]
    pub backup_dir: Option<PathBuf>,

    /// List fixed and system volumes as well
    #[arg(long)]
    pub show_all: bool,
}

/// Resolved runtime settings
#[derive(Debug, Clone)]
pub struct Settings {
    pub log_dir: PathBuf,
    pub log_max_bytes: u64,
    pub log_level: String,
    pub tick: Duration,
    pub benchmark: BenchmarkConfig,
    pub backup_dir: PathBuf,
    pub show_all: bool,
}

impl From<Cli> for Settings {
    fn from(cli: Cli) -> Self {
        let log_dir = cli.log_dir.unwrap_or_else(default_log_dir);
        let backup_dir = cli.backup_dir.unwrap_or_else(default_backup_dir);

        Self {
            log_dir,
            log_max_bytes: cli.log_max_bytes,
            log_level: cli.log_level,
            tick: Duration::from_millis(cli.tick_ms.max(10)),
            benchmark: BenchmarkConfig {
                size_bytes: cli.bench_size_mib.max(1) * 1024 * 1024,
                chunk_bytes: cli.bench_chunk_kib.max(1) * 1024,
            },
            backup_dir,
            show_all: cli.show_all,
        }
    }
}

fn default_log_dir() -> PathBuf {
    ProjectDirs::from("", "", "usbcheck")
        .map(|dirs| dirs.data_local_dir().join("logs"))
        .unwrap_or_else(|| PathBuf::from("logs"))
}

fn default_backup_dir() -> PathBuf {
    UserDirs::new()
        .map(|dirs| dirs.home_dir().join("usb-backup"))
        .unwrap_or_else(|| PathBuf::from("usb-backup"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_resolve_to_settings() {
        let cli = Cli::try_parse_from(["usbcheck"]).expect("defaults parse");
        let settings = Settings::from(cli);

        assert_eq!(settings.log_max_bytes, 1024 * 1024);
        assert_eq!(settings.tick, Duration::from_millis(100));
        assert_eq!(settings.benchmark.size_bytes, 16 * 1024 * 1024);
        assert_eq!(settings.benchmark.chunk_bytes, 1024 * 1024);
        assert!(settings.backup_dir.ends_with("usb-backup"));
        assert!(settings.log_dir.ends_with("logs"));
        assert!(!settings.show_all);
    }

    #[test]
    fn flags_override_defaults() {
        let cli = Cli::try_parse_from([
            "usbcheck",
            "--log-dir",
            "/tmp/usbcheck-logs",
            "--bench-size-mib",
            "4",
            "--bench-chunk-kib",
            "64",
            "--backup-dir",
            "/srv/backups",
            "--show-all",
        ])
        .expect("flags parse");
        let settings = Settings::from(cli);

        assert_eq!(settings.log_dir, PathBuf::from("/tmp/usbcheck-logs"));
        assert_eq!(settings.benchmark.size_bytes, 4 * 1024 * 1024);
        assert_eq!(settings.benchmark.chunk_bytes, 64 * 1024);
        assert_eq!(settings.backup_dir, PathBuf::from("/srv/backups"));
        assert!(settings.show_all);
    }

    #[test]
    fn zero_sizes_are_clamped() {
        let cli = Cli::try_parse_from(["usbcheck", "--bench-size-mib", "0", "--tick-ms", "0"])
            .expect("flags parse");
        let settings = Settings::from(cli);
        assert_eq!(settings.benchmark.size_bytes, 1024 * 1024);
        assert_eq!(settings.tick, Duration::from_millis(10));
    }
}
