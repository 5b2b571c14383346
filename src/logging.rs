use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::Local;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::time::FormatTime;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

pub const LOG_FILE_NAME: &str = "usbcheck.log";

/// Append-only log file that starts over once it would exceed `max_bytes`
pub struct CappedFile {
    path: PathBuf,
    file: File,
    written: u64,
    max_bytes: u64,
}

impl CappedFile {
    pub fn open(path: &Path, max_bytes: u64) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let written = file.metadata()?.len();
        Ok(Self {
            path: path.to_path_buf(),
            file,
            written,
            max_bytes,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn restart(&mut self) -> io::Result<()> {
        self.file.set_len(0)?;
        self.written = 0;
        Ok(())
    }
}

impl Write for CappedFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        // An oversized record still lands in an empty file
        if self.written > 0 && self.written + buf.len() as u64 > self.max_bytes {
            self.restart()?;
        }
        let n = self.file.write(buf)?;
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

/// `2026-10-19 14:03:12.512` in local time
struct LocalTime;

impl FormatTime for LocalTime {
    fn format_time(&self, w: &mut Writer<'_>) -> fmt::Result {
        write!(w, "{}", Local::now().format("%Y-%m-%d %H:%M:%S%.3f"))
    }
}

/// Installs the global subscriber. Keep the guard alive until exit so
/// buffered records are flushed.
pub fn init(log_dir: &Path, max_bytes: u64, filter: &str) -> io::Result<WorkerGuard> {
    fs::create_dir_all(log_dir)?;
    let file = CappedFile::open(&log_dir.join(LOG_FILE_NAME), max_bytes)?;
    let path = file.path().to_path_buf();

    let (writer, guard) = tracing_appender::non_blocking(file);
    let filter = EnvFilter::try_new(filter).unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_target(false)
                .with_timer(LocalTime)
                .with_writer(writer),
        )
        .try_init()
        .map_err(|e| io::Error::other(format!("logger init failed: {e}")))?;

    info!("Logging to {}", path.display());
    Ok(guard)
}
