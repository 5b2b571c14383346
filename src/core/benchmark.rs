//! Sequential write/read throughput test against a mounted volume.

use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;
use std::time::{Duration, Instant};

use rand::RngCore;
use tracing::debug;

use super::OperationError;
use super::events::ProgressReporter;

/// Anything faster than this cannot be told apart from clock noise
pub const MIN_MEASURABLE: Duration = Duration::from_micros(1);

#[derive(Debug, Clone, Copy)]
pub struct BenchmarkConfig {
    pub size_bytes: usize,
    pub chunk_bytes: usize,
}

impl Default for BenchmarkConfig {
    fn default() -> Self {
        Self {
            size_bytes: 16 * 1024 * 1024,
            chunk_bytes: 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BenchmarkReport {
    pub bytes: u64,
    pub write_bytes_per_sec: f64,
    pub read_bytes_per_sec: f64,
}

/// Bytes per second for `bytes` moved in `elapsed`
pub fn throughput(bytes: u64, elapsed: Duration) -> Result<f64, OperationError> {
    if bytes == 0 || elapsed < MIN_MEASURABLE {
        return Err(OperationError::DegenerateTiming);
    }
    Ok(bytes as f64 / elapsed.as_secs_f64())
}

/// Writes `config.size_bytes` of random data to a temporary file under `dir`,
/// reads it back in chunks, and removes the file on every exit path.
pub fn run(
    dir: &Path,
    config: &BenchmarkConfig,
    progress: &ProgressReporter,
) -> Result<BenchmarkReport, OperationError> {
    let mut payload = vec![0u8; config.size_bytes];
    rand::thread_rng().fill_bytes(&mut payload);

    // Deleted when dropped, whichever way this function returns
    let temp = tempfile::Builder::new()
        .prefix("speed_test_")
        .suffix(".tmp")
        .tempfile_in(dir)?;
    debug!("Benchmark file: {}", temp.path().display());

    let start = Instant::now();
    {
        let mut file = temp.as_file();
        file.write_all(&payload)?;
        file.sync_all()?;
    }
    let write_elapsed = start.elapsed();
    let write_bytes_per_sec = throughput(payload.len() as u64, write_elapsed)?;
    progress.advance_to(50);

    let total = payload.len() as u64;
    drop(payload);

    let mut reader = File::open(temp.path())?;
    let mut chunk = vec![0u8; config.chunk_bytes.max(1)];
    let mut read_total = 0u64;
    let start = Instant::now();
    loop {
        let n = reader.read(&mut chunk)?;
        if n == 0 {
            break;
        }
        read_total += n as u64;
        progress.advance_to(50 + (read_total.min(total) * 50 / total.max(1)) as u8);
    }
    let read_elapsed = start.elapsed();

    if read_total != total {
        return Err(OperationError::Io(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            format!("read back {read_total} of {total} bytes"),
        )));
    }
    let read_bytes_per_sec = throughput(read_total, read_elapsed)?;

    Ok(BenchmarkReport {
        bytes: total,
        write_bytes_per_sec,
        read_bytes_per_sec,
    })
}
