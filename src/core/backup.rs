//! Recursive mirror of a volume into a destination directory.
//!
//! A file that fails to copy is recorded and the walk moves on; only problems
//! with the roots themselves abort the backup.

use std::fs::{self, File, FileTimes};
use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use super::OperationError;
use super::events::{EventSender, ProgressReporter};

#[derive(Debug, Clone, PartialEq)]
pub struct BackupFailure {
    pub path: PathBuf,
    pub error: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BackupReport {
    pub files_copied: u64,
    pub bytes_copied: u64,
    /// Entries that are neither files nor directories
    pub skipped: u64,
    pub failures: Vec<BackupFailure>,
}

/// Copies `src` to `dst` and carries over access/modify times and permissions.
/// Permissions are applied last so read-only sources still get their times.
pub fn copy_preserving(src: &Path, dst: &Path) -> io::Result<u64> {
    let meta = fs::metadata(src)?;
    let mut reader = File::open(src)?;

    // A read-only copy left by an earlier run cannot be reopened for writing
    if let Ok(existing) = fs::symlink_metadata(dst) {
        if existing.permissions().readonly() {
            fs::remove_file(dst)?;
        }
    }

    let mut writer = File::create(dst)?;
    let bytes = io::copy(&mut reader, &mut writer)?;
    let mut times = FileTimes::new().set_modified(meta.modified()?);
    if let Ok(accessed) = meta.accessed() {
        times = times.set_accessed(accessed);
    }
    writer.set_times(times)?;
    drop(writer);

    fs::set_permissions(dst, meta.permissions())?;
    Ok(bytes)
}

pub fn run(
    source: &Path,
    destination: &Path,
    events: &EventSender,
    progress: &ProgressReporter,
) -> Result<BackupReport, OperationError> {
    run_with(source, destination, events, progress, copy_preserving)
}

/// Same as [`run`] with a pluggable per-file copy.
pub fn run_with<C>(
    source: &Path,
    destination: &Path,
    events: &EventSender,
    progress: &ProgressReporter,
    mut copy: C,
) -> Result<BackupReport, OperationError>
where
    C: FnMut(&Path, &Path) -> io::Result<u64>,
{
    let source = source.canonicalize()?;
    fs::create_dir_all(destination)?;
    let destination = destination.canonicalize()?;
    if destination.starts_with(&source) {
        return Err(OperationError::Io(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!(
                "backup destination {} is inside the source {}",
                destination.display(),
                source.display()
            ),
        )));
    }

    let total = count_files(&source);
    debug!("Backing up {} files from {}", total, source.display());

    let mut walk = Walk {
        source: &source,
        destination: &destination,
        events,
        progress,
        total,
        report: BackupReport::default(),
    };
    walk.dir(&source, &mut copy);
    progress.advance_to(100);
    Ok(walk.report)
}

struct Walk<'a> {
    source: &'a Path,
    destination: &'a Path,
    events: &'a EventSender,
    progress: &'a ProgressReporter,
    total: u64,
    report: BackupReport,
}

impl Walk<'_> {
    fn dir<C>(&mut self, dir: &Path, copy: &mut C)
    where
        C: FnMut(&Path, &Path) -> io::Result<u64>,
    {
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) => return self.fail(dir, e),
        };

        for entry in entries {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    self.fail(dir, e);
                    continue;
                }
            };
            let path = entry.path();
            match entry.file_type() {
                Ok(ft) if ft.is_dir() => self.dir(&path, copy),
                Ok(ft) if ft.is_file() => self.file(&path, copy),
                Ok(_) => self.skip(&path),
                Err(e) => self.fail(&path, e),
            }
        }
    }

    fn file<C>(&mut self, path: &Path, copy: &mut C)
    where
        C: FnMut(&Path, &Path) -> io::Result<u64>,
    {
        let Ok(relative) = path.strip_prefix(self.source) else {
            return;
        };
        let target = self.destination.join(relative);

        let result = match target.parent() {
            Some(parent) => fs::create_dir_all(parent).and_then(|_| copy(path, &target)),
            None => copy(path, &target),
        };

        match result {
            Ok(bytes) => {
                self.report.files_copied += 1;
                self.report.bytes_copied += bytes;
                self.events.output(format!("Copied {}", relative.display()));
            }
            Err(e) => self.fail(path, e),
        }
        let done = self.report.files_copied + self.report.failures.len() as u64;
        self.progress.fraction(done, self.total);
    }

    /// Symlinks, sockets and device nodes are not copied
    fn skip(&mut self, path: &Path) {
        let shown = path.strip_prefix(self.source).unwrap_or(path);
        debug!("Skipping special file {}", path.display());
        self.events
            .output(format!("Skipped {} (not a regular file)", shown.display()));
        self.report.skipped += 1;
    }

    fn fail(&mut self, path: &Path, error: io::Error) {
        warn!("Backup skipped {}: {}", path.display(), error);
        self.events
            .error(format!("Failed to copy {}: {}", path.display(), error));
        self.report.failures.push(BackupFailure {
            path: path.to_path_buf(),
            error: error.to_string(),
        });
    }
}

fn count_files(dir: &Path) -> u64 {
    let Ok(entries) = fs::read_dir(dir) else {
        return 0;
    };
    entries
        .flatten()
        .map(|entry| match entry.file_type() {
            Ok(ft) if ft.is_dir() => count_files(&entry.path()),
            Ok(ft) if ft.is_file() => 1,
            _ => 0,
        })
        .sum()
}
