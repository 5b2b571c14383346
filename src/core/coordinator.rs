//! Single-flight execution of device operations.
//!
//! At most one operation is validating or running at any time. The slot is
//! claimed under a lock when a request arrives and is released by the
//! operation reaching a terminal state. A drop guard travels with the worker
//! so a panic or a dropped request still ends in `Failed`.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};

use chrono::{DateTime, Local};
use tokio::sync::watch;
use tracing::{info, warn};

use super::benchmark::{self, BenchmarkConfig};
use super::disk_ops::DiskManager;
use super::events::{Event, EventSender, ProgressReporter};
use super::runner::{CommandRunner, CommandSpec};
use super::{Device, DiskError, OperationError, OperationKind, OperationState, backup, validator};
use crate::utils::bytes_to_human;

/// Progress added per line of repair/format output. Only an estimate.
const LINE_PROGRESS_STEP: u8 = 2;
const LINE_PROGRESS_CEILING: u8 = 99;

pub struct Operation {
    id: u64,
    kind: OperationKind,
    selection: String,
    device: OnceLock<Device>,
    started_at: DateTime<Local>,
    state: watch::Sender<OperationState>,
    progress: Arc<AtomicU8>,
}

impl Operation {
    fn new(id: u64, kind: OperationKind, selection: &str) -> Self {
        let (state, _) = watch::channel(OperationState::Idle);
        Self {
            id,
            kind,
            selection: selection.trim().to_string(),
            device: OnceLock::new(),
            started_at: Local::now(),
            state,
            progress: Arc::new(AtomicU8::new(0)),
        }
    }

    fn state(&self) -> OperationState {
        *self.state.borrow()
    }

    fn transition(&self, next: OperationState) -> bool {
        self.state.send_if_modified(|current| {
            if current.can_transition_to(next) {
                *current = next;
                true
            } else {
                false
            }
        })
    }
}

/// Read-only view of an operation for callers and the UI
#[derive(Clone)]
pub struct OperationHandle(Arc<Operation>);

impl OperationHandle {
    pub fn id(&self) -> u64 {
        self.0.id
    }

    pub fn kind(&self) -> &OperationKind {
        &self.0.kind
    }

    /// Identifier of the validated device, or the raw selection before that
    pub fn target(&self) -> &str {
        self.0
            .device
            .get()
            .map(|d| d.identifier.as_str())
            .unwrap_or(&self.0.selection)
    }

    pub fn started_at(&self) -> DateTime<Local> {
        self.0.started_at
    }

    pub fn state(&self) -> OperationState {
        self.0.state()
    }

    pub fn progress(&self) -> u8 {
        self.0.progress.load(Ordering::Acquire)
    }

    /// Resolves once the operation is `Completed` or `Failed`
    #[cfg(test)]
    pub async fn wait(&self) -> OperationState {
        let mut rx = self.0.state.subscribe();
        match rx.wait_for(OperationState::is_terminal).await {
            Ok(state) => *state,
            Err(_) => self.state(),
        }
    }
}

/// Ends the operation exactly once, whichever way the worker exits
struct Settle {
    op: Arc<Operation>,
    events: EventSender,
}

impl Settle {
    fn finish(self, outcome: Result<String, OperationError>) {
        let kind = &self.op.kind;
        let state = match outcome {
            Ok(summary) => {
                self.events.status(summary);
                ProgressReporter::new(self.op.progress.clone(), self.events.clone()).advance_to(100);
                OperationState::Completed
            }
            Err(e) => {
                self.events.error(format!("{} failed: {}", kind, e));
                OperationState::Failed
            }
        };
        self.events.send(Event::Finished(state));
        self.op.transition(state);
    }
}

impl Drop for Settle {
    fn drop(&mut self) {
        if self.op.state().is_terminal() {
            return;
        }
        warn!("{} #{} ended without an outcome", self.op.kind, self.op.id);
        let was_running = self.op.state() == OperationState::Running;
        if was_running {
            self.events
                .error(format!("{} aborted before completion", self.op.kind));
            self.events.send(Event::Finished(OperationState::Failed));
        }
        self.op.transition(OperationState::Failed);
    }
}

pub struct Coordinator {
    disks: Arc<dyn DiskManager>,
    runner: CommandRunner,
    events: EventSender,
    benchmark: BenchmarkConfig,
    active: Mutex<Option<Arc<Operation>>>,
    next_id: AtomicU64,
}

impl Coordinator {
    pub fn new(disks: Arc<dyn DiskManager>, events: EventSender, benchmark: BenchmarkConfig) -> Self {
        let runner = CommandRunner::new(disks.has_privileges());
        Self {
            disks,
            runner,
            events,
            benchmark,
            active: Mutex::new(None),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn disks(&self) -> &Arc<dyn DiskManager> {
        &self.disks
    }

    #[cfg(test)]
    pub fn is_busy(&self) -> bool {
        self.current().is_some()
    }

    /// The operation currently validating or running, if any
    pub fn current(&self) -> Option<OperationHandle> {
        let active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        active
            .as_ref()
            .filter(|op| !op.state().is_terminal())
            .map(|op| OperationHandle(op.clone()))
    }

    /// Validates the selection and starts the operation in the background.
    ///
    /// Returns `Busy` without touching the running operation when the slot is
    /// taken. Validation failures end the request before any worker starts.
    pub async fn request(
        &self,
        kind: OperationKind,
        selection: &str,
    ) -> Result<OperationHandle, OperationError> {
        info!("{} requested for '{}'", kind, selection.trim());
        let op = self.acquire(kind, selection)?;
        let settle = Settle {
            op: op.clone(),
            events: self.events.clone(),
        };

        let device =
            match validator::validate(self.disks.as_ref(), selection, op.kind.needs_mount()).await {
                Ok(device) => device,
                Err(e) => {
                    self.events.error(format!("{} rejected: {}", op.kind, e));
                    op.transition(OperationState::Failed);
                    return Err(e.into());
                }
            };

        let _ = op.device.set(device.clone());
        op.transition(OperationState::Running);
        self.events.status(format!(
            "{} started on {}",
            op.kind,
            device.display_name()
        ));

        let worker = Worker {
            disks: self.disks.clone(),
            runner: self.runner,
            events: self.events.clone(),
            progress: ProgressReporter::new(op.progress.clone(), self.events.clone()),
            benchmark: self.benchmark,
        };
        let task_op = op.clone();
        tokio::spawn(async move {
            let outcome = worker.run(&task_op.kind, device).await;
            settle.finish(outcome);
        });

        Ok(OperationHandle(op))
    }

    fn acquire(&self, kind: OperationKind, selection: &str) -> Result<Arc<Operation>, OperationError> {
        let mut active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(current) = active.as_ref().filter(|op| !op.state().is_terminal()) {
            self.events.error(format!(
                "Busy: {} on {} is still running",
                current.kind,
                OperationHandle(current.clone()).target()
            ));
            return Err(OperationError::Busy);
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let op = Arc::new(Operation::new(id, kind, selection));
        op.transition(OperationState::Validating);
        *active = Some(op.clone());
        Ok(op)
    }
}

struct Worker {
    disks: Arc<dyn DiskManager>,
    runner: CommandRunner,
    events: EventSender,
    progress: ProgressReporter,
    benchmark: BenchmarkConfig,
}

impl Worker {
    async fn run(&self, kind: &OperationKind, device: Device) -> Result<String, OperationError> {
        match kind {
            OperationKind::Analyze => self.analyze(&device).await,
            OperationKind::Repair => {
                let spec = self.disks.repair_command(&device)?;
                self.stream_command(&device, spec).await
            }
            OperationKind::Format { filesystem, label } => {
                let spec = self.disks.format_command(&device, *filesystem, label)?;
                self.stream_command(&device, spec).await
            }
            OperationKind::Benchmark => self.benchmark(&device).await,
            OperationKind::Backup { destination } => self.backup(&device, destination.clone()).await,
        }
    }

    async fn analyze(&self, device: &Device) -> Result<String, OperationError> {
        let usage = self.disks.usage(device).await?;
        Ok(format!(
            "Drive: {}\nLabel: {}\nFilesystem: {}\nTotal Size: {}\nUsed Space: {}\nFree Space: {}",
            device.identifier,
            device.label,
            device.filesystem,
            bytes_to_human(usage.total),
            bytes_to_human(usage.used),
            bytes_to_human(usage.free),
        ))
    }

    /// Repair and format both need elevation and stream tool output as events
    async fn stream_command(&self, device: &Device, spec: CommandSpec) -> Result<String, OperationError> {
        let spec = spec.elevated();
        self.runner.check_privileges(&spec)?;
        let unmounted = self.disks.prepare_exclusive(device).await?;

        self.events.status(format!("Running {}", spec.display()));
        let result = match self.runner.run(&spec) {
            Ok(running) => {
                running
                    .stream_to(|line| {
                        self.events.output(line);
                        self.progress.nudge(LINE_PROGRESS_STEP, LINE_PROGRESS_CEILING);
                    })
                    .await
            }
            Err(e) => Err(e),
        };

        // The volume is not remounted; mount-based operations fail until it is
        if unmounted {
            self.events.status(format!(
                "{} was unmounted and remains unmounted; remount it before analyze, benchmark or backup",
                device.identifier
            ));
        }

        result?;
        Ok(format!("{} completed on {}", spec.program, device.identifier))
    }

    async fn benchmark(&self, device: &Device) -> Result<String, OperationError> {
        let mount = mount_point(device)?;
        let config = self.benchmark;
        let progress = self.progress.clone();
        self.events.status(format!(
            "Writing and reading {} on {}",
            bytes_to_human(config.size_bytes as u64),
            mount.display()
        ));

        let report = tokio::task::spawn_blocking(move || benchmark::run(&mount, &config, &progress))
            .await
            .map_err(|e| OperationError::Aborted(e.to_string()))??;

        Ok(format!(
            "Write Speed: {}/s\nRead Speed: {}/s",
            bytes_to_human(report.write_bytes_per_sec as u64),
            bytes_to_human(report.read_bytes_per_sec as u64),
        ))
    }

    async fn backup(&self, device: &Device, destination: PathBuf) -> Result<String, OperationError> {
        let mount = mount_point(device)?;
        let events = self.events.clone();
        let progress = self.progress.clone();
        self.events.status(format!(
            "Copying {} to {}",
            mount.display(),
            destination.display()
        ));

        let report =
            tokio::task::spawn_blocking(move || backup::run(&mount, &destination, &events, &progress))
                .await
                .map_err(|e| OperationError::Aborted(e.to_string()))??;

        let mut summary = format!(
            "Backup copied {} files ({})",
            report.files_copied,
            bytes_to_human(report.bytes_copied)
        );
        if report.skipped > 0 {
            summary.push_str(&format!(", {} skipped", report.skipped));
        }
        if !report.failures.is_empty() {
            summary.push_str(&format!(", {} failed", report.failures.len()));
        }
        Ok(summary)
    }
}

fn mount_point(device: &Device) -> Result<PathBuf, DiskError> {
    device
        .mount_point
        .clone()
        .ok_or_else(|| DiskError::NotMounted(device.identifier.clone()))
}
