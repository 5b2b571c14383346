use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::Local;
use tracing::warn;

use crate::config::Settings;
use crate::core::coordinator::{Coordinator, OperationHandle};
use crate::core::events::{Event, EventReceiver};
use crate::core::format::DEFAULT_LABEL;
use crate::core::{Device, FileSystemType, NO_LABEL, OperationKind, OperationState};

/// Oldest entries are dropped past this
const LOG_CAPACITY: usize = 500;

/// Modal state of the UI. A running operation is not a mode: input stays live.
#[derive(Debug, Clone, PartialEq)]
pub enum AppState {
    Idle,
    FormattingMenu,
    /// Waiting for the user to type this identifier
    ConfirmFormat(String),
    BackupDestination,
    Error(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogKind {
    Output,
    Status,
    Error,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LogEntry {
    pub kind: LogKind,
    pub text: String,
}

/// Main application state
pub struct App {
    pub devices: Vec<Device>,
    pub selected_index: usize,
    pub state: AppState,
    pub input_buffer: String,
    pub coordinator: Arc<Coordinator>,
    pub events: EventReceiver,
    pub log: VecDeque<LogEntry>,
    /// Last progress reported for the current or most recent operation
    pub progress: u8,
    pub fs_options: Vec<FileSystemType>,
    pub selected_fs_index: usize,
    pub backup_dir: PathBuf,
    pub show_all: bool,
    pub should_quit: bool,
    pub tick: u64,
}

impl App {
    pub fn new(coordinator: Arc<Coordinator>, events: EventReceiver, settings: &Settings) -> Self {
        let fs_options = coordinator.disks().format_options();
        Self {
            devices: Vec::new(),
            selected_index: 0,
            state: AppState::Idle,
            input_buffer: String::new(),
            coordinator,
            events,
            log: VecDeque::new(),
            progress: 0,
            fs_options,
            selected_fs_index: 0,
            backup_dir: settings.backup_dir.clone(),
            show_all: settings.show_all,
            should_quit: false,
            tick: 0,
        }
    }

    pub fn has_privileges(&self) -> bool {
        self.coordinator.disks().has_privileges()
    }

    pub async fn refresh_devices(&mut self) -> Result<(), String> {
        match self.coordinator.disks().list_devices().await {
            Ok(devices) => {
                let show_all = self.show_all;
                self.devices = devices
                    .into_iter()
                    .filter(|d| show_all || (d.is_removable && !d.is_protected))
                    .collect();
                if self.selected_index >= self.devices.len() {
                    self.selected_index = self.devices.len().saturating_sub(1);
                }
                Ok(())
            }
            Err(e) => {
                warn!("Device enumeration failed: {}", e);
                self.state = AppState::Error(e.to_string());
                Err(e.to_string())
            }
        }
    }

    /// Moves queued events into the log. Returns true when an operation finished.
    pub fn drain_events(&mut self) -> bool {
        let mut finished = false;
        for event in self.events.drain() {
            match event {
                Event::Output(line) => self.push_log(LogKind::Output, line),
                Event::Status(message) => {
                    for line in message.lines() {
                        self.push_log(LogKind::Status, line.to_string());
                    }
                }
                Event::Error(message) => self.push_log(LogKind::Error, message),
                Event::Progress(percent) => self.progress = percent,
                Event::Finished(state) => {
                    finished = true;
                    let verdict = match state {
                        OperationState::Completed => "completed",
                        _ => "failed",
                    };
                    self.push_log(LogKind::Status, format!("Operation {}", verdict));
                }
            }
        }
        finished
    }

    fn push_log(&mut self, kind: LogKind, text: String) {
        if self.log.len() == LOG_CAPACITY {
            self.log.pop_front();
        }
        self.log.push_back(LogEntry { kind, text });
    }

    /// The operation currently validating or running
    pub fn running(&self) -> Option<OperationHandle> {
        self.coordinator.current()
    }

    pub fn select_next(&mut self) {
        if !self.devices.is_empty() {
            self.selected_index = (self.selected_index + 1) % self.devices.len();
        }
    }

    pub fn select_previous(&mut self) {
        if !self.devices.is_empty() {
            if self.selected_index == 0 {
                self.selected_index = self.devices.len() - 1;
            } else {
                self.selected_index -= 1;
            }
        }
    }

    pub fn select_next_fs(&mut self) {
        if !self.fs_options.is_empty() {
            self.selected_fs_index = (self.selected_fs_index + 1) % self.fs_options.len();
        }
    }

    pub fn select_previous_fs(&mut self) {
        if !self.fs_options.is_empty() {
            if self.selected_fs_index == 0 {
                self.selected_fs_index = self.fs_options.len() - 1;
            } else {
                self.selected_fs_index -= 1;
            }
        }
    }

    pub fn selected_device(&self) -> Option<&Device> {
        self.devices.get(self.selected_index)
    }

    pub fn selected_fs(&self) -> Option<FileSystemType> {
        self.fs_options.get(self.selected_fs_index).copied()
    }

    /// Hands the request to the coordinator in the background. Rejections
    /// (busy, validation, privileges) come back through the event channel.
    pub fn start(&mut self, kind: OperationKind) {
        let Some(device) = self.selected_device() else {
            self.state = AppState::Error("No device selected".to_string());
            return;
        };
        let selection = device.identifier.clone();
        let coordinator = self.coordinator.clone();
        self.progress = 0;

        tokio::spawn(async move {
            // Outcome is reported as events
            let _ = coordinator.request(kind, &selection).await;
        });
    }

    pub fn enter_backup_prompt(&mut self) {
        let Some(device) = self.selected_device() else {
            return;
        };
        let name = if device.label == NO_LABEL {
            device
                .identifier
                .trim_start_matches("/dev/")
                .trim_end_matches(':')
                .to_string()
        } else {
            device.label.clone()
        };
        let stamp = Local::now().format("%Y%m%d-%H%M%S");
        self.input_buffer = self
            .backup_dir
            .join(format!("{}-{}", name, stamp))
            .display()
            .to_string();
        self.state = AppState::BackupDestination;
    }

    pub fn confirm_backup(&mut self) {
        let destination = self.input_buffer.trim();
        if destination.is_empty() {
            self.state = AppState::Error("Backup destination is empty".to_string());
            return;
        }
        let destination = PathBuf::from(destination);
        self.cancel();
        self.start(OperationKind::Backup { destination });
    }

    pub fn enter_format_menu(&mut self) {
        if self.fs_options.is_empty() || self.selected_device().is_none() {
            return;
        }
        self.state = AppState::FormattingMenu;
        self.selected_fs_index = 0;
        self.input_buffer.clear();
    }

    pub fn enter_confirm_mode(&mut self) {
        if let Some(device) = self.selected_device() {
            self.state = AppState::ConfirmFormat(device.identifier.clone());
            self.input_buffer.clear();
        }
    }

    pub fn format_selected(&mut self) {
        let device = match self.selected_device().cloned() {
            Some(d) => d,
            None => return,
        };

        // Confirmation input must match the identifier exactly
        if self.input_buffer != device.identifier {
            self.state = AppState::Error(format!(
                "Confirmation mismatch. Expected '{}', got '{}'",
                device.identifier, self.input_buffer
            ));
            return;
        }

        let filesystem = match self.selected_fs() {
            Some(fs) => fs,
            None => return,
        };
        let label = if device.label == NO_LABEL {
            DEFAULT_LABEL.to_string()
        } else {
            device.label.clone()
        };

        self.cancel();
        self.start(OperationKind::Format { filesystem, label });
    }

    pub fn cancel(&mut self) {
        self.state = AppState::Idle;
        self.input_buffer.clear();
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::core::benchmark::BenchmarkConfig;
    use crate::core::events;
    use crate::core::validator::tests::{FakeDisks, stick};

    fn settings() -> Settings {
        Settings {
            log_dir: PathBuf::from("logs"),
            log_max_bytes: 1024,
            log_level: "info".to_string(),
            tick: Duration::from_millis(100),
            benchmark: BenchmarkConfig::default(),
            backup_dir: PathBuf::from("/backups"),
            show_all: false,
        }
    }

    fn app(devices: Vec<Device>) -> App {
        let (tx, rx) = events::channel();
        let coordinator = Coordinator::new(
            Arc::new(FakeDisks::new(devices)),
            tx,
            BenchmarkConfig::default(),
        );
        App::new(Arc::new(coordinator), rx, &settings())
    }

    fn system_disk() -> Device {
        let mut device = stick("/dev/sda1", Some(PathBuf::from("/")));
        device.is_removable = false;
        device.is_protected = true;
        device
    }

    #[tokio::test]
    async fn refresh_hides_fixed_volumes_unless_asked() {
        let mut app = app(vec![system_disk(), stick("/dev/sdb1", None)]);
        app.refresh_devices().await.expect("refresh");
        assert_eq!(app.devices.len(), 1);
        assert_eq!(app.devices[0].identifier, "/dev/sdb1");

        app.show_all = true;
        app.refresh_devices().await.expect("refresh");
        assert_eq!(app.devices.len(), 2);
    }

    #[tokio::test]
    async fn selection_wraps_around() {
        let mut app = app(vec![stick("/dev/sdb1", None), stick("/dev/sdc1", None)]);
        app.refresh_devices().await.expect("refresh");

        app.select_previous();
        assert_eq!(app.selected_index, 1);
        app.select_next();
        assert_eq!(app.selected_index, 0);
    }

    #[tokio::test]
    async fn analyze_result_reaches_the_log() {
        let mount = tempfile::tempdir().expect("tempdir");
        let mut app = app(vec![stick("/dev/sdb1", Some(mount.path().to_path_buf()))]);
        app.refresh_devices().await.expect("refresh");

        app.start(OperationKind::Analyze);

        let mut finished = false;
        for _ in 0..100 {
            if app.drain_events() {
                finished = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(finished);
        assert_eq!(app.progress, 100);
        assert!(app.log.iter().any(|e| e.text == "Drive: /dev/sdb1"));
        assert!(app.log.iter().any(|e| e.text.starts_with("Free Space: ")));

        // Finished is emitted just before the slot is released
        for _ in 0..100 {
            if app.running().is_none() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(app.running().is_none());
    }

    #[tokio::test]
    async fn format_needs_exact_identifier() {
        let mut app = app(vec![stick("/dev/sdb1", None)]);
        app.refresh_devices().await.expect("refresh");

        app.enter_format_menu();
        assert_eq!(app.state, AppState::FormattingMenu);
        app.enter_confirm_mode();
        assert_eq!(app.state, AppState::ConfirmFormat("/dev/sdb1".to_string()));

        app.input_buffer = "/dev/sdb".to_string();
        app.format_selected();
        assert!(matches!(app.state, AppState::Error(_)));
        assert!(app.running().is_none());
    }

    #[tokio::test]
    async fn backup_prompt_is_prefilled_under_backup_dir() {
        let mut app = app(vec![stick("/dev/sdb1", None)]);
        app.refresh_devices().await.expect("refresh");

        app.enter_backup_prompt();
        assert_eq!(app.state, AppState::BackupDestination);
        assert!(app.input_buffer.starts_with("/backups/STICK-"));
    }

    #[tokio::test]
    async fn log_keeps_the_newest_entries() {
        let mut app = app(Vec::new());
        for i in 0..LOG_CAPACITY + 5 {
            app.push_log(LogKind::Output, i.to_string());
        }
        assert_eq!(app.log.len(), LOG_CAPACITY);
        assert_eq!(app.log.front().map(|e| e.text.as_str()), Some("5"));
    }
}
