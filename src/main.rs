mod app;
mod config;
mod core;
mod logging;
mod platform;
mod ui;
mod utils;

use std::io;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use crossterm::{
    event::{self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode, KeyEventKind},
    execute,
    terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode},
};
use ratatui::prelude::*;
use tracing::{info, warn};

use crate::app::{App, AppState};
use crate::config::{Cli, Settings};
use crate::core::coordinator::Coordinator;
use crate::core::{OperationKind, events};
use crate::platform::get_disk_manager;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings = Settings::from(Cli::parse());
    let _log_guard = logging::init(&settings.log_dir, settings.log_max_bytes, &settings.log_level)?;
    info!("usbcheck {} starting", env!("CARGO_PKG_VERSION"));

    // Safety check: Validate terminal size BEFORE entering raw mode or alternate screen.
    let (cols, rows) = crossterm::terminal::size()?;
    if cols == 0 || rows == 0 || cols > 1000 || rows > 1000 {
        anyhow::bail!(
            "Invalid terminal size detected ({}x{}). Please ensure you're running in a valid terminal.",
            cols,
            rows
        );
    }

    let (event_tx, event_rx) = events::channel();
    let coordinator = Coordinator::new(get_disk_manager(), event_tx, settings.benchmark);
    let mut app = App::new(Arc::new(coordinator), event_rx, &settings);

    // Check privileges - warn but don't exit
    if !app.has_privileges() {
        warn!("Not running with elevated privileges");
        app.state = AppState::Error(
            "Warning: Not running as root/admin. Repair and format will be refused.".to_string(),
        );
    }

    // Initial device scan
    let _ = app.refresh_devices().await;

    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;

    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let result = run_app(&mut terminal, &mut app, settings.tick).await;

    // Restore terminal
    disable_raw_mode()?;
    execute!(
        terminal.backend_mut(),
        LeaveAlternateScreen,
        DisableMouseCapture
    )?;
    terminal.show_cursor()?;

    if let Err(e) = &result {
        eprintln!("Error: {e}");
    }
    info!("usbcheck exiting");

    result
}

async fn run_app<B: Backend>(
    terminal: &mut Terminal<B>,
    app: &mut App,
    tick: Duration,
) -> anyhow::Result<()> {
    loop {
        app.tick = app.tick.wrapping_add(1);

        // Pick up whatever the running operation reported since the last tick
        if app.drain_events() {
            let _ = app.refresh_devices().await;
        }

        terminal.draw(|f| ui::draw(f, app))?;

        if event::poll(tick)? {
            if let Event::Key(key) = event::read()? {
                if key.kind != KeyEventKind::Press {
                    continue;
                }

                match &app.state {
                    AppState::Idle => handle_idle_input(app, key.code).await,
                    AppState::FormattingMenu => handle_format_menu_input(app, key.code),
                    AppState::ConfirmFormat(_) => handle_confirm_input(app, key.code),
                    AppState::BackupDestination => handle_backup_input(app, key.code),
                    AppState::Error(_) => handle_message_input(app, key.code),
                }

                if app.should_quit {
                    return Ok(());
                }
            }
        }
    }
}

async fn handle_idle_input(app: &mut App, key: KeyCode) {
    match key {
        KeyCode::Char('q') => app.should_quit = true,
        KeyCode::Up => app.select_previous(),
        KeyCode::Down => app.select_next(),
        KeyCode::Char('r') => {
            let _ = app.refresh_devices().await;
        }
        KeyCode::Char('a') => app.start(OperationKind::Analyze),
        KeyCode::Char('p') => app.start(OperationKind::Repair),
        KeyCode::Char('b') => app.start(OperationKind::Benchmark),
        KeyCode::Char('k') => app.enter_backup_prompt(),
        KeyCode::Char('f') => app.enter_format_menu(),
        _ => {}
    }
}

fn handle_format_menu_input(app: &mut App, key: KeyCode) {
    match key {
        KeyCode::Char('q') => app.should_quit = true,
        KeyCode::Esc => app.cancel(),
        KeyCode::Up => app.select_previous_fs(),
        KeyCode::Down => app.select_next_fs(),
        KeyCode::Enter => app.enter_confirm_mode(),
        _ => {}
    }
}

fn handle_confirm_input(app: &mut App, key: KeyCode) {
    match key {
        KeyCode::Esc => app.cancel(),
        KeyCode::Enter => app.format_selected(),
        KeyCode::Backspace => {
            app.input_buffer.pop();
        }
        KeyCode::Char(c) => app.input_buffer.push(c),
        _ => {}
    }
}

fn handle_backup_input(app: &mut App, key: KeyCode) {
    match key {
        KeyCode::Esc => app.cancel(),
        KeyCode::Enter => app.confirm_backup(),
        KeyCode::Backspace => {
            app.input_buffer.pop();
        }
        KeyCode::Char(c) => app.input_buffer.push(c),
        _ => {}
    }
}

fn handle_message_input(app: &mut App, key: KeyCode) {
    match key {
        KeyCode::Char('q') => app.should_quit = true,
        KeyCode::Esc | KeyCode::Enter => app.cancel(),
        _ => {}
    }
}
