pub mod dashboard;
pub mod prompt;

use ratatui::Frame;

use crate::app::{App, AppState};

/// Main draw function that dispatches to appropriate view
pub fn draw(frame: &mut Frame, app: &App) {
    dashboard::draw_dashboard(frame, app);

    match &app.state {
        AppState::Idle => {}
        AppState::FormattingMenu => prompt::draw_format_menu(frame, app),
        AppState::ConfirmFormat(identifier) => {
            prompt::draw_confirm_dialog(frame, identifier, &app.input_buffer)
        }
        AppState::BackupDestination => prompt::draw_backup_prompt(frame, app),
        AppState::Error(msg) => prompt::draw_error_message(frame, msg),
    }
}
