use ratatui::{
    Frame,
    layout::{Alignment, Constraint, Layout, Margin, Rect},
    style::{Color, Modifier, Style, Stylize},
    symbols::border,
    text::{Line, Span},
    widgets::{Block, Borders, Cell, Gauge, Padding, Paragraph, Row, Table},
};

use crate::app::{App, AppState, LogKind};
use crate::core::{OperationKind, OperationState};
use crate::utils::bytes_to_human;

// Design tokens for consistent styling
const COLOR_PRIMARY: Color = Color::Rgb(99, 179, 237); // Soft blue
const COLOR_SUCCESS: Color = Color::Rgb(104, 211, 145); // Soft green
const COLOR_WARNING: Color = Color::Rgb(246, 173, 85); // Soft orange
const COLOR_DANGER: Color = Color::Rgb(252, 129, 129); // Soft red
const COLOR_MUTED: Color = Color::Rgb(113, 128, 150); // Gray
const COLOR_BORDER: Color = Color::Rgb(74, 85, 104); // Dark gray

const SPINNER: [&str; 10] = ["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"];

/// Draw the main dashboard: devices, running operation, event log
pub fn draw_dashboard(frame: &mut Frame, app: &App) {
    let area = frame.area();

    // Outer margin for breathing room
    let inner_area = area.inner(Margin::new(2, 1));

    let chunks = Layout::vertical([
        Constraint::Length(5),      // Header
        Constraint::Percentage(40), // Device table
        Constraint::Length(3),      // Operation gauge
        Constraint::Min(6),         // Event log
        Constraint::Length(3),      // Help bar
    ])
    .split(inner_area);

    draw_header(frame, chunks[0], app);
    draw_device_table(frame, chunks[1], app);
    draw_operation(frame, chunks[2], app);
    draw_event_log(frame, chunks[3], app);
    draw_help_bar(frame, chunks[4], app);
}

fn draw_header(frame: &mut Frame, area: Rect, app: &App) {
    // Privilege badge
    let (badge_text, badge_style) = if app.has_privileges() {
        (
            " ● ADMIN ",
            Style::default()
                .fg(Color::Black)
                .bg(COLOR_SUCCESS)
                .add_modifier(Modifier::BOLD),
        )
    } else {
        (
            " ○ USER ",
            Style::default()
                .fg(Color::Black)
                .bg(COLOR_WARNING)
                .add_modifier(Modifier::BOLD),
        )
    };

    let title_line = Line::from(vec![
        Span::styled(
            "USB Check",
            Style::default()
                .fg(COLOR_PRIMARY)
                .add_modifier(Modifier::BOLD),
        ),
        Span::raw("  "),
        Span::styled(badge_text, badge_style),
    ]);

    let scope = if app.show_all { "volumes" } else { "removable volumes" };
    let subtitle = Line::from(vec![Span::styled(
        format!("{} {} detected", app.devices.len(), scope),
        Style::default().fg(COLOR_MUTED),
    )]);

    let header = Paragraph::new(vec![Line::default(), title_line, Line::default(), subtitle])
        .alignment(Alignment::Center)
        .block(
            Block::default()
                .borders(Borders::ALL)
                .border_set(border::ROUNDED)
                .border_style(Style::default().fg(COLOR_BORDER))
                .padding(Padding::horizontal(2)),
        );

    frame.render_widget(header, area);
}

fn draw_device_table(frame: &mut Frame, area: Rect, app: &App) {
    let header_cells = ["DEVICE", "LABEL", "SIZE", "TYPE", "MOUNT POINT", "STATUS"]
        .iter()
        .map(|h| {
            Cell::from(format!(" {} ", h)).style(
                Style::default()
                    .fg(COLOR_MUTED)
                    .add_modifier(Modifier::BOLD),
            )
        });

    let header = Row::new(header_cells).height(1).bottom_margin(1);

    let rows: Vec<Row> = app
        .devices
        .iter()
        .enumerate()
        .map(|(i, device)| {
            let is_selected = i == app.selected_index;

            let base_color = if device.is_protected {
                COLOR_DANGER
            } else if device.is_removable {
                COLOR_SUCCESS
            } else {
                COLOR_MUTED
            };

            let style = if is_selected {
                Style::default()
                    .fg(Color::Black)
                    .bg(base_color)
                    .add_modifier(Modifier::BOLD)
            } else {
                Style::default().fg(base_color)
            };

            let (status_icon, status_text) = if device.is_protected {
                ("🔒", "System")
            } else if !device.is_removable {
                ("■", "Fixed")
            } else if device.mount_point.is_some() {
                ("●", "Mounted")
            } else {
                ("○", "Unmounted")
            };

            let mount = device
                .mount_point
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "—".to_string());

            // Clean up filesystem name
            let fs_clean = device
                .filesystem
                .replace("Apple_", "")
                .replace("Microsoft Basic Data", "Basic Data");

            Row::new(vec![
                Cell::from(format!(" {} ", device.identifier)),
                Cell::from(format!(" {} ", device.label)),
                Cell::from(format!(" {} ", bytes_to_human(device.size_bytes))),
                Cell::from(format!(" {} ", fs_clean)),
                Cell::from(format!(" {} ", mount)),
                Cell::from(format!(" {} {} ", status_icon, status_text)),
            ])
            .style(style)
        })
        .collect();

    let widths = [
        Constraint::Min(14),
        Constraint::Length(14),
        Constraint::Length(12),
        Constraint::Length(12),
        Constraint::Percentage(28),
        Constraint::Length(14),
    ];

    let table = Table::new(rows, widths)
        .header(header)
        .block(
            Block::default()
                .borders(Borders::ALL)
                .border_set(border::ROUNDED)
                .border_style(Style::default().fg(COLOR_BORDER))
                .title(" Devices ")
                .title_style(Style::default().fg(Color::White).bold())
                .padding(Padding::horizontal(1)),
        )
        .column_spacing(1);

    frame.render_widget(table, area);
}

fn draw_operation(frame: &mut Frame, area: Rect, app: &App) {
    let block = Block::default()
        .borders(Borders::ALL)
        .border_set(border::ROUNDED)
        .border_style(Style::default().fg(COLOR_BORDER));

    let Some(op) = app.running() else {
        let idle = Paragraph::new("No operation running")
            .alignment(Alignment::Center)
            .style(Style::default().fg(COLOR_MUTED))
            .block(block.title(" Operation "));
        frame.render_widget(idle, area);
        return;
    };

    let spinner = SPINNER[app.tick as usize % SPINNER.len()];
    let phase = match op.state() {
        OperationState::Validating => "validating",
        _ => "running",
    };
    let title = format!(
        " {} {} #{} on {} ({}, since {}) ",
        spinner,
        op.kind(),
        op.id(),
        op.target(),
        phase,
        op.started_at().format("%H:%M:%S")
    );

    let percent = app.progress.max(op.progress()).min(100);
    let gauge = Gauge::default()
        .block(block.title(title))
        .gauge_style(Style::default().fg(COLOR_PRIMARY))
        .percent(u16::from(percent))
        .label(progress_label(op.kind(), percent));

    frame.render_widget(gauge, area);
}

/// Repair and format progress is inferred from output lines, so it is shown as approximate
fn progress_label(kind: &OperationKind, percent: u8) -> String {
    match kind {
        OperationKind::Repair | OperationKind::Format { .. } if percent < 100 => {
            format!("~{}% (est.)", percent)
        }
        _ => format!("{}%", percent),
    }
}

fn draw_event_log(frame: &mut Frame, area: Rect, app: &App) {
    // Border takes two rows
    let visible = area.height.saturating_sub(2) as usize;
    let skip = app.log.len().saturating_sub(visible);

    let lines: Vec<Line> = app
        .log
        .iter()
        .skip(skip)
        .map(|entry| {
            let style = match entry.kind {
                LogKind::Output => Style::default().fg(Color::White),
                LogKind::Status => Style::default().fg(COLOR_PRIMARY),
                LogKind::Error => Style::default().fg(COLOR_DANGER),
            };
            Line::from(Span::styled(entry.text.clone(), style))
        })
        .collect();

    let log = Paragraph::new(lines).block(
        Block::default()
            .borders(Borders::ALL)
            .border_set(border::ROUNDED)
            .border_style(Style::default().fg(COLOR_BORDER))
            .title(" Events ")
            .title_style(Style::default().fg(Color::White).bold())
            .padding(Padding::horizontal(1)),
    );

    frame.render_widget(log, area);
}

fn draw_help_bar(frame: &mut Frame, area: Rect, app: &App) {
    let bindings = match &app.state {
        AppState::Idle => vec![
            ("↑↓", "Navigate"),
            ("a", "Analyze"),
            ("p", "Repair"),
            ("b", "Benchmark"),
            ("k", "Backup"),
            ("f", "Format"),
            ("r", "Refresh"),
            ("q", "Quit"),
        ],
        AppState::FormattingMenu => vec![("↑↓", "Filesystem"), ("Enter", "Next"), ("Esc", "Back")],
        AppState::ConfirmFormat(_) | AppState::BackupDestination => {
            vec![("Enter", "Confirm"), ("Esc", "Cancel")]
        }
        AppState::Error(_) => vec![("Esc", "Dismiss"), ("q", "Quit")],
    };

    let mut spans = Vec::new();
    for (i, (key, action)) in bindings.iter().enumerate() {
        if i > 0 {
            spans.push(Span::styled("  │  ", Style::default().fg(COLOR_BORDER)));
        }
        spans.push(Span::styled(
            format!(" {} ", key),
            Style::default()
                .fg(Color::White)
                .bg(COLOR_BORDER)
                .add_modifier(Modifier::BOLD),
        ));
        spans.push(Span::styled(
            format!(" {}", action),
            Style::default().fg(COLOR_MUTED),
        ));
    }

    let help = Paragraph::new(Line::from(spans))
        .alignment(Alignment::Center)
        .block(
            Block::default()
                .borders(Borders::ALL)
                .border_set(border::ROUNDED)
                .border_style(Style::default().fg(COLOR_BORDER)),
        );

    frame.render_widget(help, area);
}
