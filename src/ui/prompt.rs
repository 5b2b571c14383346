use ratatui::{
    Frame,
    layout::{Alignment, Constraint, Flex, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Clear, List, ListItem, Paragraph, Wrap},
};

use crate::app::App;

/// Draw the filesystem selection menu
pub fn draw_format_menu(frame: &mut Frame, app: &App) {
    let area = centered_rect(50, 50, frame.area());

    frame.render_widget(Clear, area);

    let block = Block::default()
        .title(" Select Filesystem ")
        .borders(Borders::ALL)
        .style(Style::default().fg(Color::Cyan));

    let inner = block.inner(area);
    frame.render_widget(block, area);

    let items: Vec<ListItem> = app
        .fs_options
        .iter()
        .enumerate()
        .map(|(i, fs)| {
            let style = if i == app.selected_fs_index {
                Style::default()
                    .fg(Color::Yellow)
                    .add_modifier(Modifier::BOLD | Modifier::REVERSED)
            } else {
                Style::default()
            };
            ListItem::new(fs.display_name()).style(style)
        })
        .collect();

    let list = List::new(items);
    frame.render_widget(list, inner);
}

/// Draw confirmation dialog before formatting
pub fn draw_confirm_dialog(frame: &mut Frame, identifier: &str, input: &str) {
    let area = centered_rect(60, 40, frame.area());

    frame.render_widget(Clear, area);

    let block = Block::default()
        .title(" ⚠️  CONFIRM FORMAT ")
        .borders(Borders::ALL)
        .style(Style::default().fg(Color::Red));

    let inner = block.inner(area);
    frame.render_widget(block, area);

    let chunks = Layout::vertical([
        Constraint::Length(2),
        Constraint::Length(2),
        Constraint::Length(3),
        Constraint::Min(1),
    ])
    .split(inner);

    let warning = Paragraph::new(Line::from(vec![
        Span::styled(
            "WARNING: ",
            Style::default().fg(Color::Red).add_modifier(Modifier::BOLD),
        ),
        Span::raw("This will PERMANENTLY ERASE all data!"),
    ]));
    frame.render_widget(warning, chunks[0]);

    let instruction = Paragraph::new(format!("Type '{}' to confirm:", identifier))
        .style(Style::default().fg(Color::Yellow));
    frame.render_widget(instruction, chunks[1]);

    draw_input(frame, chunks[2], input);
}

/// Draw the backup destination prompt
pub fn draw_backup_prompt(frame: &mut Frame, app: &App) {
    let area = centered_rect(70, 30, frame.area());

    frame.render_widget(Clear, area);

    let block = Block::default()
        .title(" Backup Destination ")
        .borders(Borders::ALL)
        .style(Style::default().fg(Color::Cyan));

    let inner = block.inner(area);
    frame.render_widget(block, area);

    let chunks = Layout::vertical([
        Constraint::Length(2),
        Constraint::Length(3),
        Constraint::Min(1),
    ])
    .split(inner);

    let source = app
        .selected_device()
        .and_then(|d| d.mount_point.as_ref())
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| "selected device".to_string());
    let instruction = Paragraph::new(format!("Copy every file from {} into:", source))
        .style(Style::default().fg(Color::Yellow));
    frame.render_widget(instruction, chunks[0]);

    draw_input(frame, chunks[1], &app.input_buffer);
}

/// Draw an error message
pub fn draw_error_message(frame: &mut Frame, message: &str) {
    let area = centered_rect(60, 40, frame.area());

    frame.render_widget(Clear, area);

    let block = Block::default()
        .title(" Error ")
        .borders(Borders::ALL)
        .style(Style::default().fg(Color::Red));

    let inner = block.inner(area);
    frame.render_widget(block, area);

    let chunks = Layout::vertical([Constraint::Min(1), Constraint::Length(1)]).split(inner);

    let text = Paragraph::new(message)
        .alignment(Alignment::Center)
        .wrap(Wrap { trim: true })
        .style(Style::default().fg(Color::Red));
    frame.render_widget(text, chunks[0]);

    let footer = Paragraph::new("Press Esc/Enter to dismiss")
        .alignment(Alignment::Center)
        .style(Style::default().fg(Color::DarkGray));
    frame.render_widget(footer, chunks[1]);
}

fn draw_input(frame: &mut Frame, area: Rect, input: &str) {
    let input_display = Paragraph::new(input).block(
        Block::default()
            .borders(Borders::ALL)
            .title(" Input ")
            .style(Style::default().fg(Color::White)),
    );
    frame.render_widget(input_display, area);
}

/// Helper to create a centered rectangle
fn centered_rect(percent_x: u16, percent_y: u16, r: Rect) -> Rect {
    let [area] = Layout::horizontal([Constraint::Percentage(percent_x)])
        .flex(Flex::Center)
        .areas(r);
    let [area] = Layout::vertical([Constraint::Percentage(percent_y)])
        .flex(Flex::Center)
        .areas(area);
    area
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn centered_rect_stays_inside() {
        let outer = Rect::new(0, 0, 100, 40);
        let area = centered_rect(50, 50, outer);
        assert_eq!(area.width, 50);
        assert_eq!(area.height, 20);
        assert_eq!(area.x, 25);
        assert_eq!(area.y, 10);
    }
}
