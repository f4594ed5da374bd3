use ratatui::layout::{Alignment, Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, Clear, Gauge, List, ListItem, Paragraph};
use ratatui::Frame;

use crate::timer::{Phase, SessionState};
use crate::ui::app::{App, AppState, InputAction};
use crate::ui::commands::format_duration;

pub fn draw(app: &App, f: &mut Frame) {
    let size = f.area();
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),
            Constraint::Length(6),
            Constraint::Length(3),
            Constraint::Min(1),
        ])
        .split(size);

    draw_status(app, f, chunks[0]);
    draw_clock(app, f, chunks[1]);
    draw_progress(app, f, chunks[2]);

    match &app.state {
        AppState::ViewingLogs => draw_logs(app, f, chunks[3]),
        _ => draw_tasks(app, f, chunks[3]),
    }

    match &app.state {
        AppState::HelpPopup => draw_help(f, size),
        AppState::Input { prompt, buffer, action } => draw_input(f, size, prompt, buffer, action),
        AppState::CategoryMenu { selected_index, .. } => {
            draw_category_menu(app, f, size, *selected_index, "🏷️  Category for new task", true)
        }
        AppState::DeleteCategoryMenu { selected_index } => {
            draw_category_menu(app, f, size, *selected_index, "🗑️  Delete category", false)
        }
        _ => {}
    }
}

fn draw_status(app: &App, f: &mut Frame, area: Rect) {
    let snap = &app.snapshot;
    let status = match &app.state {
        AppState::ViewingLogs => "Viewing Logs - Press any key to return".to_string(),
        AppState::HelpPopup => "Help - Press any key to close".to_string(),
        AppState::Input { .. } => "Input - Enter to confirm, Esc to cancel".to_string(),
        AppState::CategoryMenu { .. } | AppState::DeleteCategoryMenu { .. } => {
            "Category Mode - Use arrow keys to select a category".to_string()
        }
        AppState::Dashboard => {
            let target = snap
                .task_id
                .and_then(|id| app.task_title(id))
                .unwrap_or_else(|| "no task".to_string());
            let mut line = format!(
                "Timer {} on {} | {} elapsed | [s] Start [p] Pause [f] Finish [a] Abandon [r] Reset | [?] Help",
                snap.state.as_str(),
                target,
                format_duration(snap.elapsed_seconds as i64)
            );
            if snap.flushing {
                line = format!("Saving session... | {}", line);
            } else if snap.flush_pending {
                line = format!("⚠ Session not saved - [f]/[a] retry, [r] discard | {}", line);
            }
            line
        }
    };

    let style = if snap.flush_pending {
        Style::default().fg(Color::Red)
    } else {
        Style::default()
    };
    let status_widget = Paragraph::new(status)
        .style(style)
        .block(Block::default().borders(Borders::ALL).title("Status"));
    f.render_widget(status_widget, area);
}

fn phase_color(phase: Phase) -> Color {
    match phase {
        Phase::Work => Color::LightRed,
        Phase::Break => Color::LightGreen,
    }
}

fn state_color(state: SessionState) -> Color {
    match state {
        SessionState::Idle => Color::Gray,
        SessionState::Active => Color::Green,
        SessionState::Paused => Color::Yellow,
        SessionState::Completed => Color::Cyan,
        SessionState::Abandoned => Color::Magenta,
    }
}

fn draw_clock(app: &App, f: &mut Frame, area: Rect) {
    let snap = &app.snapshot;
    let clock_style = if snap.time_up {
        Style::default().fg(Color::Red).add_modifier(Modifier::BOLD | Modifier::SLOW_BLINK)
    } else {
        Style::default().fg(phase_color(snap.phase)).add_modifier(Modifier::BOLD)
    };

    let lines = vec![
        Line::from(""),
        Line::from(Span::styled(snap.clock_label(), clock_style)),
        Line::from(vec![
            Span::raw("Current Phase: "),
            Span::styled(snap.phase.label(), Style::default().fg(phase_color(snap.phase))),
            Span::raw("   State: "),
            Span::styled(snap.state.as_str(), Style::default().fg(state_color(snap.state))),
        ]),
    ];
    let clock = Paragraph::new(lines)
        .alignment(Alignment::Center)
        .block(Block::default().borders(Borders::ALL).title("⏱  Time Remaining"));
    f.render_widget(clock, area);
}

fn draw_progress(app: &App, f: &mut Frame, area: Rect) {
    let snap = &app.snapshot;
    let gauge = Gauge::default()
        .block(Block::default().borders(Borders::ALL))
        .gauge_style(Style::default().fg(phase_color(snap.phase)))
        .percent(snap.progress_percent())
        .label(format!("{}%", snap.progress_percent()));
    f.render_widget(gauge, area);
}

fn draw_tasks(app: &App, f: &mut Frame, area: Rect) {
    if app.tasks.is_empty() {
        let empty = Paragraph::new("No tasks yet. Press [n] to create one, [c] for a category.")
            .block(Block::default().borders(Borders::ALL).title("📋 Tasks"));
        f.render_widget(empty, area);
        return;
    }

    let visible = area.height.saturating_sub(2) as usize;
    let offset = app.selected.saturating_sub(visible.saturating_sub(1));
    let timed = app.snapshot.task_id.filter(|_| app.snapshot.state != SessionState::Idle);

    let items: Vec<ListItem> = app
        .tasks
        .iter()
        .enumerate()
        .skip(offset)
        .take(visible.max(1))
        .map(|(i, task)| {
            let prefix = if i == app.selected { "→ " } else { "  " };
            let done = if task.completed { "[x]" } else { "[ ]" };
            let category = app.category_name(task.category_id);
            let mut display = format!(
                "{}{} P{} {:<32} {:<14} {:>3} attempts  {:>8}",
                prefix,
                done,
                task.priority,
                task.title,
                category,
                task.attempts,
                format_duration(task.time_spent)
            );
            if let Some(due) = task.due_date {
                display.push_str(&format!("  due {}", due));
            }
            if task.recurrence.is_recurring() {
                display.push_str(&format!(" ({})", task.recurrence.label()));
            }

            let style = if i == app.selected {
                Style::default().fg(Color::Yellow)
            } else if Some(task.id) == timed {
                Style::default().fg(Color::Green)
            } else if task.completed {
                Style::default().fg(Color::DarkGray)
            } else {
                Style::default()
            };
            ListItem::new(Line::from(display)).style(style)
        })
        .collect();

    let title = format!("📋 Tasks ({}) - [n] New [c] Category [x] Delete [Enter] Done", app.tasks.len());
    let list = List::new(items).block(Block::default().borders(Borders::ALL).title(title));
    f.render_widget(list, area);
}

fn draw_logs(app: &App, f: &mut Frame, area: Rect) {
    let log_items: Vec<ListItem> = app
        .logs
        .iter()
        .rev()
        .take(area.height.saturating_sub(2) as usize)
        .map(|log| ListItem::new(Line::from(log.clone())))
        .collect();
    let log_list = List::new(log_items).block(Block::default().borders(Borders::ALL).title("Logs"));
    f.render_widget(log_list, area);
}

fn draw_help(f: &mut Frame, size: Rect) {
    let area = centered_rect(60, 70, size);
    f.render_widget(Clear, area);
    let rows = [
        ("↑/↓", "Select task"),
        ("s", "Start timer on task / resume"),
        ("p", "Pause / resume"),
        ("f", "Finish: stop and mark task done"),
        ("a", "Abandon: stop, keep task open"),
        ("r", "Reset: discard session without credit"),
        ("t", "Toggle work/break phase"),
        ("n / c", "New task / new category"),
        ("x / X", "Delete task / delete category"),
        ("Enter", "Toggle task done"),
        ("w / b", "Set work / break duration"),
        ("l", "View logs"),
        ("q", "Quit"),
    ];
    let lines: Vec<Line> = rows
        .iter()
        .map(|(key, desc)| {
            Line::from(vec![
                Span::styled(format!("  {:<8}", key), Style::default().fg(Color::Cyan)),
                Span::raw(*desc),
            ])
        })
        .collect();
    let help = Paragraph::new(lines).block(Block::default().borders(Borders::ALL).title("Commands"));
    f.render_widget(help, area);
}

fn draw_input(f: &mut Frame, size: Rect, prompt: &str, buffer: &str, action: &InputAction) {
    let input_area = centered_rect(70, 30, size);
    f.render_widget(Clear, input_area);

    let title = match action {
        InputAction::NewTaskTitle => "✏️  New Task",
        InputAction::NewTaskPriority { .. } => "✏️  New Task - Priority",
        InputAction::NewTaskRepeat { .. } => "✏️  New Task - Repeat",
        InputAction::NewCategory => "🏷️  New Category",
        InputAction::WorkDuration => "⚙️  Work Duration",
        InputAction::BreakDuration => "⚙️  Break Duration",
    };

    let input_text = vec![
        Line::from(""),
        Line::from(prompt.to_string()).style(Style::default().fg(Color::Cyan)),
        Line::from(""),
        Line::from(vec![
            Span::styled("  ", Style::default()),
            Span::styled(buffer.to_string(), Style::default().fg(Color::White)),
            Span::styled("█", Style::default().fg(Color::Yellow)),
        ]),
        Line::from(""),
        Line::from("  Press Enter to confirm, Esc to cancel").style(Style::default().fg(Color::Gray)),
    ];
    let input_widget = Paragraph::new(input_text).block(
        Block::default()
            .borders(Borders::ALL)
            .title(title)
            .style(Style::default().fg(Color::White)),
    );
    f.render_widget(input_widget, input_area);
}

fn draw_category_menu(app: &App, f: &mut Frame, size: Rect, selected_index: usize, title: &str, with_none: bool) {
    let area = centered_rect(50, 50, size);
    f.render_widget(Clear, area);

    let mut options: Vec<String> = Vec::new();
    if with_none {
        options.push("(uncategorized)".to_string());
    }
    options.extend(app.categories.iter().map(|c| c.name.clone()));

    let items: Vec<ListItem> = options
        .iter()
        .enumerate()
        .map(|(i, name)| {
            let prefix = if i == selected_index { "→ " } else { "  " };
            let style = if i == selected_index {
                Style::default().fg(Color::Yellow)
            } else {
                Style::default()
            };
            ListItem::new(Line::from(format!("{}{}", prefix, name))).style(style)
        })
        .collect();
    let list = List::new(items).block(Block::default().borders(Borders::ALL).title(title.to_string()));
    f.render_widget(list, area);
}

pub fn centered_rect(percent_x: u16, percent_y: u16, r: Rect) -> Rect {
    let popup_layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100 - percent_y) / 2),
            Constraint::Percentage(percent_y),
            Constraint::Percentage((100 - percent_y) / 2),
        ])
        .split(r);

    Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100 - percent_x) / 2),
            Constraint::Percentage(percent_x),
            Constraint::Percentage((100 - percent_x) / 2),
        ])
        .split(popup_layout[1])[1]
}
