use ratatui::{
    Frame,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Cell, Paragraph, Row, Table, Wrap},
};

use delver_core::platform::hotkey::STOP_CHORD;
use delver_core::supervisor::{lock_board, StatusBoard};
use delver_core::types::{BotSnapshot, RunState};

use crate::App;

pub fn draw(f: &mut Frame, app: &App) {
    let chunks = if app.log_visible {
        Layout::default()
            .direction(Direction::Horizontal)
            .constraints([Constraint::Percentage(55), Constraint::Percentage(45)])
            .split(f.area())
    } else {
        Layout::default()
            .constraints([Constraint::Percentage(100)])
            .split(f.area())
    };

    {
        let board = lock_board(&app.board);
        draw_status(f, chunks[0], &board);
    } // board lock dropped here

    if app.log_visible && chunks.len() > 1 {
        draw_logs(f, chunks[1], app);
    }
    if let Some(dialog) = &app.confirm {
        dialog.render(f);
    }
}

fn draw_status(f: &mut Frame, area: Rect, board: &StatusBoard) {
    let (banner_label, banner_bg) = match board.run_state {
        RunState::Running => ("RUNNING (Press S to stop)", Color::Green),
        RunState::Stopping => ("STOPPING...", Color::Yellow),
        RunState::Stopped => ("STOPPED (Press S to start)", Color::Red),
    };
    let strategies = board.snapshot.as_ref().map_or(0, |s| s.strategies.len()) as u16;

    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(1), Constraint::Min(12), Constraint::Length(strategies + 3)])
        .split(area);

    // Full-width centered banner
    let banner_width = rows[0].width as usize;
    let pad_total = banner_width.saturating_sub(banner_label.len());
    let pad_left = pad_total / 2;
    let centered = format!("{}{}{}", " ".repeat(pad_left), banner_label, " ".repeat(pad_total - pad_left));
    let banner = Paragraph::new(Line::from(Span::styled(
        centered,
        Style::default().fg(Color::Black).bg(banner_bg).add_modifier(Modifier::BOLD),
    )));
    f.render_widget(banner, rows[0]);

    let key = |k: &'static str| Span::styled(k, Style::default().fg(Color::Yellow));
    let mut lines = vec![
        Line::from(vec![
            Span::raw(" "),
            key("s"),
            Span::raw(" start/stop  "),
            key("c"),
            Span::raw(" calibrate  "),
            key("w"),
            Span::raw(" save calibration  "),
            key("l"),
            Span::raw(" logs  "),
            key("q"),
            Span::raw(" quit"),
        ]),
        Line::from(Span::styled(format!(" emergency stop: {}", STOP_CHORD), Style::default().fg(Color::DarkGray))),
        Line::from(""),
    ];

    match &board.snapshot {
        Some(snap) if board.run_state == RunState::Running => lines.extend(snapshot_lines(snap)),
        _ => lines.push(field("window", format!("/{}/ (not running)", board.window_pattern), Color::DarkGray)),
    }
    if let Some(cal) = &board.unsaved_calibration {
        lines.push(Line::from(""));
        lines.push(Line::from(vec![
            Span::styled(format!(" calibration #{} ", cal.generation), Style::default().fg(Color::Magenta)),
            Span::raw(cal.to_string()),
            Span::styled("  (w to save)", Style::default().fg(Color::DarkGray)),
        ]));
    }

    let status = Paragraph::new(lines)
        .block(
            Block::default()
                .borders(Borders::LEFT | Borders::RIGHT | Borders::BOTTOM)
                .border_style(Style::default().fg(Color::Cyan)),
        )
        .wrap(Wrap { trim: false });
    f.render_widget(status, rows[1]);

    if let Some(snap) = &board.snapshot {
        draw_strategies(f, rows[2], snap);
    }
}

fn field(label: &str, value: String, color: Color) -> Line<'static> {
    Line::from(vec![
        Span::styled(format!(" {:<10}", label), Style::default().fg(Color::DarkGray)),
        Span::styled(value, Style::default().fg(color)),
    ])
}

/// A vital reading, or a marker that no bar was measured.
fn vital(pct: Option<u8>) -> (String, Color) {
    match pct {
        Some(p) if p < 35 => (format!("{}%", p), Color::Red),
        Some(p) => (format!("{}%", p), Color::White),
        None => ("? (uncalibrated)".into(), Color::DarkGray),
    }
}

fn snapshot_lines(snap: &BotSnapshot) -> Vec<Line<'static>> {
    let (hp, hp_color) = vital(snap.health_pct);
    let (mp, mp_color) = vital(snap.mana_pct);
    let combat = match snap.target_lock_remaining {
        Some(left) => format!("locked ({:.0}s left)", left.as_secs_f32()),
        None if snap.in_combat => "fighting".into(),
        None => "idle".into(),
    };
    let seen = if snap.degraded {
        "degraded frame".to_string()
    } else {
        format!("{} enemies, {} players", snap.enemies, snap.players)
    };
    let position = snap.position.map_or("-".to_string(), |(x, y)| format!("({}, {})", x, y));
    let heading = snap.heading.map_or("-", |d| d.name());
    let last = snap
        .last_action
        .as_ref()
        .map_or("-".to_string(), |(cat, desc)| format!("{}: {}", cat.name(), desc));

    vec![
        field("window", snap.window_title.clone().unwrap_or_else(|| "searching...".into()), Color::Yellow),
        field("health", hp, hp_color),
        field("mana", mp, mp_color),
        field("combat", combat, if snap.in_combat { Color::LightRed } else { Color::White }),
        field("vision", seen, if snap.degraded { Color::Yellow } else { Color::White }),
        field("position", position, Color::White),
        field("movement", format!("{} {}", heading, snap.stuck_phase), Color::White),
        field("kills", snap.kills.to_string(), Color::White),
        field("last", last, Color::Cyan),
    ]
}

fn draw_strategies(f: &mut Frame, area: Rect, snap: &BotSnapshot) {
    let header = Row::new(["strategy", "ok/tries", "blank", "rate", "latency"])
        .style(Style::default().fg(Color::DarkGray).add_modifier(Modifier::BOLD));
    let rows: Vec<Row> = snap
        .strategies
        .iter()
        .map(|r| {
            let name_style = if r.sticky {
                Style::default().fg(Color::Green).add_modifier(Modifier::BOLD)
            } else {
                Style::default().fg(Color::White)
            };
            Row::new(vec![
                Cell::from(format!("{}{}", if r.sticky { "* " } else { "  " }, r.name)).style(name_style),
                Cell::from(format!("{}/{}", r.stats.successes, r.stats.attempts)),
                Cell::from(r.stats.degraded.to_string()),
                Cell::from(format!("{:.0}%", r.stats.success_rate() * 100.0)),
                Cell::from(format!("{:.1}ms", r.stats.avg_latency_ms)),
            ])
        })
        .collect();
    let widths = [
        Constraint::Min(22),
        Constraint::Length(10),
        Constraint::Length(6),
        Constraint::Length(6),
        Constraint::Length(9),
    ];
    let table = Table::new(rows, widths).header(header).block(
        Block::default()
            .borders(Borders::ALL)
            .title(" Capture ")
            .border_style(Style::default().fg(Color::Cyan)),
    );
    f.render_widget(table, area);
}

fn draw_logs(f: &mut Frame, area: Rect, app: &App) {
    let visible_height = area.height.saturating_sub(2) as usize;
    let total = app.log_messages.len();
    let max_scroll = total.saturating_sub(visible_height);
    let scroll = app.log_scroll.min(max_scroll);
    let start = total.saturating_sub(visible_height + scroll);
    let end = total.saturating_sub(scroll);
    let log_lines: Vec<Line> = app.log_messages[start..end].iter().map(|m| parse_log_line(m)).collect();

    let title = if scroll > 0 { format!(" Logs (+{}) ", scroll) } else { " Logs ".to_string() };
    let log_panel = Paragraph::new(log_lines)
        .block(
            Block::default()
                .borders(Borders::ALL)
                .title(title)
                .border_style(Style::default().fg(Color::Yellow)),
        )
        .wrap(Wrap { trim: false });
    f.render_widget(log_panel, area);
}

/// Parse a structured log line (level\x1fprefix\x1fcolor\x1ftimestamp\x1fmessage)
/// into a colored Line for TUI rendering.
fn parse_log_line(raw: &str) -> Line<'_> {
    let parts: Vec<&str> = raw.splitn(5, '\x1f').collect();
    if parts.len() < 5 {
        // Fallback for unstructured messages
        return Line::from(raw);
    }

    let level = parts[0];
    let prefix = parts[1];
    let color_idx: u8 = parts[2].parse().unwrap_or(0);
    let timestamp = parts[3];
    let message = parts[4];

    let line_color = match color_idx {
        1 => Color::DarkGray,  // COLOR_GRAY
        2 => Color::LightBlue, // COLOR_BLUE
        3 => Color::Green,     // COLOR_GREEN
        4 => Color::Magenta,   // COLOR_MAGENTA
        _ => Color::White,
    };

    let mut spans = vec![
        Span::styled(timestamp, Style::default().fg(Color::DarkGray)),
        Span::raw(" "),
    ];
    match level {
        "ERROR" => spans.push(Span::styled("error ", Style::default().fg(Color::Red))),
        "WARN" => spans.push(Span::styled("warn ", Style::default().fg(Color::Yellow))),
        _ => {}
    }
    if !prefix.is_empty() {
        spans.push(Span::styled(prefix, Style::default().fg(line_color).add_modifier(Modifier::BOLD)));
        spans.push(Span::raw(" "));
    }
    spans.push(Span::styled(message, Style::default().fg(line_color)));

    Line::from(spans)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn structured_log_lines_are_split() {
        let line = parse_log_line("WARN\x1fcapture\x1f1\x1f12:00:01\x1fsticky strategy failed");
        let text: String = line.spans.iter().map(|s| s.content.as_ref()).collect();
        assert_eq!(text, "12:00:01 warn capture sticky strategy failed");
        assert_eq!(parse_log_line("plain").spans.len(), 1);
    }
}
