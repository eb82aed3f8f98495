use ratatui::{
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Cell, List, ListItem, Paragraph, Row, Sparkline, Table},
    Frame,
};

use crate::tui::app::{App, RunState};

pub fn draw(f: &mut Frame, app: &App) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3), // Header
            Constraint::Length(3), // Stream info
            Constraint::Min(10),   // Main content
            Constraint::Length(5), // People sparkline
        ])
        .split(f.area());

    draw_header(f, app, chunks[0]);
    draw_stream_info(f, app, chunks[1]);
    draw_main_content(f, app, chunks[2]);
    draw_people_history(f, app, chunks[3]);
}

fn draw_header(f: &mut Frame, app: &App, area: Rect) {
    let (status, status_color) = match app.state {
        RunState::Running => ("RUNNING", Color::Cyan),
        RunState::Paused => ("PAUSED", Color::Yellow),
        RunState::Finished => ("FINISHED", Color::Green),
    };

    let header = Paragraph::new(Line::from(vec![
        Span::styled(
            format!(" Crowd Counting - {status} "),
            Style::default().fg(status_color).add_modifier(Modifier::BOLD),
        ),
        Span::raw(" | "),
        Span::styled("[Space/P]", Style::default().fg(Color::Yellow)),
        Span::raw("lay/pause "),
        Span::styled("[S]", Style::default().fg(Color::Red)),
        Span::raw("top "),
        Span::styled("[R]", Style::default().fg(Color::Cyan)),
        Span::raw("eport "),
        Span::styled("[Q]", Style::default().fg(Color::Red)),
        Span::raw("uit"),
    ]))
    .block(Block::default().borders(Borders::ALL));

    f.render_widget(header, area);
}

fn draw_stream_info(f: &mut Frame, app: &App, area: Rect) {
    let info = Paragraph::new(format!(
        "Source: {} | {}x{} | Frame: {}",
        app.source, app.width, app.height, app.frame_number
    ))
    .block(Block::default().borders(Borders::ALL).title("Stream"));
    f.render_widget(info, area);
}

fn draw_main_content(f: &mut Frame, app: &App, area: Rect) {
    let columns = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(40), Constraint::Percentage(60)])
        .split(area);

    let left = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(9), Constraint::Min(5)])
        .split(columns[0]);

    draw_results(f, app, left[0]);
    draw_parameters(f, app, left[1]);
    draw_event_log(f, app, columns[1]);
}

fn draw_results(f: &mut Frame, app: &App, area: Rect) {
    let mut lines = vec![
        Line::from(format!("  Current count: {}", app.people)),
        Line::from(format!("  Approx. FPS:   {:.1}", app.fps)),
    ];
    if let Some(counts) = app.counts {
        lines.push(Line::from(format!("  Entered:       {}", counts.entered)));
        lines.push(Line::from(format!("  Exited:        {}", counts.exited)));
        lines.push(Line::from(Span::styled(
            format!("  Inside:        {}", counts.inside()),
            Style::default().add_modifier(Modifier::BOLD),
        )));
    }
    if let Some(perf) = &app.perf {
        lines.push(Line::from(format!(
            "  Frame: {:.1} ms (inference {:.1} ms)",
            perf.total_ms, perf.inference_ms
        )));
    }

    let results = Paragraph::new(lines).block(Block::default().borders(Borders::ALL).title("Results"));
    f.render_widget(results, area);
}

fn draw_parameters(f: &mut Frame, app: &App, area: Rect) {
    let rows: Vec<Row> = app
        .parameters
        .iter()
        .map(|(name, value)| Row::new(vec![Cell::from(*name), Cell::from(value.as_str())]))
        .collect();

    let table = Table::new(rows, [Constraint::Length(16), Constraint::Min(10)])
        .block(Block::default().borders(Borders::ALL).title("Parameters"));
    f.render_widget(table, area);
}

fn draw_event_log(f: &mut Frame, app: &App, area: Rect) {
    // Newest first, as many as fit.
    let visible = area.height.saturating_sub(2) as usize;
    let items: Vec<ListItem> = app
        .log
        .iter()
        .rev()
        .take(visible)
        .map(|line| {
            let style = if line.starts_with("warning") {
                Style::default().fg(Color::Yellow)
            } else if line.contains("entered") {
                Style::default().fg(Color::Green)
            } else if line.contains("exited") {
                Style::default().fg(Color::Magenta)
            } else {
                Style::default()
            };
            ListItem::new(line.as_str()).style(style)
        })
        .collect();

    let title = match &app.report_path {
        Some(path) => format!("Events (report: {})", path.display()),
        None => "Events".to_string(),
    };
    let list = List::new(items).block(Block::default().borders(Borders::ALL).title(title));
    f.render_widget(list, area);
}

fn draw_people_history(f: &mut Frame, app: &App, area: Rect) {
    let data: Vec<u64> = app.people_history.iter().copied().collect();
    let sparkline = Sparkline::default()
        .block(
            Block::default()
                .borders(Borders::ALL)
                .title(format!("People per frame (peak {})", app.peak_people())),
        )
        .data(&data)
        .style(Style::default().fg(Color::Cyan));
    f.render_widget(sparkline, area);
}
