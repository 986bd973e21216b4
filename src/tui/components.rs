use std::time::Duration;

/// Widgets the TUI is assembled from
use ratatui::{
    layout::{Alignment, Constraint},
    style::{Color, Modifier, Style},
    symbols,
    text::{Line, Span},
    widgets::{
        Axis, Block, BorderType, Borders, Cell, Chart, Dataset, GraphType, Paragraph, Row, Table,
        Tabs, Wrap,
    },
};

use super::{Action, App};

use crate::settings::Settings;

pub fn draw_title<'a>(settings: &Settings) -> Paragraph<'a> {
    Paragraph::new(format!(
        "{} {}: {}",
        settings.app.name, settings.app.version, settings.problem.id
    ))
    .style(Style::default().fg(Color::LightCyan))
    .alignment(Alignment::Center)
    .block(
        Block::default()
            .borders(Borders::ALL)
            .style(Style::default().fg(Color::White))
            .border_type(BorderType::Plain),
    )
}

pub fn draw_status<'a>(app: &App, elapsed_time: Duration) -> Table<'a> {
    let monitor = app.monitor();
    let objective_text = monitor
        .last_objective()
        .map(|value| format!("{value:.5}"))
        .unwrap_or_else(|| "-".to_string());
    let skeleton_text = monitor
        .skeleton_point
        .map(|point| format!("{point} ms"))
        .unwrap_or_else(|| "-".to_string());

    let data = vec![
        ("Status", monitor.status_text()),
        ("Steps", monitor.steps.to_string()),
        ("Episodes", monitor.episodes.to_string()),
        (monitor.objective_name(), objective_text),
        ("Skeleton point", skeleton_text),
        ("Elapsed time", format_time(elapsed_time)),
    ];

    let rows: Vec<Row> = data
        .into_iter()
        .map(|(key, value)| {
            let title_style = Style::default().add_modifier(Modifier::BOLD);
            let title_cell = Cell::from(Span::styled(format!("{}:", key), title_style));
            Row::new(vec![title_cell, Cell::from(value)])
        })
        .collect();

    Table::default()
        .rows(rows)
        .block(
            Block::default()
                .borders(Borders::ALL)
                .border_type(BorderType::Plain)
                .title(" Status "),
        )
        .widths([Constraint::Percentage(50), Constraint::Percentage(50)])
        .column_spacing(1)
}

pub fn draw_commands<'a>() -> Table<'a> {
    let key_style = Style::default().fg(Color::LightCyan);
    let help_style = Style::default().fg(Color::Gray);

    let rows: Vec<Row> = Action::all()
        .iter()
        .map(|action| {
            Row::new(vec![
                Cell::from(Span::styled(action.key().to_string(), key_style)),
                Cell::from(Span::styled(action.to_string(), help_style)),
            ])
        })
        .collect();

    Table::default()
        .rows(rows)
        .block(
            Block::default()
                .borders(Borders::ALL)
                .border_type(BorderType::Plain)
                .title(" Commands "),
        )
        .widths([Constraint::Percentage(30), Constraint::Percentage(70)])
        .column_spacing(1)
}

pub fn draw_plot<'a>(data: &'a [(f64, f64)], name: &str) -> Chart<'a> {
    let (x_min, x_max) = data
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(min, max), (x, _)| {
            (min.min(*x), max.max(*x))
        });

    let (y_min, y_max) = data
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(min, max), (_, y)| {
            (min.min(*y), max.max(*y))
        });
    let (x_min, x_max) = if data.is_empty() { (0.0, 1.0) } else { (x_min, x_max) };
    let (y_min, y_max) = if data.is_empty() { (0.0, 1.0) } else { (y_min, y_max) };

    let step_size = ((x_max - x_min) / 10.0).max(1.0).ceil();
    let x_labels: Vec<Span> = ((x_min as i64)..=(x_max as i64))
        .step_by(step_size as usize)
        .map(|x| Span::from(x.to_string()))
        .collect();

    let y_step = (y_max - y_min) / 3.0;
    let y_labels: Vec<Span> = (0..=3)
        .map(|i| Span::from(format!("{:.3}", y_min + y_step * (i as f64))))
        .collect();

    let dataset = vec![Dataset::default()
        .name(name.to_string())
        .marker(symbols::Marker::Dot)
        .style(Style::default().fg(Color::Cyan))
        .graph_type(GraphType::Line)
        .data(data)];

    Chart::new(dataset)
        .x_axis(
            Axis::default()
                .title("Step")
                .bounds([x_min, x_max])
                .labels(x_labels),
        )
        .y_axis(
            Axis::default()
                .title(name.to_string())
                .bounds([y_min, y_max])
                .labels(y_labels),
        )
        .block(Block::default().title(" Objective ").borders(Borders::ALL))
}

pub fn draw_logs(log_history: &[String], height: u16) -> Paragraph<'_> {
    let from_text = log_history.len().saturating_sub(height as usize);
    let show_text: Vec<Line> = log_history[from_text..]
        .iter()
        .map(|s| Line::from(s.as_str()))
        .collect();

    Paragraph::new(show_text)
        .block(Block::default().title(" Logs ").borders(Borders::ALL))
        .style(Style::default().fg(Color::White))
        .alignment(Alignment::Left)
        .wrap(Wrap { trim: true })
}

pub fn draw_tabs<'a>(app: &App) -> Tabs<'a> {
    Tabs::new(app.tab_titles.clone())
        .block(Block::default().borders(Borders::ALL))
        .style(Style::default().fg(Color::Cyan))
        .highlight_style(Style::default().fg(Color::Yellow))
        .divider(Span::raw("|"))
        .select(app.tab_index)
}

fn format_time(elapsed_time: Duration) -> String {
    let elapsed_seconds = elapsed_time.as_secs();
    let (elapsed, unit) = if elapsed_seconds < 60 {
        (elapsed_seconds, "s")
    } else if elapsed_seconds < 3600 {
        (elapsed_seconds / 60, "m")
    } else {
        (elapsed_seconds / 3600, "h")
    };
    format!("{}{}", elapsed, unit)
}
