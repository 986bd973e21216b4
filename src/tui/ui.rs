//! Defines the Terminal User Interface (TUI) for GeOFF

use eyre::Result;
use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout},
    Frame, Terminal,
};
use std::{
    io::stdout,
    time::{Duration, Instant},
};
use tokio::sync::mpsc::UnboundedReceiver;

use super::{
    inputs::{events::Events, InputEvent},
    state::RunMonitor,
    App, AppReturn,
};

use crate::jobs::signals::JobEvent;
use crate::jobs::SharedJob;
use crate::settings::Settings;
use crate::tui::components::*;

/// Show the progress of `job` until it finishes or the user quits.
///
/// Quitting cancels the job first. The job may still be winding down when
/// this returns; see [`wait_for_finish`].
pub fn start_ui<J>(
    mut rx: UnboundedReceiver<JobEvent>,
    job: &SharedJob<J>,
    settings: &Settings,
) -> Result<(RunMonitor, UnboundedReceiver<JobEvent>)> {
    let stdout = stdout();
    crossterm::terminal::enable_raw_mode()?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;
    let mut app = App::new();

    terminal.clear()?;

    let tick_rate = Duration::from_millis(200);
    let mut events = Events::new(tick_rate);

    let start_time = Instant::now();
    let mut elapsed_time = Duration::from_secs(0);

    loop {
        while let Ok(event) = rx.try_recv() {
            app.monitor_mut().apply(event);
        }

        if !app.monitor().is_finished() {
            elapsed_time = start_time.elapsed();
        }

        terminal.draw(|rect| draw(rect, &app, elapsed_time, settings))?;

        let result = match events.next() {
            Some(InputEvent::Input(key)) => app.do_action(key),
            None => {
                std::thread::sleep(tick_rate / 4);
                AppReturn::Continue
            }
        };
        match result {
            AppReturn::Exit => {
                if !app.monitor().is_finished() {
                    job.cancel();
                }
                break;
            }
            AppReturn::Stop => job.cancel(),
            AppReturn::Continue => {}
        }
    }

    terminal.clear()?;
    terminal.show_cursor()?;
    crossterm::terminal::disable_raw_mode()?;
    Ok((app.into_monitor(), rx))
}

/// Block until the terminal event of the run arrives.
pub fn wait_for_finish(rx: &mut UnboundedReceiver<JobEvent>, monitor: &mut RunMonitor) {
    while !monitor.is_finished() {
        match rx.blocking_recv() {
            Some(event) => {
                monitor.apply(event);
            }
            None => {
                tracing::warn!("Job event bus closed before the run finished");
                break;
            }
        }
    }
}

pub fn draw(rect: &mut Frame, app: &App, elapsed_time: Duration, settings: &Settings) {
    let size = rect.size();

    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints(
            [
                Constraint::Length(3),
                Constraint::Length(8),
                Constraint::Min(5),
            ]
            .as_ref(),
        )
        .split(size);

    rect.render_widget(draw_title(settings), chunks[0]);

    let body_layout = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(70), Constraint::Percentage(30)].as_ref())
        .split(chunks[1]);

    rect.render_widget(draw_status(app, elapsed_time), body_layout[0]);
    rect.render_widget(draw_commands(), body_layout[1]);

    let tab_layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(3), Constraint::Min(2)].as_ref())
        .split(chunks[2]);

    rect.render_widget(draw_tabs(app), tab_layout[0]);

    let monitor = app.monitor();
    match app.tab_index {
        0 => {
            let inner_height = tab_layout[1].height.saturating_sub(2);
            rect.render_widget(draw_logs(&monitor.logs, inner_height), tab_layout[1]);
        }
        _ => {
            let data = monitor.objective_points();
            rect.render_widget(draw_plot(&data, monitor.objective_name()), tab_layout[1]);
        }
    };
}
