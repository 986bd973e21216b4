use crate::jobs::signals::JobEvent;
use crate::settings::Settings;
use std::io::{self, Write};
use tokio::sync::mpsc::UnboundedSender;
use tracing_subscriber::fmt::time::FormatTime;
use tracing_subscriber::fmt::{self};
use tracing_subscriber::prelude::__tracing_subscriber_SubscriberExt;
use tracing_subscriber::registry::Registry;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Setup logging for GeOFF
///
/// The log level is taken from the configuration and defaults to `info`.
/// If `log_out` is set, messages are also written to that file.
///
/// With the TUI enabled, messages are sent to it over `ui_tx` as
/// [`JobEvent::LogMessage`] instead of being printed to stdout.
pub fn setup_log(settings: &Settings, ui_tx: Option<UnboundedSender<JobEvent>>) -> eyre::Result<()> {
    let log_level = settings.config.log_level.to_lowercase();
    let env_filter = EnvFilter::try_new(&log_level)?;

    let subscriber = Registry::default().with(env_filter);

    // Define a layer for the log file
    let file_layer = match &settings.config.log_out {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(path)?;
            let layer = fmt::layer()
                .with_writer(file)
                .with_ansi(false)
                .with_timer(CompactTimestamp);
            Some(layer)
        }
        None => None,
    };

    // Define layer for stdout
    let stdout_layer = if !settings.config.tui {
        let layer = fmt::layer()
            .with_writer(std::io::stdout)
            .with_ansi(true)
            .with_target(false)
            .with_timer(CompactTimestamp);
        Some(layer)
    } else {
        None
    };

    // Define layer for TUI
    let tui_layer = match ui_tx {
        Some(ui_tx) if settings.config.tui => {
            let layer = fmt::layer()
                .with_writer(move || TuiWriter {
                    ui_tx: ui_tx.clone(),
                })
                .with_ansi(false)
                .with_target(false)
                .with_timer(CompactTimestamp);
            Some(layer)
        }
        _ => None,
    };

    subscriber
        .with(file_layer)
        .with(stdout_layer)
        .with(tui_layer)
        .try_init()?;
    tracing::debug!("Logging is configured with level: {}", log_level);
    Ok(())
}

#[derive(Clone)]
struct CompactTimestamp;

impl FormatTime for CompactTimestamp {
    fn format_time(
        &self,
        w: &mut tracing_subscriber::fmt::format::Writer<'_>,
    ) -> Result<(), std::fmt::Error> {
        write!(w, "{}", chrono::Local::now().format("%H:%M:%S"))
    }
}

struct TuiWriter {
    ui_tx: UnboundedSender<JobEvent>,
}

impl Write for TuiWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let msg = String::from_utf8_lossy(buf);
        self.ui_tx
            .send(JobEvent::LogMessage(msg.trim_end().to_string()))
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "Failed to send log message"))?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
