//! Tracing setup.
//!
//! Console output goes through the usual `fmt` layer, filtered by
//! `RUST_LOG` (default `megbids=info`).  When a log directory is given every
//! info-or-worse event is also appended to `<dir>/log.tsv` as one line:
//!
//! ```text
//! [INFO]	2024-01-31 14:02:11	/raw/NatMEG_0123/240131/meg/rest_raw.fif -> /bids/sub-0123/...
//! ```
use std::fmt;
use std::path::Path;

use anyhow::{Context, Result};
use tracing::{Event, Level, Subscriber};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::{FmtContext, FormatEvent, FormatFields};
use tracing_subscriber::prelude::*;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::EnvFilter;

pub const LOG_FILE: &str = "log.tsv";
const DEFAULT_FILTER: &str = "megbids=info";

/// `[LEVEL]\t<local time>\t<message>` per event.
#[derive(Debug, Clone, Copy, Default)]
pub struct TsvFormat;

fn level_name(level: &Level) -> &'static str {
    match *level {
        Level::ERROR => "ERROR",
        Level::WARN => "WARNING",
        Level::INFO => "INFO",
        Level::DEBUG => "DEBUG",
        Level::TRACE => "TRACE",
    }
}

impl<S, N> FormatEvent<S, N> for TsvFormat
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(&self, ctx: &FmtContext<'_, S, N>, mut writer: Writer<'_>, event: &Event<'_>) -> fmt::Result {
        let ts = chrono::Local::now().format("%Y-%m-%d %H:%M:%S");
        write!(writer, "[{}]\t{}\t", level_name(event.metadata().level()), ts)?;
        ctx.field_format().format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}

/// Install the global subscriber.  Keep the returned guard alive until exit
/// or buffered file lines are lost.
pub fn init(log_dir: Option<&Path>) -> Result<Option<WorkerGuard>> {
    let console_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| DEFAULT_FILTER.into());
    let console = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_filter(console_filter);

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
            let appender = tracing_appender::rolling::never(dir, LOG_FILE);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .event_format(TsvFormat)
                .with_filter(LevelFilter::INFO);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(console)
        .with(file_layer)
        .try_init()
        .context("installing tracing subscriber")?;
    Ok(guard)
}
