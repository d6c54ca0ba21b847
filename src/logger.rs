use std::fs;

use anyhow::Context;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use interviewer_core::config::paths;

/// Initialize structured logging.
///
/// - File output: `{data_dir}/logs/interviewer.*.log`, daily rotation, last 5 kept.
/// - Console output on stderr. stdout carries IPC events only.
/// - `RUST_LOG` overrides the default filter.
pub fn init() -> anyhow::Result<()> {
    let log_dir = paths::get_log_dir();
    let _ = fs::create_dir_all(&log_dir);

    let file_appender = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix("interviewer")
        .filename_suffix("log")
        .max_log_files(5)
        .build(&log_dir)
        .context("Failed to create log file appender")?;

    let file_layer = fmt::layer()
        .with_writer(file_appender)
        .with_ansi(false)
        .with_target(true)
        .with_file(true)
        .with_line_number(true);

    let console_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_ansi(true)
        .with_target(true)
        .compact();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("info,reqwest=warn,hyper=warn,mio=warn,tungstenite=warn,symphonia=warn")
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(file_layer)
        .with(console_layer)
        .try_init()
        .context("Logger already initialized")?;

    tracing::info!(log_dir = %log_dir.display(), "Logger initialized");
    Ok(())
}
