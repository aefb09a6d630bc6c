//! Tracing subscriber setup for agent processes.

use std::{fs::File, path::Path};

use anyhow::Context;
use time::{format_description::parse, OffsetDateTime, UtcOffset};
use tracing::subscriber::set_global_default;
use tracing_subscriber::{
    fmt::{time::OffsetTime, writer::BoxMakeWriter},
    EnvFilter, FmtSubscriber,
};

/// Installs the global subscriber of an agent process.
///
/// Logs go to stdout, or to a new file in `log_dir` named after the agent
/// and the current time. The level comes from `RUST_LOG`, `info` if unset.
pub fn init_logger(agent_name: &str, log_dir: Option<&Path>) -> anyhow::Result<()> {
    // Local offset detection fails in multi-threaded processes on some platforms.
    let local_offset = UtcOffset::current_local_offset().unwrap_or(UtcOffset::UTC);
    let timer = OffsetTime::new(
        local_offset,
        parse("[year]-[month]-[day] [hour]:[minute]:[second].[subsecond digits:3]")?,
    );
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let (writer, ansi) = match log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("failed to create {}", dir.display()))?;
            let path = dir.join(log_file_name(agent_name)?);
            let file = File::create(&path)
                .with_context(|| format!("failed to create {}", path.display()))?;
            (BoxMakeWriter::new(file), false)
        }
        None => (BoxMakeWriter::new(std::io::stdout), true),
    };

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_ansi(ansi)
        .with_timer(timer)
        .with_writer(writer)
        .finish();

    set_global_default(subscriber)
        .context("could not set the global tracing subscriber, one is already installed")
}

fn log_file_name(agent_name: &str) -> anyhow::Result<String> {
    let format = parse("[year]-[month]-[day]_[hour]:[minute]:[second]_log.txt")?;
    let now = OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc());
    Ok(format!("{agent_name}_{}", now.format(&format)?))
}
