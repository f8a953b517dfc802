// src/logging.rs
//! Console and per-run file logging.

use chrono::Local;
use std::{
    fs,
    path::{Path, PathBuf},
};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

const DEFAULT_FILTER: &str = "info";

/// `log_file__YYYY_MM_DD__HH_MM_SS`
pub fn log_file_name() -> String {
    format!("log_file__{}", Local::now().format("%Y_%m_%d__%H_%M_%S"))
}

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

/// Console logging only.
pub fn init_console() {
    let _ = fmt::Subscriber::builder()
        .with_env_filter(env_filter())
        .with_target(false)
        .try_init();
}

/// Console logging plus a fresh file under `<log_dir>`. Keep the guard alive
/// until the run ends or buffered lines are lost.
pub fn init_with_file(log_dir: &Path) -> anyhow::Result<(WorkerGuard, PathBuf)> {
    fs::create_dir_all(log_dir)?;
    let file_name = log_file_name();
    let path = log_dir.join(&file_name);
    let appender = tracing_appender::rolling::never(log_dir, &file_name);
    let (writer, guard) = tracing_appender::non_blocking(appender);

    let console = fmt::layer().with_target(false).with_filter(env_filter());
    let file = fmt::layer()
        .with_ansi(false)
        .with_writer(writer)
        .with_filter(env_filter());
    tracing_subscriber::registry()
        .with(console)
        .with(file)
        .try_init()?;
    Ok((guard, path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use once_cell::sync::Lazy;
    use regex::Regex;

    static NAME: Lazy<Regex> =
        Lazy::new(|| Regex::new(r"^log_file__\d{4}_\d{2}_\d{2}__\d{2}_\d{2}_\d{2}$").unwrap());

    #[test]
    fn file_names_carry_the_start_time() {
        assert!(NAME.is_match(&log_file_name()), "{}", log_file_name());
    }
}
