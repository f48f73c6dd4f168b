//! Tracing helpers
// (c) 2024 Ross Younger

use std::{fs::File, sync::Arc};

use anyhow::Context;
use tracing_subscriber::{fmt, prelude::*, EnvFilter, Layer};

use crate::config::Environment;

const STANDARD_ENV_VAR: &str = "RUST_LOG";
const LOG_FILE_DETAIL_ENV_VAR: &str = "RUST_LOG_FILE_DETAIL";

/// Log file used in production when none was specified
pub const DEFAULT_LOG_FILE: &str = "sshpipe.log";

/// Result type for `filter_for()`
struct FilterResult {
    filter: EnvFilter,
    used_env: bool, // Did we use the environment variable we were requested to?
}

/// Log filter setup:
/// Use a given environment variable; if it wasn't present, log only sshpipe items at a given trace level.
fn filter_for(trace_level: &str, key: &str) -> anyhow::Result<FilterResult> {
    EnvFilter::try_from_env(key)
        .map(|filter| FilterResult {
            filter,
            used_env: true,
        })
        .or_else(|e| {
            // The env var was unset or invalid. Which is it?
            if std::env::var(key).is_ok() {
                anyhow::bail!("{key} (set in environment) was invalid: {e}");
            }
            // It was unset. Fall back.
            Ok(FilterResult {
                filter: EnvFilter::new(format!("sshpipe={trace_level}")),
                used_env: false,
            })
        })
}

/// Which log file, if any, to write for a given environment
#[must_use]
pub fn log_file_for(environment: Environment, requested: Option<&str>) -> Option<String> {
    match (environment, requested) {
        (_, Some(f)) => Some(f.to_string()),
        (Environment::Production, None) => Some(DEFAULT_LOG_FILE.to_string()),
        (Environment::Local, None) => None,
    }
}

/// Set up rust tracing, to stderr and optionally to file.
///
/// By default we log only our events (sshpipe), at a given trace level.
/// This can be overridden by setting `RUST_LOG`.
///
/// In the `local` environment console output is coloured; in `production` it is plain.
///
/// For examples, see <https://docs.rs/tracing-subscriber/0.3.18/tracing_subscriber/fmt/index.html#filtering-events-with-environment-variables>
///
/// **CAUTION:** If this function fails, tracing won't be set up; callers must take extra care to report the error.
pub fn setup(
    trace_level: &str,
    environment: Environment,
    filename: Option<&str>,
) -> anyhow::Result<()> {
    let mut layers = Vec::new();

    /////// Console output

    let filter = filter_for(trace_level, STANDARD_ENV_VAR)?;
    // If we used the environment variable, show log targets; if we did not, we're only logging sshpipe, so do not show targets.
    let format = fmt::layer()
        .compact()
        .with_target(filter.used_env)
        .with_ansi(environment == Environment::Local)
        .with_writer(std::io::stderr)
        .with_filter(filter.filter)
        .boxed();
    layers.push(format);

    //////// File output

    if let Some(filename) = log_file_for(environment, filename) {
        let out_file = Arc::new(
            File::options()
                .create(true)
                .append(true)
                .open(&filename)
                .with_context(|| format!("Failed to open log file {filename}"))?,
        );
        let filter = if std::env::var(LOG_FILE_DETAIL_ENV_VAR).is_ok() {
            FilterResult {
                filter: EnvFilter::try_from_env(LOG_FILE_DETAIL_ENV_VAR)?,
                used_env: true,
            }
        } else {
            filter_for(trace_level, STANDARD_ENV_VAR)?
        };
        let layer = tracing_subscriber::fmt::layer()
            .with_writer(out_file)
            // Same logic for if we used the environment variable.
            .with_target(filter.used_env)
            .compact()
            .with_ansi(false)
            .with_filter(filter.filter)
            .boxed();
        layers.push(layer);
    }

    ////////

    tracing_subscriber::registry().with(layers).init();

    Ok(())
}
