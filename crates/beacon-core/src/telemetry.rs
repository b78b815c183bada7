//! Tracing initialisation for the `beacon` binary.
//!
//! Logs always go to stderr: stdout carries the JSON response read by the
//! orchestrator.
//!
//! Safe to call more than once. Only the first call takes effect because the
//! global subscriber can be set once per process.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::LogLevel;

/// Filter directives overriding `source.log_level`.
pub const LOG_ENV: &str = "BEACON_LOG";

/// Set to `json` for newline-delimited JSON records.
pub const LOG_FORMAT_ENV: &str = "BEACON_LOG_FORMAT";

/// Whether `BEACON_LOG_FORMAT` asks for JSON output.
pub fn json_requested() -> bool {
    std::env::var(LOG_FORMAT_ENV).is_ok_and(|v| v.eq_ignore_ascii_case("json"))
}

/// Initialise the global tracing subscriber.
///
/// * `json`: emit newline-delimited JSON records.
/// * `level`: verbosity when `BEACON_LOG` is not set.
pub fn init_tracing(json: bool, level: LogLevel) {
    let env_filter =
        EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(level.as_filter()));

    if json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_writer(std::io::stderr)
                    .json(),
            )
            .try_init()
            .ok();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_ansi(false)
                    .with_writer(std::io::stderr),
            )
            .try_init()
            .ok();
    }
}

