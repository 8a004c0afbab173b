//! Logging setup for `taskforge` using `tracing` + `tracing-subscriber`.
//!
//! Priority for determining the log level:
//! 1. explicit `level` argument (if provided)
//! 2. `TASKFORGE_LOG` environment variable (e.g. "info", "debug")
//! 3. default to `info`
//!
//! Logs are sent to STDERR so that a `ProcessTask`'s own stdout can be
//! consumed purely as task output by the embedding host.

use std::sync::Once;

use tracing_subscriber::fmt;

static INIT: Once = Once::new();

/// Initialize the global logging subscriber.
///
/// Safe to call more than once: only the first call has any effect, so a
/// library caller that already installed its own subscriber is never
/// clobbered by a second call from a test or the demo binary.
pub fn init_logging(level: Option<tracing::Level>) {
    INIT.call_once(|| {
        let level = level.unwrap_or_else(|| {
            std::env::var("TASKFORGE_LOG")
                .ok()
                .and_then(|s| parse_level_str(&s))
                .unwrap_or(tracing::Level::INFO)
        });

        fmt()
            .with_max_level(level)
            .with_target(true)
            .with_thread_ids(true)
            .with_thread_names(true)
            .with_writer(std::io::stderr)
            .init();
    });
}

fn parse_level_str(s: &str) -> Option<tracing::Level> {
    match s.trim().to_lowercase().as_str() {
        "error" => Some(tracing::Level::ERROR),
        "warn" | "warning" => Some(tracing::Level::WARN),
        "info" => Some(tracing::Level::INFO),
        "debug" => Some(tracing::Level::DEBUG),
        "trace" => Some(tracing::Level::TRACE),
        _ => None,
    }
}
