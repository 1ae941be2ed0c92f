//! Logging setup using `tracing` + `tracing-subscriber`.
//!
//! The filter comes from `--log-level`, which falls back to the
//! `JOBSERVER_LOG` environment variable and then to `info`.

use tracing_subscriber::{fmt, EnvFilter};

/// Install the global subscriber. Call once at startup.
pub fn init_logging(filter: &str) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let filter = EnvFilter::try_new(filter)?;
    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()?;
    Ok(())
}
