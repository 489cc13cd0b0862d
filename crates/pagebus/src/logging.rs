//! Logging system setup and configuration
//!
//! Initializes the tracing-based logging used by the host and the page
//! event system.

use anyhow::{anyhow, Result};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::LoggingSettings;

/// Initialize the logging system
///
/// `RUST_LOG` overrides the configured level when set (e.g.
/// `page_event_system=debug`).
pub fn setup_logging(settings: &LoggingSettings) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(settings.level.as_str()));

    let registry = tracing_subscriber::registry().with(filter);
    let result = if settings.json_format {
        registry
            .with(fmt::layer().json().with_target(false))
            .try_init()
    } else {
        registry.with(fmt::layer().with_target(false)).try_init()
    };

    result.map_err(|e| anyhow!("Failed to initialize logging: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_logging_setup() {
        let settings = LoggingSettings {
            level: "debug".to_string(),
            json_format: false,
        };

        // Only one global subscriber per process; the second install fails.
        setup_logging(&settings).unwrap();
        assert!(setup_logging(&settings).is_err());
    }
}
