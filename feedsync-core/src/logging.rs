// feedsync-core/src/logging.rs

use anyhow::{anyhow, Context, Result};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::LoggingSettings;

/// Install the global subscriber. `RUST_LOG` wins over `logging.level`.
///
/// Returns an error if a subscriber is already installed.
pub fn init_tracing(settings: &LoggingSettings) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&settings.level))
        .with_context(|| format!("invalid log filter '{}'", settings.level))?;

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true).with_ansi(settings.ansi))
        .try_init()
        .map_err(|e| anyhow!("failed to install tracing subscriber: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_init_is_rejected() {
        let settings = LoggingSettings {
            level: "debug".to_string(),
            ansi: false,
        };
        // Another test may have installed a subscriber first; either way the
        // second call must fail.
        let _ = init_tracing(&settings);
        assert!(init_tracing(&settings).is_err());
    }
}
