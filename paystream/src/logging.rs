//! Logging setup for applications embedding the crate.

use anyhow::{Context, Result};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Install a global `tracing` subscriber.
///
/// `RUST_LOG` wins when set; otherwise logs at `info`, or `debug` when
/// `verbose`. Fails if a global subscriber is already installed.
pub fn init(verbose: bool) -> Result<()> {
    let filter = if verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .try_init()
        .context("Failed to install tracing subscriber")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_only_once() {
        assert!(init(true).is_ok());
        assert!(init(false).is_err());
    }
}
