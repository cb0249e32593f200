//! Diagnostic logging.
//!
//! Logs go to stderr so stdout carries only command output. `RUST_LOG`
//! wins over the verbosity flag when set.

use clap::ValueEnum;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

fn default_directive(verbose: bool) -> &'static str {
    if verbose { "anvil=debug,info" } else { "info" }
}

/// Install the global subscriber. Safe to call more than once.
pub fn init(verbose: bool, format: LogFormat) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(verbose)));

    let registry = tracing_subscriber::registry().with(filter);
    let result = match format {
        LogFormat::Text => registry
            .with(fmt::layer().with_writer(std::io::stderr).compact())
            .try_init(),
        LogFormat::Json => registry
            .with(
                fmt::layer()
                    .with_writer(std::io::stderr)
                    .json()
                    .with_current_span(false),
            )
            .try_init(),
    };
    // Already installed, e.g. by a test harness
    let _ = result;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verbose_raises_crate_level() {
        assert_eq!(default_directive(false), "info");
        assert!(default_directive(true).starts_with("anvil=debug"));
    }

    #[test]
    fn test_init_twice_does_not_panic() {
        init(false, LogFormat::Text);
        init(true, LogFormat::Json);
    }
}
