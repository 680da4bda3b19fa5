#![forbid(unsafe_code)]

//! Production log output.
//!
//! The library only emits `tracing` events; hosts pick the subscriber. With
//! the `tracing-json` feature, [`install_json_subscriber`] sets up one JSON
//! object per line filtered by `RUST_LOG` (default `info`).

/// Default filter when `RUST_LOG` is unset or invalid.
pub const DEFAULT_FILTER: &str = "info";

/// Failed to install the global subscriber.
#[derive(Debug)]
pub struct LoggingError(String);

impl std::fmt::Display for LoggingError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "failed to install tracing subscriber: {}", self.0)
    }
}

impl std::error::Error for LoggingError {}

/// Install a global JSON subscriber.
///
/// Fails if another global subscriber is already set.
#[cfg(feature = "tracing-json")]
pub fn install_json_subscriber() -> Result<(), LoggingError> {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    tracing_subscriber::fmt()
        .json()
        .with_env_filter(filter)
        .with_current_span(true)
        .try_init()
        .map_err(|e| LoggingError(e.to_string()))
}

#[cfg(all(test, feature = "tracing-json"))]
mod tests {
    use super::*;

    #[test]
    fn second_install_fails() {
        // The first call may lose to another test's subscriber; either way the
        // second one cannot succeed.
        let _ = install_json_subscriber();
        let err = install_json_subscriber().unwrap_err();
        assert!(err.to_string().starts_with("failed to install tracing subscriber"));
    }
}
