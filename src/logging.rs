use thiserror::Error;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("a global tracing subscriber is already installed: {0}")]
    AlreadyInitialized(String),
}

/// The filter used when `RUST_LOG` is not set.
pub fn default_directives(debug: bool) -> String {
    if debug {
        "warn,friendlychat=debug".to_string()
    } else {
        "warn,reqwest=warn".to_string()
    }
}

/// Installs the fmt subscriber. `debug` turns on the crate's diagnostic output;
/// `RUST_LOG` still overrides either level.
pub fn init(debug: bool) -> Result<(), LoggingError> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives(debug)));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_level(true)
        .try_init()
        .map_err(|e| LoggingError::AlreadyInitialized(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_directives() {
        assert!(default_directives(true).contains("friendlychat=debug"));
        assert!(!default_directives(false).contains("debug"));
        assert!(EnvFilter::try_new(default_directives(true)).is_ok());
        assert!(EnvFilter::try_new(default_directives(false)).is_ok());
    }

    #[test]
    fn test_second_init_is_reported() {
        let _ = init(false);
        assert!(matches!(init(true), Err(LoggingError::AlreadyInitialized(_))));
    }
}
