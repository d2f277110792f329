//! Tracing subscriber setup

use seedvault_core::{Error, Result};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Install a global subscriber for unlock logging.
///
/// `json` selects structured output with thread ids and source locations;
/// otherwise plain text filtered by `RUST_LOG` (default `info`). Fails if a
/// global subscriber is already installed.
pub fn init_unlock_logging(json: bool) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let installed = if json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true)
            .json()
            .try_init()
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).try_init()
    };
    installed.map_err(|e| Error::Config(format!("Logging already initialized: {}", e)))?;

    info!(json, "Unlock logging initialized");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_init_fails() {
        // Either this call installs the subscriber or another test already did.
        let _ = init_unlock_logging(false);
        assert!(matches!(init_unlock_logging(true), Err(Error::Config(_))));
    }
}
