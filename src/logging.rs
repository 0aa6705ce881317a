//! Diagnostic logging setup
//!
//! Logs go to stderr so stdout carries nothing but the JSON result.

use tracing_subscriber::EnvFilter;

/// Filter used when `RUST_LOG` is unset
pub fn default_filter(verbose: bool) -> &'static str {
    if verbose {
        "codeforce=debug,warn"
    } else {
        "codeforce=warn,error"
    }
}

/// Installs the global subscriber; `RUST_LOG` takes precedence over `verbose`
pub fn init_logging(verbose: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter(verbose)));

    // A second initialization (e.g. from tests) is harmless
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}
