//! Logging initialization

use tracing_subscriber::EnvFilter;

/// Initialize the tracing subscriber from verbosity flags
///
/// `RUST_LOG` takes precedence when set; `quiet` wins over `-v`.
pub fn init(verbosity: u8, quiet: bool) {
    let level = if quiet {
        "warn"
    } else {
        match verbosity {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
