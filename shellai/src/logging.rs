//! Diagnostic tracing for the agent.
//!
//! Tracing goes to stderr and is separate from operator output, which is
//! written through [`crate::io::console::Console`]. `RUST_LOG` wins over the
//! `-v` count when set.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Default filter for a `-v` count.
pub fn default_directive(verbosity: u8) -> &'static str {
    match verbosity {
        0 => "warn",
        1 => "shellai=info",
        2 => "shellai=debug",
        _ => "shellai=trace",
    }
}

/// Initialize the tracing subscriber.
///
/// # Example
/// ```bash
/// RUST_LOG=shellai=debug shellai ask -m "free disk space"
/// ```
pub fn init(verbosity: u8) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(verbosity)));

    // A second init (tests) keeps the first subscriber.
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verbosity_raises_level() {
        assert_eq!(default_directive(0), "warn");
        assert_eq!(default_directive(2), "shellai=debug");
        assert_eq!(default_directive(9), "shellai=trace");
    }
}
