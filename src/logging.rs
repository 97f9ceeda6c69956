//! Diagnostic tracing for the `stepgate` binary.
//!
//! - **Tracing (this module)**: developer diagnostics via `RUST_LOG`, written to
//!   stderr. Never persisted.
//! - **Decision trail (`audit`)**: the product record in `audit/<task>.jsonl`. Always
//!   written, unaffected by `RUST_LOG`.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Filter used when `RUST_LOG` is unset.
pub fn default_directive(verbose: bool) -> &'static str {
    if verbose { "warn,stepgate=debug" } else { "warn" }
}

/// Initialize the tracing subscriber.
///
/// Reads `RUST_LOG`; falls back to [`default_directive`]. Output: stderr, compact.
///
/// ```bash
/// RUST_LOG=stepgate=info stepgate next <task>
/// ```
pub fn init(verbose: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(verbose)));

    // A second init (tests, embedding) keeps the first subscriber.
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verbose_enables_crate_debug() {
        assert_eq!(default_directive(false), "warn");
        assert!(default_directive(true).contains("stepgate=debug"));
    }

    #[test]
    fn test_init_twice_is_harmless() {
        init(false);
        init(true);
    }
}
