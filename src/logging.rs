//! Diagnostic tracing for the orchestrator.
//!
//! Library code logs through `tracing` macros; the binary installs the
//! subscriber once at startup. Output goes to stderr so it interleaves with
//! the phase spinner rather than with captured results on stdout.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize the tracing subscriber.
///
/// Reads `RUST_LOG` when set. Otherwise defaults to `warn`, or to
/// `anvil=debug` when `verbose` is requested.
///
/// # Example
/// ```bash
/// RUST_LOG=anvil::permissions=debug anvil run plans/12.yml
/// ```
pub fn init(verbose: bool) {
    let default_directive = if verbose { "anvil=debug,warn" } else { "warn" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));

    // A second init (e.g. from tests sharing a process) is not an error worth surfacing.
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .try_init();
}
