//! Tracing setup for the console binary.

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Install the global subscriber. `RUST_LOG` overrides the default filter.
///
/// Logs go to stderr so they do not interleave with received messages and
/// dump traces on stdout.
pub fn init_tracing(debug: bool) {
    let default = if debug { "osc_client=debug" } else { "osc_client=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    let _ = tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .with_thread_names(true),
        )
        .with(filter)
        .try_init();
}
