//! Tracing subscriber setup for binaries embedding the lifecycle core.

use crate::Result;
use crate::error::Error;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Install the global `tracing` subscriber.
///
/// `verbose` forces debug output for this crate; otherwise `RUST_LOG` is
/// honoured, defaulting to info. Calling this twice returns
/// [`Error::Logging`] rather than panicking.
pub fn init_logging(verbose: bool) -> Result<()> {
    let filter = if verbose {
        EnvFilter::new("orchestra_lifecycle=debug,info")
    } else {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("orchestra_lifecycle=info,warn"))
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .try_init()
        .map_err(|e| Error::Logging(e.to_string()))
}
