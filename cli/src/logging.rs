//! Log subscriber for the CLI binary
//!
//! Events go to stderr so stdout stays reserved for command output.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Filter directives, e.g. `SHIFTSQL_LOG=shiftsql_migrations=debug`
pub const LOG_ENV: &str = "SHIFTSQL_LOG";

const DEFAULT_FILTER: &str = "warn";
const VERBOSE_FILTER: &str = "warn,shiftsql_migrations=debug,shiftsql_cli=debug";

/// Install the global subscriber. `verbose` takes precedence over [`LOG_ENV`].
pub fn init(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new(VERBOSE_FILTER)
    } else {
        EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
    };

    // a subscriber may already be installed when embedded in tests
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .try_init();
}
