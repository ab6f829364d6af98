//! Diagnostic logging
//!
//! Logs go to stderr so they never mix with report output on stdout.
//! `RUST_LOG` always wins; otherwise only warnings are shown unless
//! `--verbose` asks for this crate's debug output.

use tracing::Subscriber;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "warn";
const VERBOSE_FILTER: &str = "warn,canirun=debug";

/// Install the global subscriber. Call once, before any work starts.
pub fn init(verbose: bool) {
    // A second init (embedding) keeps the first subscriber.
    let _ = subscriber(verbose).try_init();
}

fn subscriber(verbose: bool) -> impl Subscriber + Send + Sync + 'static {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(verbose)));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(verbose)
        .finish()
}

fn default_directive(verbose: bool) -> &'static str {
    if verbose {
        VERBOSE_FILTER
    } else {
        DEFAULT_FILTER
    }
}
