//! tracing-subscriber setup for the CLI.
//!
//! Logs go to stderr so command output on stdout stays clean. `PHASEKEEP_LOG`
//! takes an `EnvFilter` directive and overrides the verbosity flag;
//! `PHASEKEEP_LOG_FORMAT=json` switches to one JSON object per event.

use tracing_subscriber::EnvFilter;

pub const LOG_ENV: &str = "PHASEKEEP_LOG";
pub const LOG_FORMAT_ENV: &str = "PHASEKEEP_LOG_FORMAT";

/// Filter directive used when `PHASEKEEP_LOG` is unset.
pub fn default_directive(verbose: bool) -> &'static str {
    if verbose { "phasekeep=debug" } else { "phasekeep=info" }
}

/// Install the global subscriber. Calling it again is a no-op.
pub fn init(verbose: bool) {
    let filter = EnvFilter::try_from_env(LOG_ENV)
        .unwrap_or_else(|_| EnvFilter::new(default_directive(verbose)));
    let json = std::env::var(LOG_FORMAT_ENV).is_ok_and(|v| v.eq_ignore_ascii_case("json"));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);
    let result = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    if result.is_err() {
        tracing::debug!("Logging already initialized");
    }
}
