//! Tracing setup for the batch driver.
//!
//! Driver logs always go to stderr. Stdout belongs to other output:
//! - `run` inherits the child's stdio by default, so the precomputation
//!   program's progress output lands on our stdout
//! - `plan` prints a shell script or JSON document meant to be piped or
//!   redirected, and a stray log line would corrupt it
//!
//! `RUST_LOG` takes precedence over the level passed in. Only the first call
//! installs a subscriber; later calls are ignored.

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Install the global stderr subscriber. `json` selects newline-delimited
/// JSON instead of the human-readable format.
pub fn init_tracing(json: bool, level: Level) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_str()));

    let json_layer = json.then(|| {
        fmt::layer()
            .json()
            .with_target(false)
            .with_writer(std::io::stderr)
    });
    let text_layer = (!json).then(|| {
        fmt::layer()
            .with_target(false)
            .with_writer(std::io::stderr)
    });

    tracing_subscriber::registry()
        .with(env_filter)
        .with(json_layer)
        .with(text_layer)
        .try_init()
        .ok();
}
