//! Logging initialization (SPEC_FULL.md's ambient stack section).
//!
//! This library never installs a global subscriber on its own — only a
//! binary embedding it gets to decide that. `init()` is offered as the
//! straightforward default for anything that doesn't already have an
//! opinion, grounded on the console-output path of the teacher's own
//! telemetry module, with the OTLP exporter dropped: a job queue worker has
//! no spans worth exporting that `tracing`'s own target/field filtering
//! doesn't already cover.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Installs a `tracing-subscriber` registry with an `EnvFilter` (honoring
/// `RUST_LOG`, defaulting to `info`) and a formatted console layer. Returns
/// `false` instead of panicking if a global subscriber is already set.
pub fn init() -> bool {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .try_init()
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_is_idempotent_enough_to_call_twice() {
        let _ = init();
        let _ = init();
    }
}
