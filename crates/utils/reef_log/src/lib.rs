//! Text logging for use in the reef crates.
//!
//! * `trace`: spammy things
//! * `debug`: things that might be useful when debugging
//! * `info`: things we want to show to operators
//! * `warn`: problems we can recover from
//! * `error`: problems that lead to loss of functionality or data

pub use log::{Level, LevelFilter, debug, error, info, log_enabled, trace, warn};

mod setup;

pub use setup::*;

/// The filter we apply when the user hasn't set `RUST_LOG`.
///
/// Debug builds log more by default.
pub fn default_log_filter() -> String {
    let base = if cfg!(debug_assertions) {
        "debug"
    } else {
        "info"
    };

    // ureq is chatty at debug level even for perfectly healthy requests.
    format!("{base},ureq=warn")
}
