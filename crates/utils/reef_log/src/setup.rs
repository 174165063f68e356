//! Logging setup for binaries and tests.

/// Directs [`log`] calls to stderr.
///
/// Safe to call more than once; only the first call has any effect.
#[cfg(not(target_arch = "wasm32"))]
pub fn setup_logging() {
    fn setup() {
        let log_filter = match std::env::var("RUST_LOG") {
            Ok(filter) => filter,
            Err(_) => crate::default_log_filter(),
        };

        let mut builder = env_logger::Builder::new();
        builder.parse_filters(&log_filter);
        builder.init();
    }

    use std::sync::Once;
    static START: Once = Once::new();
    START.call_once(setup);
}
