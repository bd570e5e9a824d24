//! Logging helpers
//!
//! The library itself only uses the `log` facade; binaries call
//! [`init_logger`] once at startup.

/// Initialize the global logger
///
/// `RUST_LOG` takes precedence over `level` when set.
///
/// # Parameters
///
/// * `level` - Default log level (error, warn, info, debug, trace)
pub fn init_logger(level: &str) {
    let env = env_logger::Env::default()
        .filter_or("RUST_LOG", level);

    // A second initialization (tests, embedding) is not an error
    let _ = env_logger::Builder::from_env(env).try_init();
}
