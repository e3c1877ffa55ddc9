//! Logging utilities
//!
//! The library only emits through the `log` facade. Applications call [`init`]
//! once, or install their own logger.

pub use log::{debug, error, info, trace, warn};

/// Install `env_logger`, honouring `RUST_LOG`
pub fn init() {
    env_logger::init();
}

/// Install `env_logger` with `default_filter` used when `RUST_LOG` is unset
///
/// Returns false if a logger was already installed.
pub fn try_init_with_filter(default_filter: &str) -> bool {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .try_init()
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_init_reports_existing_logger() {
        let _ = try_init_with_filter("debug");
        assert!(!try_init_with_filter("info"));
    }
}
