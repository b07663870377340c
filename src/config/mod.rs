//! Configuration constants and pager options.

mod constants;

pub use constants::*;

use std::time::Duration;

/// Tunables resolved when a database is opened.
#[derive(Debug, Clone)]
pub struct PagerOptions {
    /// Maximum number of pages held in the cache before eviction kicks in.
    pub cache_pages: usize,
    /// How long lock acquisition may block before returning a busy error.
    pub busy_timeout: Duration,
}

impl Default for PagerOptions {
    fn default() -> Self {
        Self {
            cache_pages: DEFAULT_CACHE_PAGES,
            busy_timeout: Duration::from_millis(DEFAULT_BUSY_TIMEOUT_MS),
        }
    }
}
