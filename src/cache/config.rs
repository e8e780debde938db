//! Cache configuration.
//!
//! Controls the pipeline cache store via the `[cache]` table of `sitemap.toml`.

use std::num::NonZeroUsize;

use serde::Deserialize;

const DEFAULT_CAPACITY: usize = 1000;
const DEFAULT_EXPIRES_SECS: i64 = -1;
const DEFAULT_MAX_ENTRY_BYTES: usize = 4 * 1024 * 1024;

/// Longest expiry accepted from configuration: one hundred years.
pub const MAX_EXPIRES_SECS: i64 = 100 * 365 * 24 * 60 * 60;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Master switch. When off, caching pipelines behave like non-caching ones.
    pub enable_cache: bool,
    /// Maximum number of cached pipeline outputs.
    pub capacity: usize,
    /// Expiration policy used when a pipeline declares no `expires` parameter:
    /// `> 0` seconds from storage, `0` uncacheable, negative defers to stage
    /// validities.
    pub default_expires_secs: i64,
    /// Outputs larger than this are streamed but never stored.
    pub max_entry_bytes: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enable_cache: true,
            capacity: DEFAULT_CAPACITY,
            default_expires_secs: DEFAULT_EXPIRES_SECS,
            max_entry_bytes: DEFAULT_MAX_ENTRY_BYTES,
        }
    }
}

impl CacheConfig {
    /// Returns the capacity as NonZeroUsize, clamping to 1 if zero.
    pub fn capacity_non_zero(&self) -> NonZeroUsize {
        NonZeroUsize::new(self.capacity).unwrap_or(NonZeroUsize::MIN)
    }
}
