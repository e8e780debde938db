//! Pipeline output cache.
//!
//! Caching pipelines store either their serialized bytes or the event stream
//! reaching the serializer, together with the validities that decide when the
//! entry stops being servable.
//!
//! ## Configuration
//!
//! ```toml
//! [cache]
//! enable_cache = true
//! capacity = 1000
//! default_expires_secs = -1
//! max_entry_bytes = 4194304
//! ```

mod config;
mod keys;
pub(crate) mod lock;
mod store;
mod validity;

pub use config::{CacheConfig, MAX_EXPIRES_SECS};
pub use keys::{CacheBoundary, CacheKey};
pub use store::{CacheStore, CachedResponse, LruCacheStore, PayloadKind};
pub use validity::{
    AggregatedValidity, ExpiresValidity, NopValidity, TimestampValidity, Validity, ValidityState,
    revalidate,
};
