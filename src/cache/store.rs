//! Cache storage.
//!
//! Entries carry the validities they were stored with. The store itself drops
//! any entry whose validity has definitively lapsed, so callers never see one.

use std::{fmt, sync::Arc, sync::RwLock};

use bytes::Bytes;
use lru::LruCache;
use metrics::counter;
use time::OffsetDateTime;
use tracing::debug;

use super::config::CacheConfig;
use super::keys::CacheKey;
use super::lock::{rw_read, rw_write};
use super::validity::{Validity, ValidityState, revalidate};

const SOURCE: &str = "cache::store";
const METRIC_CACHE_EVICT: &str = "sitemap_cache_evict_total";

/// What a cached payload holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadKind {
    /// Serialized response bytes.
    Serialized,
    /// An encoded event stream, replayed through a serializer or consumer.
    Events,
}

/// A cached pipeline output.
#[derive(Clone)]
pub struct CachedResponse {
    kind: PayloadKind,
    body: Bytes,
    validities: Vec<Arc<dyn Validity>>,
    content_type: Option<String>,
    expires: Option<OffsetDateTime>,
}

impl CachedResponse {
    /// Returns `None` when `validities` is empty: an entry must always be
    /// checkable.
    pub fn new(kind: PayloadKind, body: Bytes, validities: Vec<Arc<dyn Validity>>) -> Option<Self> {
        if validities.is_empty() {
            return None;
        }
        Some(Self {
            kind,
            body,
            validities,
            content_type: None,
            expires: None,
        })
    }

    pub fn with_content_type(mut self, content_type: Option<String>) -> Self {
        self.content_type = content_type;
        self
    }

    pub fn with_expires(mut self, expires: Option<OffsetDateTime>) -> Self {
        self.expires = expires;
        self
    }

    pub fn kind(&self) -> PayloadKind {
        self.kind
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    pub fn validities(&self) -> &[Arc<dyn Validity>] {
        &self.validities
    }

    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    pub fn expires(&self) -> Option<OffsetDateTime> {
        self.expires
    }

    /// State of the stored validities on their own. Undecided validities
    /// leave the entry `Unknown`.
    pub fn validity_state(&self) -> ValidityState {
        self.validities
            .iter()
            .map(|validity| validity.is_valid())
            .fold(ValidityState::Valid, ValidityState::and)
    }

    /// State of the stored validities, resolving undecided ones against the
    /// validities computed for the current request.
    pub fn validity_against(&self, fresh: Option<&[Arc<dyn Validity>]>) -> ValidityState {
        revalidate(&self.validities, fresh)
    }
}

impl fmt::Debug for CachedResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CachedResponse")
            .field("kind", &self.kind)
            .field("len", &self.body.len())
            .field("validities", &self.validities)
            .field("content_type", &self.content_type)
            .field("expires", &self.expires)
            .finish()
    }
}

/// Key/value store shared by every caching pipeline of a processor tree.
pub trait CacheStore: Send + Sync {
    /// Fetch an entry. Entries with any definitively invalid validity are
    /// removed instead of returned.
    fn get(&self, key: &CacheKey) -> Option<CachedResponse>;

    fn store(&self, key: CacheKey, response: CachedResponse);

    /// Returns whether an entry was present.
    fn remove(&self, key: &CacheKey) -> bool;

    fn clear(&self);

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// In-memory LRU implementation of [`CacheStore`].
pub struct LruCacheStore {
    entries: RwLock<LruCache<CacheKey, CachedResponse>>,
}

impl LruCacheStore {
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            entries: RwLock::new(LruCache::new(config.capacity_non_zero())),
        }
    }
}

impl CacheStore for LruCacheStore {
    fn get(&self, key: &CacheKey) -> Option<CachedResponse> {
        let mut entries = rw_write(&self.entries, SOURCE, "get");
        let state = entries.get(key)?.validity_state();
        if state == ValidityState::Invalid {
            entries.pop(key);
            counter!(METRIC_CACHE_EVICT, "reason" => "invalid").increment(1);
            debug!(cache = "pipeline", key = %key, outcome = "evicted", "Cached entry no longer valid");
            return None;
        }
        entries.peek(key).cloned()
    }

    fn store(&self, key: CacheKey, response: CachedResponse) {
        let evicted = rw_write(&self.entries, SOURCE, "store").push(key.clone(), response);
        match evicted {
            Some((evicted_key, _)) if evicted_key != key => {
                counter!(METRIC_CACHE_EVICT, "reason" => "capacity").increment(1);
                debug!(cache = "pipeline", key = %evicted_key, outcome = "evicted", "Cache capacity reached");
            }
            _ => {}
        }
    }

    fn remove(&self, key: &CacheKey) -> bool {
        rw_write(&self.entries, SOURCE, "remove").pop(key).is_some()
    }

    fn clear(&self) {
        rw_write(&self.entries, SOURCE, "clear").clear();
    }

    fn len(&self) -> usize {
        rw_read(&self.entries, SOURCE, "len").len()
    }
}
