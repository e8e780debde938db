//! Cache key definitions.

use std::fmt;

/// Where in the pipeline output was captured.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CacheBoundary {
    /// Serialized bytes produced by the named serializer or reader.
    Serialized { serializer: String },
    /// The event stream reaching the serializer.
    Events,
}

/// Identifies one cached pipeline output.
///
/// The same request URI cached as bytes and as events yields two distinct keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    key: String,
    boundary: CacheBoundary,
}

impl CacheKey {
    pub fn serialized(key: impl Into<String>, serializer: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            boundary: CacheBoundary::Serialized {
                serializer: serializer.into(),
            },
        }
    }

    pub fn events(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            boundary: CacheBoundary::Events,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn boundary(&self) -> &CacheBoundary {
        &self.boundary
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.boundary {
            CacheBoundary::Serialized { serializer } => {
                write!(f, "serialized:{serializer}:{}", self.key)
            }
            CacheBoundary::Events => write!(f, "events:{}", self.key),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn boundary_distinguishes_keys() {
        let bytes = CacheKey::serialized("docs/index", "html");
        let events = CacheKey::events("docs/index");
        assert_ne!(bytes, events);
        assert_eq!(bytes.to_string(), "serialized:html:docs/index");
        assert_eq!(events.to_string(), "events:docs/index");
    }

    #[test]
    fn serializer_is_part_of_the_key() {
        assert_ne!(
            CacheKey::serialized("feed", "xml"),
            CacheKey::serialized("feed", "json")
        );
    }
}
