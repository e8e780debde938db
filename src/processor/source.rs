//! Sitemap definition sources and their modification stamps.

use std::{
    fmt, fs, io,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
    time::{Duration, Instant, SystemTime},
};

use bytes::Bytes;
use tracing::trace;

use crate::cache::lock::mutex_lock;
use crate::error::{ConfigurationError, ProcessingError};

const SOURCE: &str = "processor::source";

/// Where a sitemap definition comes from.
pub trait Source: Send + Sync + fmt::Debug {
    fn uri(&self) -> &str;

    /// Modification stamp of the definition, `None` when it cannot be read.
    fn last_modified(&self) -> Option<SystemTime>;

    fn content(&self) -> io::Result<Bytes>;
}

/// A definition stored on the local filesystem.
#[derive(Debug, Clone)]
pub struct FileSource {
    path: PathBuf,
    uri: String,
}

impl FileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let uri = path.display().to_string();
        Self { path, uri }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Source for FileSource {
    fn uri(&self) -> &str {
        &self.uri
    }

    fn last_modified(&self) -> Option<SystemTime> {
        fs::metadata(&self.path).and_then(|meta| meta.modified()).ok()
    }

    fn content(&self) -> io::Result<Bytes> {
        fs::read(&self.path).map(Bytes::from)
    }
}

#[derive(Debug, Clone, Copy)]
struct Observed {
    at: Instant,
    stamp: Option<SystemTime>,
}

/// Wraps a source so its stamp is consulted at most once per `delay`.
///
/// Inside the window the stamp observed last is returned as is, so a change to
/// the definition becomes visible no later than `delay` after it happened.
#[derive(Debug)]
pub struct DelayedRefreshSource {
    inner: Arc<dyn Source>,
    delay: Duration,
    observed: Mutex<Option<Observed>>,
}

impl DelayedRefreshSource {
    pub fn new(inner: Arc<dyn Source>, delay: Duration) -> Self {
        Self {
            inner,
            delay,
            observed: Mutex::new(None),
        }
    }

    pub fn inner(&self) -> &Arc<dyn Source> {
        &self.inner
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }
}

impl Source for DelayedRefreshSource {
    fn uri(&self) -> &str {
        self.inner.uri()
    }

    fn last_modified(&self) -> Option<SystemTime> {
        let mut observed = mutex_lock(&self.observed, SOURCE, "last_modified");
        if let Some(previous) = *observed {
            if previous.at.elapsed() < self.delay {
                return previous.stamp;
            }
        }

        let stamp = self.inner.last_modified();
        trace!(source = self.inner.uri(), ?stamp, "Refreshed source stamp");
        *observed = Some(Observed {
            at: Instant::now(),
            stamp,
        });
        stamp
    }

    fn content(&self) -> io::Result<Bytes> {
        self.inner.content()
    }
}

/// Turns a location written in a sitemap (a mount `src`) into a source.
pub trait SourceResolver: Send + Sync {
    /// `base` is the source declaring the reference.
    fn resolve(&self, base: &dyn Source, location: &str) -> Result<Arc<dyn Source>, ProcessingError>;
}

/// Resolves locations as filesystem paths relative to the declaring file.
#[derive(Debug, Clone, Copy, Default)]
pub struct FileSourceResolver;

impl SourceResolver for FileSourceResolver {
    fn resolve(&self, base: &dyn Source, location: &str) -> Result<Arc<dyn Source>, ProcessingError> {
        if location.is_empty() {
            return Err(ConfigurationError::build(base.uri(), "empty mount source").into());
        }

        let location = location.strip_prefix("file://").unwrap_or(location);
        let target = Path::new(location);
        let path = if target.is_absolute() {
            target.to_path_buf()
        } else {
            Path::new(base.uri())
                .parent()
                .map(|dir| dir.join(target))
                .unwrap_or_else(|| target.to_path_buf())
        };
        Ok(Arc::new(FileSource::new(path)))
    }
}
