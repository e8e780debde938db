//! Processing pipelines.
//!
//! A pipeline is assembled while the sitemap tree is traversed: one content
//! source (a generator or a reader), zero or more transformers, and a
//! serializer sealing the chain. Stage types are resolved at build time; the
//! instances are created when the pipeline is prepared for a request.

mod assembly;
mod basic;
mod caching;
mod chain;
mod range;
mod stage;

use std::{io::Write, sync::Arc};

use serde::Deserialize;

use crate::cache::{CacheConfig, CacheStore, LruCacheStore};
use crate::environment::Environment;
use crate::error::{PipelineConfigurationError, ProcessingError};
use crate::parameters::Parameters;
use crate::registry::{GeneratorType, ReaderType, SerializerType, TransformerType};

pub use basic::BasicPipeline;
pub use caching::{CacheStatus, CachingPipeline};
pub use range::ByteRange;
pub use stage::{Event, EventSink, Generator, Reader, Serializer, Stage, StageContext, Transformer};

/// What the caller will consume from a prepared pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputTarget {
    /// Serialized bytes written to an output stream.
    Serialized,
    /// The event stream, delivered to a caller-supplied consumer.
    Events,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PipelineState {
    #[default]
    Empty,
    /// A generator is set; transformers may still be added.
    Sourced,
    /// Sealed by a serializer or a reader.
    Connected,
    Prepared(OutputTarget),
    Executed,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PipelineKind {
    #[default]
    Caching,
    #[serde(alias = "non-caching")]
    Noncaching,
}

pub trait ProcessingPipeline: Send {
    /// Parameters declared on the enclosing pipeline node.
    fn set_parameters(&mut self, parameters: Parameters);

    fn parameters(&self) -> &Parameters;

    fn set_generator(
        &mut self,
        ty: GeneratorType,
        src: Option<String>,
        params: Parameters,
    ) -> Result<(), PipelineConfigurationError>;

    fn set_reader(
        &mut self,
        ty: ReaderType,
        src: Option<String>,
        params: Parameters,
        mime_type: Option<String>,
    ) -> Result<(), PipelineConfigurationError>;

    fn add_transformer(
        &mut self,
        ty: TransformerType,
        src: Option<String>,
        params: Parameters,
    ) -> Result<(), PipelineConfigurationError>;

    fn set_serializer(
        &mut self,
        ty: SerializerType,
        params: Parameters,
        mime_type: Option<String>,
    ) -> Result<(), PipelineConfigurationError>;

    /// Instantiate stages and resolve per-request state. May set response
    /// headers as a side effect. Called implicitly by `process` and
    /// `process_events` when needed.
    fn prepare(&mut self, env: &mut Environment, target: OutputTarget) -> Result<(), ProcessingError>;

    /// Produce the response into `out`. A client disconnect ends processing
    /// without an error.
    fn process(&mut self, env: &mut Environment, out: &mut dyn Write) -> Result<(), ProcessingError>;

    /// Deliver the event stream to `consumer` instead of serializing it.
    fn process_events(
        &mut self,
        env: &mut Environment,
        consumer: &mut dyn EventSink,
    ) -> Result<(), ProcessingError>;

    /// Reset to an empty pipeline.
    fn recycle(&mut self);

    fn state(&self) -> PipelineState;

    fn mime_type(&self) -> Option<&str>;
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Honour single `Range: bytes=` requests on serialized output.
    pub enable_byte_ranges: bool,
    /// Kind used by pipeline nodes that do not name one.
    pub default_kind: PipelineKind,
}

/// Creates pipelines sharing one cache store.
#[derive(Clone)]
pub struct PipelineFactory {
    store: Arc<dyn CacheStore>,
    cache: CacheConfig,
    config: PipelineConfig,
}

impl PipelineFactory {
    pub fn new(store: Arc<dyn CacheStore>, cache: CacheConfig, config: PipelineConfig) -> Self {
        Self {
            store,
            cache,
            config,
        }
    }

    /// An in-memory LRU store sized by `cache`.
    pub fn with_lru(cache: CacheConfig, config: PipelineConfig) -> Self {
        let store: Arc<dyn CacheStore> = Arc::new(LruCacheStore::new(&cache));
        Self::new(store, cache, config)
    }

    pub fn create(&self, kind: PipelineKind) -> Box<dyn ProcessingPipeline> {
        match kind {
            PipelineKind::Noncaching => Box::new(BasicPipeline::new(self.config.enable_byte_ranges)),
            PipelineKind::Caching => Box::new(CachingPipeline::new(
                Arc::clone(&self.store),
                self.cache.clone(),
                self.config.enable_byte_ranges,
            )),
        }
    }

    pub fn default_kind(&self) -> PipelineKind {
        self.config.default_kind
    }

    pub fn store(&self) -> &Arc<dyn CacheStore> {
        &self.store
    }
}

impl Default for PipelineFactory {
    fn default() -> Self {
        Self::with_lru(CacheConfig::default(), PipelineConfig::default())
    }
}
