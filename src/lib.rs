//! Sitemap tree processing.
//!
//! A sitemap definition is compiled by a [`processor::TreeBuilder`] into an
//! immutable tree of [`tree::ProcessingNode`]s. Each request walks the tree,
//! assembling a pipeline (generator, transformers and serializer, or a reader
//! alone) that is then executed, optionally through the cache. The
//! [`processor::TreeProcessor`] rebuilds the tree when its definition changes
//! and publishes the new one atomically.

pub mod cache;
pub mod config;
pub mod environment;
pub mod error;
pub mod infra;
pub mod parameters;
pub mod pipeline;
pub mod processor;
pub mod registry;
pub mod tree;

pub use environment::Environment;
pub use error::{ConfigurationError, PipelineConfigurationError, ProcessingError};
pub use parameters::{ParameterTemplates, Parameters, VariableResolver};
pub use pipeline::{PipelineFactory, PipelineKind, ProcessingPipeline};
pub use processor::{TreeBuilder, TreeProcessor};
pub use registry::ComponentRegistry;
