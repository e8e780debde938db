use std::{io::Write, sync::Arc, time::SystemTime};

use time::OffsetDateTime;
use tracing::debug;

use crate::environment::Environment;
use crate::error::ProcessingError;
use crate::pipeline::{PipelineFactory, ProcessingPipeline};
use crate::registry::ComponentRegistry;
use crate::tree::{InvokeContext, NodeRef};

/// One compiled generation of a sitemap.
///
/// Never mutated once published. Requests hold it through an `Arc`, so a
/// replaced generation is released only after its last request finishes.
pub struct ConcreteProcessor {
    root: NodeRef,
    registry: Arc<ComponentRegistry>,
    source_uri: String,
    source_stamp: Option<SystemTime>,
    built_at: OffsetDateTime,
    generation: u64,
}

impl ConcreteProcessor {
    pub(crate) fn new(
        root: NodeRef,
        registry: Arc<ComponentRegistry>,
        source_uri: &str,
        source_stamp: Option<SystemTime>,
        generation: u64,
    ) -> Self {
        Self {
            root,
            registry,
            source_uri: source_uri.to_string(),
            source_stamp,
            built_at: OffsetDateTime::now_utc(),
            generation,
        }
    }

    /// Stamp of the definition this tree was compiled from.
    pub fn source_stamp(&self) -> Option<SystemTime> {
        self.source_stamp
    }

    pub fn built_at(&self) -> OffsetDateTime {
        self.built_at
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn registry(&self) -> &Arc<ComponentRegistry> {
        &self.registry
    }

    pub fn invoke(&self, env: &mut Environment, ctx: &mut InvokeContext<'_>) -> Result<bool, ProcessingError> {
        self.root.invoke(env, ctx)
    }

    pub fn process(
        &self,
        env: &mut Environment,
        factory: &PipelineFactory,
        out: &mut dyn Write,
    ) -> Result<bool, ProcessingError> {
        let mut ctx = InvokeContext::for_output(factory, out);
        self.invoke(env, &mut ctx)
    }

    /// Assemble the pipeline matching `env` without running it.
    pub fn build_pipeline(
        &self,
        env: &mut Environment,
        factory: &PipelineFactory,
    ) -> Result<Option<Box<dyn ProcessingPipeline>>, ProcessingError> {
        let mut ctx = InvokeContext::for_pipeline(factory);
        if self.invoke(env, &mut ctx)? {
            Ok(ctx.take_pipeline())
        } else {
            Ok(None)
        }
    }
}

impl Drop for ConcreteProcessor {
    fn drop(&mut self) {
        self.registry.dispose();
        debug!(
            source = %self.source_uri,
            generation = self.generation,
            "Released sitemap tree"
        );
    }
}
