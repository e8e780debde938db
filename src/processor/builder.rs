use std::sync::Arc;

use super::{Source, TreeProcessor};
use crate::error::ProcessingError;
use crate::registry::ComponentRegistry;
use crate::tree::NodeRef;

/// Compiles a sitemap definition into a node tree.
///
/// The definition format is up to the implementation. Component types are
/// resolved through [`BuildContext::registry`], so lookups fail at build time
/// rather than on a request.
pub trait TreeBuilder: Send + Sync {
    fn build(&self, source: &dyn Source, ctx: &BuildContext<'_>) -> Result<NodeRef, ProcessingError>;
}

impl<F> TreeBuilder for F
where
    F: Fn(&dyn Source, &BuildContext<'_>) -> Result<NodeRef, ProcessingError> + Send + Sync,
{
    fn build(&self, source: &dyn Source, ctx: &BuildContext<'_>) -> Result<NodeRef, ProcessingError> {
        self(source, ctx)
    }
}

/// What a builder may use while compiling one tree.
pub struct BuildContext<'a> {
    processor: &'a TreeProcessor,
    registry: &'a Arc<ComponentRegistry>,
}

impl<'a> BuildContext<'a> {
    pub(crate) fn new(processor: &'a TreeProcessor, registry: &'a Arc<ComponentRegistry>) -> Self {
        Self {
            processor,
            registry,
        }
    }

    /// Registry local to the tree being built. Registrations made here are
    /// visible to this tree and to sitemaps it mounts.
    pub fn registry(&self) -> &Arc<ComponentRegistry> {
        self.registry
    }

    pub fn processor(&self) -> &TreeProcessor {
        self.processor
    }

    /// Create the child processor for a mounted sitemap at `location`,
    /// resolved relative to the definition being built.
    pub fn mount(&self, location: &str) -> Result<Arc<TreeProcessor>, ProcessingError> {
        let source = self.processor.resolve_source(location)?;
        Ok(self
            .processor
            .create_child_with(source, Arc::clone(self.registry)))
    }
}
