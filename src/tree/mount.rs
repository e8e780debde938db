use std::sync::Arc;

use tracing::debug;

use super::{InvokeContext, ProcessingNode};
use crate::environment::Environment;
use crate::error::ProcessingError;
use crate::processor::TreeProcessor;

/// Delegates requests under `prefix` to a child sitemap.
///
/// The prefix is stripped from the URI while the child runs and restored
/// afterwards, whatever the outcome. Any pipeline already under assembly is
/// handed to the child, which keeps appending to it.
pub struct MountNode {
    prefix: String,
    processor: Arc<TreeProcessor>,
}

impl MountNode {
    pub fn new(prefix: impl Into<String>, processor: Arc<TreeProcessor>) -> Self {
        Self {
            prefix: prefix.into(),
            processor,
        }
    }

    pub fn processor(&self) -> &Arc<TreeProcessor> {
        &self.processor
    }
}

impl ProcessingNode for MountNode {
    fn invoke(&self, env: &mut Environment, ctx: &mut InvokeContext<'_>) -> Result<bool, ProcessingError> {
        let Some(saved) = env.enter_context(&self.prefix) else {
            return Ok(false);
        };
        debug!(prefix = %self.prefix, source = self.processor.source_uri(), "Entering mounted sitemap");

        let result = self.processor.invoke_in(env, ctx);
        env.restore_context(saved);
        result
    }
}
