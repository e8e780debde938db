//! The compiled sitemap: an immutable tree of processing nodes walked once
//! per request.

mod context;
mod matching;
mod mount;
mod nodes;
mod stages;

use std::sync::Arc;

use crate::environment::Environment;
use crate::error::ProcessingError;

pub use context::{InvokeContext, InvokeMode};
pub use matching::{Action, HeaderSelector, Matcher, ParameterSelector, Selector, WildcardMatcher};
pub use mount::MountNode;
pub use nodes::{ActNode, MatchNode, PipelineNode, PipelinesNode, SelectCase, SelectNode};
pub use stages::{GenerateNode, ReadNode, SerializeNode, TransformNode};

/// A node of the compiled tree. Nodes are shared by every request running
/// against the tree, so all request state lives in the [`InvokeContext`].
pub trait ProcessingNode: Send + Sync {
    /// `Ok(true)` when this node (or a descendant) handled the request.
    fn invoke(&self, env: &mut Environment, ctx: &mut InvokeContext<'_>) -> Result<bool, ProcessingError>;
}

pub type NodeRef = Arc<dyn ProcessingNode>;

/// Invoke `nodes` in order, stopping at the first that handles the request.
pub fn invoke_nodes(
    nodes: &[NodeRef],
    env: &mut Environment,
    ctx: &mut InvokeContext<'_>,
) -> Result<bool, ProcessingError> {
    for node in nodes {
        if node.invoke(env, ctx)? {
            return Ok(true);
        }
    }
    Ok(false)
}
