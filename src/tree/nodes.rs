//! Branching and container nodes.

use std::sync::Arc;

use tracing::{debug, trace};

use super::matching::{Action, Matcher, Selector};
use super::{InvokeContext, NodeRef, ProcessingNode, invoke_nodes};
use crate::environment::Environment;
use crate::error::ProcessingError;
use crate::parameters::{ParameterTemplates, VariableResolver};
use crate::pipeline::PipelineKind;

/// Root of a sitemap: tries each pipeline section in order.
pub struct PipelinesNode {
    children: Vec<NodeRef>,
}

impl PipelinesNode {
    pub fn new(children: Vec<NodeRef>) -> Self {
        Self { children }
    }
}

impl ProcessingNode for PipelinesNode {
    fn invoke(&self, env: &mut Environment, ctx: &mut InvokeContext<'_>) -> Result<bool, ProcessingError> {
        let handled = invoke_nodes(&self.children, env, ctx)?;
        if !handled {
            debug!(uri = env.uri(), "No pipeline matched");
        }
        Ok(handled)
    }
}

/// A pipeline section: fixes the pipeline kind and parameters for the stages
/// declared below it.
pub struct PipelineNode {
    children: Vec<NodeRef>,
    kind: Option<PipelineKind>,
    parameters: ParameterTemplates,
    internal_only: bool,
}

impl PipelineNode {
    pub fn new(children: Vec<NodeRef>) -> Self {
        Self {
            children,
            kind: None,
            parameters: ParameterTemplates::default(),
            internal_only: false,
        }
    }

    pub fn with_kind(mut self, kind: PipelineKind) -> Self {
        self.kind = Some(kind);
        self
    }

    pub fn with_parameters(mut self, parameters: ParameterTemplates) -> Self {
        self.parameters = parameters;
        self
    }

    /// Hide this section from external requests.
    pub fn internal_only(mut self, internal_only: bool) -> Self {
        self.internal_only = internal_only;
        self
    }
}

impl ProcessingNode for PipelineNode {
    fn invoke(&self, env: &mut Environment, ctx: &mut InvokeContext<'_>) -> Result<bool, ProcessingError> {
        if self.internal_only && !ctx.is_internal() {
            return Ok(false);
        }

        let inherited = ctx.has_pipeline();
        let parameters = ctx.resolve_parameters(&self.parameters);
        ctx.begin_pipeline(self.kind, parameters);

        let handled = invoke_nodes(&self.children, env, ctx)?;
        if !handled && !inherited {
            ctx.discard_pipeline();
        }
        Ok(handled)
    }
}

pub struct MatchNode {
    matcher: Arc<dyn Matcher>,
    pattern: String,
    children: Vec<NodeRef>,
}

impl MatchNode {
    pub fn new(pattern: impl Into<String>, matcher: Arc<dyn Matcher>, children: Vec<NodeRef>) -> Self {
        Self {
            matcher,
            pattern: pattern.into(),
            children,
        }
    }
}

impl ProcessingNode for MatchNode {
    fn invoke(&self, env: &mut Environment, ctx: &mut InvokeContext<'_>) -> Result<bool, ProcessingError> {
        let Some(captures) = self.matcher.matches(env) else {
            return Ok(false);
        };
        trace!(pattern = %self.pattern, uri = env.uri(), "Matched");

        ctx.push_map(captures);
        let result = invoke_nodes(&self.children, env, ctx);
        ctx.pop_map();
        result
    }
}

pub struct SelectCase {
    test: VariableResolver,
    children: Vec<NodeRef>,
}

impl SelectCase {
    pub fn new(test: VariableResolver, children: Vec<NodeRef>) -> Self {
        Self { test, children }
    }
}

/// First `when` case accepted by the selector wins, else `otherwise`.
pub struct SelectNode {
    selector: Arc<dyn Selector>,
    parameters: ParameterTemplates,
    cases: Vec<SelectCase>,
    otherwise: Option<Vec<NodeRef>>,
}

impl SelectNode {
    pub fn new(selector: Arc<dyn Selector>, cases: Vec<SelectCase>) -> Self {
        Self {
            selector,
            parameters: ParameterTemplates::default(),
            cases,
            otherwise: None,
        }
    }

    pub fn with_parameters(mut self, parameters: ParameterTemplates) -> Self {
        self.parameters = parameters;
        self
    }

    pub fn with_otherwise(mut self, children: Vec<NodeRef>) -> Self {
        self.otherwise = Some(children);
        self
    }
}

impl ProcessingNode for SelectNode {
    fn invoke(&self, env: &mut Environment, ctx: &mut InvokeContext<'_>) -> Result<bool, ProcessingError> {
        let parameters = ctx.resolve_parameters(&self.parameters);
        for case in &self.cases {
            let expression = ctx.resolve(&case.test);
            if self.selector.select(&expression, env, &parameters) {
                return invoke_nodes(&case.children, env, ctx);
            }
        }
        match &self.otherwise {
            Some(children) => invoke_nodes(children, env, ctx),
            None => Ok(false),
        }
    }
}

pub struct ActNode {
    action: Arc<dyn Action>,
    src: Option<VariableResolver>,
    parameters: ParameterTemplates,
    children: Vec<NodeRef>,
}

impl ActNode {
    pub fn new(action: Arc<dyn Action>, children: Vec<NodeRef>) -> Self {
        Self {
            action,
            src: None,
            parameters: ParameterTemplates::default(),
            children,
        }
    }

    pub fn with_src(mut self, src: VariableResolver) -> Self {
        self.src = Some(src);
        self
    }

    pub fn with_parameters(mut self, parameters: ParameterTemplates) -> Self {
        self.parameters = parameters;
        self
    }
}

impl ProcessingNode for ActNode {
    fn invoke(&self, env: &mut Environment, ctx: &mut InvokeContext<'_>) -> Result<bool, ProcessingError> {
        let src = self.src.as_ref().map(|src| ctx.resolve(src));
        let parameters = ctx.resolve_parameters(&self.parameters);

        let Some(results) = self.action.act(env, src.as_deref(), &parameters)? else {
            return Ok(false);
        };

        ctx.push_map(results);
        let result = invoke_nodes(&self.children, env, ctx);
        ctx.pop_map();
        result
    }
}
