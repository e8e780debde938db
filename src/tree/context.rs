use std::io::Write;

use crate::environment::Environment;
use crate::error::{PipelineConfigurationError, ProcessingError};
use crate::parameters::{ParameterTemplates, Parameters, VariableResolver};
use crate::pipeline::{PipelineFactory, PipelineKind, ProcessingPipeline};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvokeMode {
    /// Run the matched pipeline into the caller's output.
    Execute,
    /// Assemble the matched pipeline and hand it back unexecuted.
    Build,
}

/// Per-request traversal state: the map stack, the pipeline being assembled
/// and where its output goes. Never shared between requests.
pub struct InvokeContext<'a> {
    mode: InvokeMode,
    factory: &'a PipelineFactory,
    output: Option<&'a mut dyn Write>,
    internal: bool,
    maps: Vec<Parameters>,
    kind: PipelineKind,
    parameters: Parameters,
    pipeline: Option<Box<dyn ProcessingPipeline>>,
}

impl<'a> InvokeContext<'a> {
    /// Context for an external request writing to `output`.
    pub fn for_output(factory: &'a PipelineFactory, output: &'a mut dyn Write) -> Self {
        Self::new(InvokeMode::Execute, factory, Some(output), false)
    }

    /// Context for an internal request that only wants the assembled pipeline.
    pub fn for_pipeline(factory: &'a PipelineFactory) -> Self {
        Self::new(InvokeMode::Build, factory, None, true)
    }

    fn new(
        mode: InvokeMode,
        factory: &'a PipelineFactory,
        output: Option<&'a mut dyn Write>,
        internal: bool,
    ) -> Self {
        Self {
            mode,
            factory,
            output,
            internal,
            maps: Vec::new(),
            kind: factory.default_kind(),
            parameters: Parameters::new(),
            pipeline: None,
        }
    }

    pub fn mode(&self) -> InvokeMode {
        self.mode
    }

    /// Internal requests may reach pipelines hidden from external ones.
    pub fn is_internal(&self) -> bool {
        self.internal
    }

    pub fn maps(&self) -> &[Parameters] {
        &self.maps
    }

    pub fn push_map(&mut self, map: Parameters) {
        self.maps.push(map);
    }

    pub fn pop_map(&mut self) {
        self.maps.pop();
    }

    pub fn resolve(&self, expression: &VariableResolver) -> String {
        expression.resolve(&self.maps)
    }

    pub fn resolve_parameters(&self, templates: &ParameterTemplates) -> Parameters {
        templates.resolve(&self.maps)
    }

    pub fn has_pipeline(&self) -> bool {
        self.pipeline.is_some()
    }

    /// Record the kind and parameters of the pipeline section being entered.
    /// A pipeline already under assembly keeps its own.
    pub fn begin_pipeline(&mut self, kind: Option<PipelineKind>, parameters: Parameters) {
        if self.pipeline.is_some() {
            return;
        }
        self.kind = kind.unwrap_or_else(|| self.factory.default_kind());
        self.parameters = parameters;
    }

    pub fn discard_pipeline(&mut self) {
        self.pipeline = None;
    }

    /// The pipeline under assembly, created on first use.
    pub fn pipeline(&mut self) -> &mut dyn ProcessingPipeline {
        let (factory, kind, parameters) = (self.factory, self.kind, &self.parameters);
        self.pipeline
            .get_or_insert_with(|| {
                let mut pipeline = factory.create(kind);
                pipeline.set_parameters(parameters.clone());
                pipeline
            })
            .as_mut()
    }

    /// Called by a node that sealed the pipeline. In execute mode the pipeline
    /// runs now; in build mode it stays here for [`InvokeContext::take_pipeline`].
    pub fn complete(&mut self, env: &mut Environment) -> Result<(), ProcessingError> {
        if self.mode == InvokeMode::Build {
            return Ok(());
        }
        let pipeline = self
            .pipeline
            .as_mut()
            .ok_or(PipelineConfigurationError::NoSource)?;
        let output = self
            .output
            .as_deref_mut()
            .ok_or(PipelineConfigurationError::MissingOutput)?;
        pipeline.process(env, output)
    }

    pub fn take_pipeline(&mut self) -> Option<Box<dyn ProcessingPipeline>> {
        self.pipeline.take()
    }
}
