//! Nodes that add stages to the pipeline under assembly.
//!
//! Generator and transformer nodes never end traversal. Serializer and reader
//! nodes seal the pipeline and report the request as handled.

use http::StatusCode;

use super::{InvokeContext, ProcessingNode};
use crate::environment::Environment;
use crate::error::ProcessingError;
use crate::parameters::{ParameterTemplates, VariableResolver};
use crate::registry::{GeneratorType, ReaderType, SerializerType, TransformerType};

fn resolve_src(ctx: &InvokeContext<'_>, src: &Option<VariableResolver>) -> Option<String> {
    src.as_ref().map(|src| ctx.resolve(src))
}

pub struct GenerateNode {
    ty: GeneratorType,
    src: Option<VariableResolver>,
    parameters: ParameterTemplates,
}

impl GenerateNode {
    pub fn new(ty: GeneratorType) -> Self {
        Self {
            ty,
            src: None,
            parameters: ParameterTemplates::default(),
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

impl ProcessingNode for GenerateNode {
    fn invoke(&self, _env: &mut Environment, ctx: &mut InvokeContext<'_>) -> Result<bool, ProcessingError> {
        let src = resolve_src(ctx, &self.src);
        let parameters = ctx.resolve_parameters(&self.parameters);
        ctx.pipeline().set_generator(self.ty.clone(), src, parameters)?;
        Ok(false)
    }
}

pub struct TransformNode {
    ty: TransformerType,
    src: Option<VariableResolver>,
    parameters: ParameterTemplates,
}

impl TransformNode {
    pub fn new(ty: TransformerType) -> Self {
        Self {
            ty,
            src: None,
            parameters: ParameterTemplates::default(),
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

impl ProcessingNode for TransformNode {
    fn invoke(&self, _env: &mut Environment, ctx: &mut InvokeContext<'_>) -> Result<bool, ProcessingError> {
        let src = resolve_src(ctx, &self.src);
        let parameters = ctx.resolve_parameters(&self.parameters);
        ctx.pipeline().add_transformer(self.ty.clone(), src, parameters)?;
        Ok(false)
    }
}

pub struct SerializeNode {
    ty: SerializerType,
    parameters: ParameterTemplates,
    mime_type: Option<String>,
    status: Option<StatusCode>,
}

impl SerializeNode {
    pub fn new(ty: SerializerType) -> Self {
        Self {
            ty,
            parameters: ParameterTemplates::default(),
            mime_type: None,
            status: None,
        }
    }

    pub fn with_parameters(mut self, parameters: ParameterTemplates) -> Self {
        self.parameters = parameters;
        self
    }

    /// Overrides the serializer's own mime type.
    pub fn with_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = Some(mime_type.into());
        self
    }

    pub fn with_status(mut self, status: StatusCode) -> Self {
        self.status = Some(status);
        self
    }
}

impl ProcessingNode for SerializeNode {
    fn invoke(&self, env: &mut Environment, ctx: &mut InvokeContext<'_>) -> Result<bool, ProcessingError> {
        let parameters = ctx.resolve_parameters(&self.parameters);
        ctx.pipeline()
            .set_serializer(self.ty.clone(), parameters, self.mime_type.clone())?;
        if let Some(status) = self.status {
            env.set_status(status);
        }
        ctx.complete(env)?;
        Ok(true)
    }
}

pub struct ReadNode {
    ty: ReaderType,
    src: Option<VariableResolver>,
    parameters: ParameterTemplates,
    mime_type: Option<String>,
}

impl ReadNode {
    pub fn new(ty: ReaderType) -> Self {
        Self {
            ty,
            src: None,
            parameters: ParameterTemplates::default(),
            mime_type: None,
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

    pub fn with_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = Some(mime_type.into());
        self
    }
}

impl ProcessingNode for ReadNode {
    fn invoke(&self, env: &mut Environment, ctx: &mut InvokeContext<'_>) -> Result<bool, ProcessingError> {
        let src = resolve_src(ctx, &self.src);
        let parameters = ctx.resolve_parameters(&self.parameters);
        ctx.pipeline()
            .set_reader(self.ty.clone(), src, parameters, self.mime_type.clone())?;
        ctx.complete(env)?;
        Ok(true)
    }
}
