use std::{io::Write, sync::Arc};

use http::header;
use tracing::debug;

use super::chain::{self, Stages};
use super::range::{self, ByteRange};
use super::stage::{Generator, Reader, Serializer, StageContext, Transformer};
use super::{OutputTarget, PipelineState};
use crate::cache::Validity;
use crate::environment::Environment;
use crate::error::{PipelineConfigurationError, ProcessingError};
use crate::parameters::Parameters;
use crate::registry::{GeneratorType, ReaderType, SerializerType, StageType, TransformerType};

struct Declared<T: ?Sized> {
    ty: StageType<T>,
    src: Option<String>,
    params: Parameters,
}

impl<T: ?Sized> Declared<T> {
    fn context<'a>(&'a self, env: &'a Environment) -> StageContext<'a> {
        StageContext {
            env,
            src: self.src.as_deref(),
            params: &self.params,
        }
    }
}

enum Source {
    Generator(Declared<dyn Generator>),
    Reader {
        stage: Declared<dyn Reader>,
        mime_type: Option<String>,
    },
}

/// Declared stages plus, once prepared, their per-request instances.
///
/// Both pipeline flavours compose this; it owns the assembly contract and the
/// state machine behind it.
#[derive(Default)]
pub(crate) struct Assembly {
    state: PipelineState,
    parameters: Parameters,
    source: Option<Source>,
    transformers: Vec<Declared<dyn Transformer>>,
    serializer: Option<(Declared<dyn Serializer>, Option<String>)>,
    stages: Option<Stages>,
    mime_type: Option<String>,
}

impl Assembly {
    pub(crate) fn state(&self) -> PipelineState {
        self.state
    }

    pub(crate) fn parameters(&self) -> &Parameters {
        &self.parameters
    }

    pub(crate) fn set_parameters(&mut self, parameters: Parameters) {
        self.parameters = parameters;
    }

    pub(crate) fn mime_type(&self) -> Option<&str> {
        self.mime_type.as_deref()
    }

    pub(crate) fn is_reader(&self) -> bool {
        matches!(self.source, Some(Source::Reader { .. }))
    }

    /// Name of the stage that produces the bytes: serializer or reader.
    pub(crate) fn terminal_name(&self) -> &str {
        match (&self.source, &self.serializer) {
            (Some(Source::Reader { stage, .. }), _) => stage.ty.name(),
            (_, Some((serializer, _))) => serializer.ty.name(),
            _ => "",
        }
    }

    pub(crate) fn set_generator(
        &mut self,
        ty: GeneratorType,
        src: Option<String>,
        params: Parameters,
    ) -> Result<(), PipelineConfigurationError> {
        self.check_source_slot("set generator")?;
        self.source = Some(Source::Generator(Declared { ty, src, params }));
        self.state = PipelineState::Sourced;
        Ok(())
    }

    pub(crate) fn set_reader(
        &mut self,
        ty: ReaderType,
        src: Option<String>,
        params: Parameters,
        mime_type: Option<String>,
    ) -> Result<(), PipelineConfigurationError> {
        self.check_source_slot("set reader")?;
        self.source = Some(Source::Reader {
            stage: Declared { ty, src, params },
            mime_type,
        });
        self.state = PipelineState::Connected;
        Ok(())
    }

    pub(crate) fn add_transformer(
        &mut self,
        ty: TransformerType,
        src: Option<String>,
        params: Parameters,
    ) -> Result<(), PipelineConfigurationError> {
        self.check_generator("add transformer")?;
        self.transformers.push(Declared { ty, src, params });
        Ok(())
    }

    pub(crate) fn set_serializer(
        &mut self,
        ty: SerializerType,
        params: Parameters,
        mime_type: Option<String>,
    ) -> Result<(), PipelineConfigurationError> {
        self.check_generator("set serializer")?;
        self.serializer = Some((
            Declared {
                ty,
                src: None,
                params,
            },
            mime_type,
        ));
        self.state = PipelineState::Connected;
        Ok(())
    }

    fn check_source_slot(&self, operation: &'static str) -> Result<(), PipelineConfigurationError> {
        match self.state {
            PipelineState::Empty => Ok(()),
            PipelineState::Sourced => Err(PipelineConfigurationError::SourceAlreadySet),
            _ => Err(PipelineConfigurationError::Sealed { operation }),
        }
    }

    fn check_generator(&self, operation: &'static str) -> Result<(), PipelineConfigurationError> {
        match self.state {
            PipelineState::Sourced => Ok(()),
            PipelineState::Empty => Err(PipelineConfigurationError::NoGenerator { operation }),
            _ => Err(PipelineConfigurationError::Sealed { operation }),
        }
    }

    /// Instantiate and set up every stage for `target`.
    pub(crate) fn setup(&mut self, env: &Environment, target: OutputTarget) -> Result<(), ProcessingError> {
        match self.state {
            PipelineState::Empty => return Err(PipelineConfigurationError::NoSource.into()),
            PipelineState::Sourced => return Err(PipelineConfigurationError::NotSealed.into()),
            PipelineState::Executed => return Err(PipelineConfigurationError::AlreadyExecuted.into()),
            PipelineState::Connected | PipelineState::Prepared(_) => {}
        }

        let (stages, mime_type) = match (&self.source, &self.serializer) {
            (Some(Source::Reader { stage, mime_type }), _) => {
                if target == OutputTarget::Events {
                    return Err(PipelineConfigurationError::ReaderHasNoEvents.into());
                }
                let mut reader = stage.ty.instantiate();
                reader.setup(&stage.context(env))?;
                let mime = mime_type.clone().or_else(|| reader.mime_type());
                (Stages::Reader(reader), mime)
            }
            (Some(Source::Generator(declared)), Some((serializer_decl, mime_type))) => {
                let mut generator = declared.ty.instantiate();
                generator.setup(&declared.context(env))?;

                let mut transformers = Vec::with_capacity(self.transformers.len());
                for declared in &self.transformers {
                    let mut transformer = declared.ty.instantiate();
                    transformer.setup(&declared.context(env))?;
                    transformers.push(transformer);
                }

                let mut serializer = serializer_decl.ty.instantiate();
                serializer.setup(&serializer_decl.context(env))?;
                let mime = mime_type.clone().or_else(|| serializer.mime_type());

                (
                    Stages::Events {
                        generator,
                        transformers,
                        serializer,
                    },
                    mime,
                )
            }
            (Some(Source::Generator(_)), None) => {
                return Err(PipelineConfigurationError::NotSealed.into());
            }
            (None, _) => return Err(PipelineConfigurationError::NoSource.into()),
        };

        debug!(
            terminal = self.terminal_name(),
            transformers = self.transformers.len(),
            target = ?target,
            "Pipeline prepared"
        );
        self.stages = Some(stages);
        self.mime_type = mime_type;
        self.state = PipelineState::Prepared(target);
        Ok(())
    }

    pub(crate) fn ensure_prepared(
        &mut self,
        env: &Environment,
        target: OutputTarget,
    ) -> Result<(), ProcessingError> {
        if self.state == PipelineState::Prepared(target) {
            return Ok(());
        }
        self.setup(env, target)
    }

    /// Validities of every prepared stage in chain order, or `None` when any
    /// stage cannot describe one.
    pub(crate) fn stage_validities(&self) -> Option<Vec<Arc<dyn Validity>>> {
        match self.stages.as_ref()? {
            Stages::Reader(reader) => Some(vec![reader.validity()?]),
            Stages::Events {
                generator,
                transformers,
                serializer,
            } => {
                let mut validities = Vec::with_capacity(transformers.len() + 2);
                validities.push(generator.validity()?);
                for transformer in transformers {
                    validities.push(transformer.validity()?);
                }
                validities.push(serializer.validity()?);
                Some(validities)
            }
        }
    }

    /// Move to `Executed` and hand out the stages to run.
    pub(crate) fn begin_execution(&mut self) -> Result<&mut Stages, PipelineConfigurationError> {
        match self.state {
            PipelineState::Prepared(_) => {}
            PipelineState::Executed => return Err(PipelineConfigurationError::AlreadyExecuted),
            _ => return Err(PipelineConfigurationError::NotPrepared),
        }
        self.state = PipelineState::Executed;
        self.stages
            .as_mut()
            .ok_or(PipelineConfigurationError::NotPrepared)
    }

    pub(crate) fn apply_content_type(&self, env: &mut Environment) {
        if let Some(mime_type) = self.mime_type.as_deref() {
            env.set_content_type(mime_type);
        }
    }

    pub(crate) fn recycle(&mut self) {
        *self = Assembly::default();
    }
}

/// Run a prepared assembly into `out`, honouring a single byte range when
/// enabled. Ranged output is buffered so the total length is known.
pub(crate) fn execute_serialized(
    assembly: &mut Assembly,
    env: &mut Environment,
    out: &mut dyn Write,
    byte_ranges: bool,
) -> Result<(), ProcessingError> {
    assembly.apply_content_type(env);
    let range = if byte_ranges {
        env.set_header(header::ACCEPT_RANGES, "bytes");
        ByteRange::from_env(env)
    } else {
        None
    };

    let stages = assembly.begin_execution()?;
    match range {
        Some(range) => {
            let mut buffer = Vec::new();
            chain::run_serialized(stages, &mut buffer)?;
            range::write_range(env, range, &buffer, out)
        }
        None => {
            chain::run_serialized(stages, out)?;
            out.flush()?;
            Ok(())
        }
    }
}
