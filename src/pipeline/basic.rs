use std::io::Write;

use tracing::instrument;

use super::assembly::{Assembly, execute_serialized};
use super::chain::{ClientOutput, absorb_disconnect, run_into};
use super::{EventSink, OutputTarget, PipelineState, ProcessingPipeline};
use crate::environment::Environment;
use crate::error::{PipelineConfigurationError, ProcessingError};
use crate::parameters::Parameters;
use crate::registry::{GeneratorType, ReaderType, SerializerType, TransformerType};

/// Pipeline that always runs its stages.
#[derive(Default)]
pub struct BasicPipeline {
    assembly: Assembly,
    byte_ranges: bool,
}

impl BasicPipeline {
    pub fn new(byte_ranges: bool) -> Self {
        Self {
            assembly: Assembly::default(),
            byte_ranges,
        }
    }
}

impl ProcessingPipeline for BasicPipeline {
    fn set_parameters(&mut self, parameters: Parameters) {
        self.assembly.set_parameters(parameters);
    }

    fn parameters(&self) -> &Parameters {
        self.assembly.parameters()
    }

    fn set_generator(
        &mut self,
        ty: GeneratorType,
        src: Option<String>,
        params: Parameters,
    ) -> Result<(), PipelineConfigurationError> {
        self.assembly.set_generator(ty, src, params)
    }

    fn set_reader(
        &mut self,
        ty: ReaderType,
        src: Option<String>,
        params: Parameters,
        mime_type: Option<String>,
    ) -> Result<(), PipelineConfigurationError> {
        self.assembly.set_reader(ty, src, params, mime_type)
    }

    fn add_transformer(
        &mut self,
        ty: TransformerType,
        src: Option<String>,
        params: Parameters,
    ) -> Result<(), PipelineConfigurationError> {
        self.assembly.add_transformer(ty, src, params)
    }

    fn set_serializer(
        &mut self,
        ty: SerializerType,
        params: Parameters,
        mime_type: Option<String>,
    ) -> Result<(), PipelineConfigurationError> {
        self.assembly.set_serializer(ty, params, mime_type)
    }

    fn prepare(&mut self, env: &mut Environment, target: OutputTarget) -> Result<(), ProcessingError> {
        self.assembly.setup(env, target)
    }

    #[instrument(skip_all, fields(uri = %env.uri(), pipeline = "noncaching"))]
    fn process(&mut self, env: &mut Environment, out: &mut dyn Write) -> Result<(), ProcessingError> {
        self.assembly.ensure_prepared(env, OutputTarget::Serialized)?;
        let mut client = ClientOutput::new(out);
        let result = execute_serialized(&mut self.assembly, env, &mut client, self.byte_ranges);
        absorb_disconnect(client.classify(result))
    }

    #[instrument(skip_all, fields(uri = %env.uri(), pipeline = "noncaching"))]
    fn process_events(
        &mut self,
        env: &mut Environment,
        consumer: &mut dyn EventSink,
    ) -> Result<(), ProcessingError> {
        self.assembly.ensure_prepared(env, OutputTarget::Events)?;
        let stages = self.assembly.begin_execution()?;
        run_into(stages, consumer, None)
    }

    fn recycle(&mut self) {
        self.assembly.recycle();
    }

    fn state(&self) -> PipelineState {
        self.assembly.state()
    }

    fn mime_type(&self) -> Option<&str> {
        self.assembly.mime_type()
    }
}

#[cfg(test)]
mod tests {
    use std::io;

    use super::*;
    use crate::pipeline::{Event, Generator, Reader, Serializer, Stage};

    struct Greeting;

    impl Stage for Greeting {}

    impl Generator for Greeting {
        fn generate(&mut self, sink: &mut dyn EventSink) -> Result<(), ProcessingError> {
            sink.event(Event::StartDocument)?;
            sink.event(Event::text("hello"))?;
            sink.event(Event::EndDocument)
        }
    }

    /// Emits some text, then loses its upstream connection.
    struct Severed;

    impl Stage for Severed {}

    impl Generator for Severed {
        fn generate(&mut self, sink: &mut dyn EventSink) -> Result<(), ProcessingError> {
            sink.event(Event::text("partial"))?;
            Err(io::Error::from(io::ErrorKind::ConnectionReset).into())
        }
    }

    struct Plain;

    impl Stage for Plain {}

    impl Serializer for Plain {
        fn mime_type(&self) -> Option<String> {
            Some("text/plain".to_string())
        }

        fn serialize(&mut self, event: Event, out: &mut dyn Write) -> Result<(), ProcessingError> {
            if let Event::Characters { text } = event {
                out.write_all(text.as_bytes())?;
            }
            Ok(())
        }
    }

    struct Digits;

    impl Stage for Digits {}

    impl Reader for Digits {
        fn read(&mut self, out: &mut dyn Write) -> Result<(), ProcessingError> {
            out.write_all(b"0123456789")?;
            Ok(())
        }
    }

    struct Gone;

    impl Write for Gone {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::Error::from(io::ErrorKind::BrokenPipe))
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn generator() -> GeneratorType {
        GeneratorType::new("greeting", || Box::new(Greeting) as Box<dyn Generator>)
    }

    fn serializer() -> SerializerType {
        SerializerType::new("plain", || Box::new(Plain) as Box<dyn Serializer>)
    }

    fn reader() -> ReaderType {
        ReaderType::new("digits", || Box::new(Digits) as Box<dyn Reader>)
    }

    fn transformer() -> TransformerType {
        TransformerType::new("noop", || unreachable!("never instantiated"))
    }

    #[test]
    fn second_source_is_rejected() {
        let mut pipeline = BasicPipeline::new(false);
        pipeline.set_generator(generator(), None, Parameters::new()).expect("first");

        let err = pipeline
            .set_generator(generator(), None, Parameters::new())
            .expect_err("second generator");
        assert_eq!(err, PipelineConfigurationError::SourceAlreadySet);

        let err = pipeline
            .set_reader(reader(), None, Parameters::new(), None)
            .expect_err("reader after generator");
        assert_eq!(err, PipelineConfigurationError::SourceAlreadySet);
    }

    #[test]
    fn sealed_pipeline_rejects_further_stages() {
        let mut pipeline = BasicPipeline::new(false);
        pipeline.set_generator(generator(), None, Parameters::new()).expect("generator");
        pipeline.set_serializer(serializer(), Parameters::new(), None).expect("serializer");
        assert_eq!(pipeline.state(), PipelineState::Connected);

        let err = pipeline
            .add_transformer(transformer(), None, Parameters::new())
            .expect_err("sealed");
        assert!(matches!(err, PipelineConfigurationError::Sealed { .. }));
        let err = pipeline
            .set_serializer(serializer(), Parameters::new(), None)
            .expect_err("sealed");
        assert!(matches!(err, PipelineConfigurationError::Sealed { .. }));
    }

    #[test]
    fn stages_need_a_generator_first() {
        let mut pipeline = BasicPipeline::new(false);
        let err = pipeline
            .add_transformer(transformer(), None, Parameters::new())
            .expect_err("no generator");
        assert!(matches!(err, PipelineConfigurationError::NoGenerator { .. }));
        let err = pipeline
            .set_serializer(serializer(), Parameters::new(), None)
            .expect_err("no generator");
        assert!(matches!(err, PipelineConfigurationError::NoGenerator { .. }));
    }

    #[test]
    fn unsealed_pipeline_cannot_run() {
        let mut env = Environment::new("page");
        let mut pipeline = BasicPipeline::new(false);
        pipeline.set_generator(generator(), None, Parameters::new()).expect("generator");

        let err = pipeline.process(&mut env, &mut Vec::new()).expect_err("not sealed");
        assert!(matches!(
            err,
            ProcessingError::PipelineConfiguration(PipelineConfigurationError::NotSealed)
        ));
    }

    #[test]
    fn process_sets_content_type_and_writes_output() {
        let mut env = Environment::new("page");
        let mut pipeline = BasicPipeline::new(false);
        pipeline.set_generator(generator(), None, Parameters::new()).expect("generator");
        pipeline.set_serializer(serializer(), Parameters::new(), None).expect("serializer");

        let mut out = Vec::new();
        pipeline.process(&mut env, &mut out).expect("process");

        assert_eq!(out, b"hello");
        assert_eq!(env.response_header("content-type"), Some("text/plain"));
        assert_eq!(pipeline.state(), PipelineState::Executed);

        let err = pipeline.process(&mut env, &mut Vec::new()).expect_err("executed");
        assert!(matches!(
            err,
            ProcessingError::PipelineConfiguration(PipelineConfigurationError::AlreadyExecuted)
        ));
    }

    #[test]
    fn recycled_pipeline_accepts_a_new_assembly() {
        let mut env = Environment::new("page");
        let mut pipeline = BasicPipeline::new(false);
        pipeline.set_reader(reader(), None, Parameters::new(), None).expect("reader");
        pipeline.process(&mut env, &mut Vec::new()).expect("process");

        pipeline.recycle();
        assert_eq!(pipeline.state(), PipelineState::Empty);
        pipeline.set_generator(generator(), None, Parameters::new()).expect("generator");
    }

    #[test]
    fn reader_pipelines_have_no_event_stream() {
        let mut env = Environment::new("file");
        let mut pipeline = BasicPipeline::new(false);
        pipeline.set_reader(reader(), None, Parameters::new(), None).expect("reader");

        let err = pipeline
            .process_events(&mut env, &mut Vec::new())
            .expect_err("reader");
        assert!(matches!(
            err,
            ProcessingError::PipelineConfiguration(PipelineConfigurationError::ReaderHasNoEvents)
        ));
    }

    #[test]
    fn event_consumer_receives_the_generated_stream() {
        let mut env = Environment::new("page");
        let mut pipeline = BasicPipeline::new(false);
        pipeline.set_generator(generator(), None, Parameters::new()).expect("generator");
        pipeline.set_serializer(serializer(), Parameters::new(), None).expect("serializer");

        let mut events = Vec::new();
        pipeline.process_events(&mut env, &mut events).expect("events");
        assert_eq!(
            events,
            vec![Event::StartDocument, Event::text("hello"), Event::EndDocument]
        );
    }

    #[test]
    fn client_disconnect_is_not_an_error() {
        let mut env = Environment::new("file");
        let mut pipeline = BasicPipeline::new(false);
        pipeline.set_reader(reader(), None, Parameters::new(), None).expect("reader");

        pipeline.process(&mut env, &mut Gone).expect("disconnect absorbed");
    }

    #[test]
    fn upstream_reset_on_a_healthy_client_is_a_processing_failure() {
        let mut env = Environment::new("page");
        let mut pipeline = BasicPipeline::new(false);
        let severed = GeneratorType::new("severed", || Box::new(Severed) as Box<dyn Generator>);
        pipeline.set_generator(severed, None, Parameters::new()).expect("generator");
        pipeline.set_serializer(serializer(), Parameters::new(), None).expect("serializer");

        let mut out = Vec::new();
        let err = pipeline.process(&mut env, &mut out).expect_err("upstream failure");
        assert!(matches!(err, ProcessingError::Processing { .. }));
        assert_eq!(out, b"partial");
    }

    #[test]
    fn byte_range_is_honoured_when_enabled() {
        let mut env = Environment::new("file").with_header(http::header::RANGE, "bytes=2-4");
        let mut pipeline = BasicPipeline::new(true);
        pipeline.set_reader(reader(), None, Parameters::new(), None).expect("reader");

        let mut out = Vec::new();
        pipeline.process(&mut env, &mut out).expect("process");

        assert_eq!(out, b"234");
        assert_eq!(env.status(), http::StatusCode::PARTIAL_CONTENT);
        assert_eq!(env.response_header("content-range"), Some("bytes 2-4/10"));
    }
}
