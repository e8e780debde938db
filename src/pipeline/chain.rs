//! Wiring of instantiated stages into a running chain.
//!
//! Each transformer hands events to the rest of the slice; the last link is
//! either the serializer writing to the response or a caller's consumer.

use std::io::{self, Write};

use bytes::Bytes;
use tracing::debug;

use super::stage::{Event, EventSink, Generator, Reader, Serializer, Transformer};
use crate::error::{PipelineConfigurationError, ProcessingError, is_disconnect};

/// Stage instances created for one request.
pub(crate) enum Stages {
    Events {
        generator: Box<dyn Generator>,
        transformers: Vec<Box<dyn Transformer>>,
        serializer: Box<dyn Serializer>,
    },
    Reader(Box<dyn Reader>),
}

struct Downstream<'a, 't> {
    transformers: &'a mut [Box<dyn Transformer>],
    terminal: &'a mut (dyn EventSink + 't),
}

impl EventSink for Downstream<'_, '_> {
    fn event(&mut self, event: Event) -> Result<(), ProcessingError> {
        match self.transformers.split_first_mut() {
            Some((head, rest)) => {
                let mut next = Downstream {
                    transformers: rest,
                    terminal: &mut *self.terminal,
                };
                head.transform(event, &mut next)
            }
            None => self.terminal.event(event),
        }
    }
}

pub(crate) struct SerializerSink<'a, 'o> {
    serializer: &'a mut Box<dyn Serializer>,
    out: &'a mut (dyn Write + 'o),
}

impl EventSink for SerializerSink<'_, '_> {
    fn event(&mut self, event: Event) -> Result<(), ProcessingError> {
        self.serializer.serialize(event, &mut *self.out)
    }
}

/// Copies every event into `events` before passing it on.
struct Recording<'a, 'n> {
    events: &'a mut Vec<Event>,
    next: &'a mut (dyn EventSink + 'n),
}

impl EventSink for Recording<'_, '_> {
    fn event(&mut self, event: Event) -> Result<(), ProcessingError> {
        self.events.push(event.clone());
        self.next.event(event)
    }
}

/// Writer that forwards to the response and keeps a copy of what was accepted,
/// up to `limit` bytes.
pub(crate) struct ByteTee<'a, 'o> {
    out: &'a mut (dyn Write + 'o),
    captured: Vec<u8>,
    limit: usize,
    overflowed: bool,
}

impl<'a, 'o> ByteTee<'a, 'o> {
    pub(crate) fn new(out: &'a mut (dyn Write + 'o), limit: usize) -> Self {
        Self {
            out,
            captured: Vec::new(),
            limit,
            overflowed: false,
        }
    }

    /// The captured bytes, or `None` when the output outgrew the limit.
    pub(crate) fn into_captured(self) -> Option<Bytes> {
        (!self.overflowed).then(|| Bytes::from(self.captured))
    }
}

impl Write for ByteTee<'_, '_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let written = self.out.write(buf)?;
        if !self.overflowed {
            if self.captured.len() + written > self.limit {
                self.overflowed = true;
                self.captured = Vec::new();
            } else {
                self.captured.extend_from_slice(&buf[..written]);
            }
        }
        Ok(written)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.out.flush()
    }
}

/// Run the whole chain into `out`.
pub(crate) fn run_serialized(stages: &mut Stages, out: &mut dyn Write) -> Result<(), ProcessingError> {
    match stages {
        Stages::Reader(reader) => reader.read(out)?,
        Stages::Events {
            generator,
            transformers,
            serializer,
        } => {
            let mut terminal = SerializerSink { serializer, out };
            let mut chain = Downstream {
                transformers: transformers.as_mut_slice(),
                terminal: &mut terminal,
            };
            generator.generate(&mut chain)?;
        }
    }
    Ok(())
}

/// Run the chain into `out`, recording the events that reach the serializer.
pub(crate) fn run_recording(
    stages: &mut Stages,
    out: &mut dyn Write,
    events: &mut Vec<Event>,
) -> Result<(), ProcessingError> {
    let Stages::Events {
        generator,
        transformers,
        serializer,
    } = stages
    else {
        return Err(PipelineConfigurationError::ReaderHasNoEvents.into());
    };

    let mut terminal = SerializerSink { serializer, out };
    let mut recording = Recording {
        events,
        next: &mut terminal,
    };
    let mut chain = Downstream {
        transformers: transformers.as_mut_slice(),
        terminal: &mut recording,
    };
    generator.generate(&mut chain)
}

/// Run the chain with `consumer` replacing the serializer. When `events` is
/// given, the stream is recorded as well.
pub(crate) fn run_into(
    stages: &mut Stages,
    consumer: &mut dyn EventSink,
    events: Option<&mut Vec<Event>>,
) -> Result<(), ProcessingError> {
    let Stages::Events {
        generator,
        transformers,
        ..
    } = stages
    else {
        return Err(PipelineConfigurationError::ReaderHasNoEvents.into());
    };

    match events {
        Some(events) => {
            let mut recording = Recording {
                events,
                next: consumer,
            };
            let mut chain = Downstream {
                transformers: transformers.as_mut_slice(),
                terminal: &mut recording,
            };
            generator.generate(&mut chain)
        }
        None => {
            let mut chain = Downstream {
                transformers: transformers.as_mut_slice(),
                terminal: consumer,
            };
            generator.generate(&mut chain)
        }
    }
}

/// Feed a previously captured event stream through this request's serializer.
pub(crate) fn replay_serialized(
    stages: &mut Stages,
    payload: &[u8],
    out: &mut dyn Write,
) -> Result<(), ProcessingError> {
    let Stages::Events { serializer, .. } = stages else {
        return Err(PipelineConfigurationError::ReaderHasNoEvents.into());
    };
    let mut sink = SerializerSink { serializer, out };
    replay(payload, &mut sink)
}

pub(crate) fn encode_events(events: &[Event]) -> Result<Bytes, ProcessingError> {
    Ok(Bytes::from(serde_json::to_vec(events)?))
}

pub(crate) fn replay(payload: &[u8], sink: &mut dyn EventSink) -> Result<(), ProcessingError> {
    let events: Vec<Event> = serde_json::from_slice(payload)?;
    for event in events {
        sink.event(event)?;
    }
    Ok(())
}

/// The client's response stream. Records a disconnect seen on write or flush
/// so a failed run can be attributed to the client rather than a stage.
pub(crate) struct ClientOutput<'a, 'o> {
    out: &'a mut (dyn Write + 'o),
    disconnect: Option<io::ErrorKind>,
}

impl<'a, 'o> ClientOutput<'a, 'o> {
    pub(crate) fn new(out: &'a mut (dyn Write + 'o)) -> Self {
        Self {
            out,
            disconnect: None,
        }
    }

    fn observe<T>(&mut self, result: io::Result<T>) -> io::Result<T> {
        if let Err(error) = &result {
            if is_disconnect(error) {
                self.disconnect = Some(error.kind());
            }
        }
        result
    }

    /// `result` of a run that wrote to this output. A failure after the client
    /// disconnected becomes `ConnectionReset`; anything else is left as is.
    pub(crate) fn classify(self, result: Result<(), ProcessingError>) -> Result<(), ProcessingError> {
        match (result, self.disconnect) {
            (Err(_), Some(kind)) => Err(ProcessingError::ConnectionReset(io::Error::from(kind))),
            (result, _) => result,
        }
    }
}

impl Write for ClientOutput<'_, '_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let result = self.out.write(buf);
        self.observe(result)
    }

    fn flush(&mut self) -> io::Result<()> {
        let result = self.out.flush();
        self.observe(result)
    }
}

/// A client that went away is not a processing failure: the response is
/// simply abandoned.
pub(crate) fn absorb_disconnect(result: Result<(), ProcessingError>) -> Result<(), ProcessingError> {
    match result {
        Err(ProcessingError::ConnectionReset(error)) => {
            debug!(error = %error, "Client disconnected, response abandoned");
            Ok(())
        }
        other => other,
    }
}
