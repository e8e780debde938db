//! Stage contracts and the structured event stream flowing between them.

use std::{io::Write, sync::Arc};

use serde::{Deserialize, Serialize};

use crate::cache::Validity;
use crate::environment::Environment;
use crate::error::ProcessingError;
use crate::parameters::Parameters;

/// One structured markup event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    StartDocument,
    EndDocument,
    StartElement {
        name: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        attributes: Vec<(String, String)>,
    },
    EndElement {
        name: String,
    },
    Characters {
        text: String,
    },
    Comment {
        text: String,
    },
    ProcessingInstruction {
        target: String,
        data: String,
    },
}

impl Event {
    pub fn start(name: impl Into<String>) -> Self {
        Self::StartElement {
            name: name.into(),
            attributes: Vec::new(),
        }
    }

    pub fn start_with(name: impl Into<String>, attributes: Vec<(String, String)>) -> Self {
        Self::StartElement {
            name: name.into(),
            attributes,
        }
    }

    pub fn end(name: impl Into<String>) -> Self {
        Self::EndElement { name: name.into() }
    }

    pub fn text(text: impl Into<String>) -> Self {
        Self::Characters { text: text.into() }
    }
}

/// Receiver of an event stream: the next transformer, a serializer, or a
/// caller-supplied consumer.
pub trait EventSink {
    fn event(&mut self, event: Event) -> Result<(), ProcessingError>;
}

impl EventSink for Vec<Event> {
    fn event(&mut self, event: Event) -> Result<(), ProcessingError> {
        self.push(event);
        Ok(())
    }
}

/// What a stage sees when it is set up for a request.
pub struct StageContext<'a> {
    pub env: &'a Environment,
    pub src: Option<&'a str>,
    pub params: &'a Parameters,
}

/// Behaviour shared by every stage kind.
///
/// A stage instance serves exactly one request. It is created by its registry
/// factory, set up once, then driven by the pipeline.
pub trait Stage: Send {
    fn setup(&mut self, _ctx: &StageContext<'_>) -> Result<(), ProcessingError> {
        Ok(())
    }

    /// Validity of the content this stage contributes, if it can describe one.
    /// A stage returning `None` makes the whole pipeline uncacheable under the
    /// stage-validity policy.
    fn validity(&self) -> Option<Arc<dyn Validity>> {
        None
    }
}

/// Produces the event stream.
pub trait Generator: Stage {
    fn generate(&mut self, sink: &mut dyn EventSink) -> Result<(), ProcessingError>;
}

/// Rewrites events on their way downstream.
pub trait Transformer: Stage {
    fn transform(&mut self, event: Event, next: &mut dyn EventSink) -> Result<(), ProcessingError>;
}

/// Turns events into bytes.
pub trait Serializer: Stage {
    fn mime_type(&self) -> Option<String> {
        None
    }

    fn serialize(&mut self, event: Event, out: &mut dyn Write) -> Result<(), ProcessingError>;
}

/// Produces bytes directly, bypassing the event model.
pub trait Reader: Stage {
    fn mime_type(&self) -> Option<String> {
        None
    }

    fn read(&mut self, out: &mut dyn Write) -> Result<(), ProcessingError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_serialize_with_a_type_tag() {
        let json = serde_json::to_string(&Event::start("page")).expect("serialize");
        assert_eq!(json, r#"{"type":"start_element","name":"page"}"#);

        let parsed: Event =
            serde_json::from_str(r#"{"type":"characters","text":"hi"}"#).expect("deserialize");
        assert_eq!(parsed, Event::text("hi"));
    }
}
