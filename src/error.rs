use std::{error::Error as StdError, io};

use thiserror::Error;

use crate::registry::ComponentKind;

type BoxedSource = Box<dyn StdError + Send + Sync + 'static>;

/// Errors surfaced while compiling or executing a sitemap.
///
/// A request that matches nothing is not an error: traversal reports it as
/// `Ok(false)`.
#[derive(Debug, Error)]
pub enum ProcessingError {
    #[error("configuration error: {0}")]
    Configuration(#[from] ConfigurationError),
    #[error("pipeline misconfigured: {0}")]
    PipelineConfiguration(#[from] PipelineConfigurationError),
    /// The client went away while output was being written to it. Only the
    /// pipeline's output writer raises this; I/O failures inside stages are
    /// `Processing`.
    #[error("client connection reset while writing output")]
    ConnectionReset(#[source] io::Error),
    #[error("no pipeline matched `{uri}`")]
    ResourceNotFound { uri: String },
    #[error("processing failed: {message}")]
    Processing {
        message: String,
        #[source]
        source: Option<BoxedSource>,
    },
}

impl ProcessingError {
    pub fn processing(message: impl Into<String>) -> Self {
        Self::Processing {
            message: message.into(),
            source: None,
        }
    }

    pub fn with_source(message: impl Into<String>, source: impl Into<BoxedSource>) -> Self {
        Self::Processing {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    pub fn not_found(uri: impl Into<String>) -> Self {
        Self::ResourceNotFound { uri: uri.into() }
    }

    /// True when the client went away mid-response.
    pub fn is_connection_reset(&self) -> bool {
        matches!(self, Self::ConnectionReset(_))
    }
}

impl From<io::Error> for ProcessingError {
    fn from(error: io::Error) -> Self {
        Self::with_source("i/o failure while processing", error)
    }
}

impl From<serde_json::Error> for ProcessingError {
    fn from(error: serde_json::Error) -> Self {
        Self::with_source("captured event stream could not be decoded", error)
    }
}

/// Error kinds that mean the peer closed the connection.
pub(crate) fn is_disconnect(error: &io::Error) -> bool {
    matches!(
        error.kind(),
        io::ErrorKind::BrokenPipe | io::ErrorKind::ConnectionReset | io::ErrorKind::ConnectionAborted
    )
}

/// Malformed or incomplete sitemap definitions. Fatal at build time.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigurationError {
    #[error("unknown {kind} type `{name}`")]
    UnknownComponent { kind: ComponentKind, name: String },
    #[error("no default {kind} type declared")]
    NoDefault { kind: ComponentKind },
    #[error("invalid pattern `{pattern}`: {reason}")]
    InvalidPattern { pattern: String, reason: String },
    #[error("invalid variable expression `{expression}`: {reason}")]
    InvalidExpression { expression: String, reason: String },
    #[error("component registry has been disposed")]
    RegistryDisposed,
    #[error("tree processor for `{uri}` has been disposed")]
    ProcessorDisposed { uri: String },
    #[error("failed to build sitemap `{uri}`: {reason}")]
    Build { uri: String, reason: String },
}

impl ConfigurationError {
    pub fn build(uri: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Build {
            uri: uri.into(),
            reason: reason.into(),
        }
    }
}

/// Misuse of the pipeline assembly contract. Always a bug in the sitemap or
/// the caller, never retried.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PipelineConfigurationError {
    #[error("a content source is already set on this pipeline")]
    SourceAlreadySet,
    #[error("cannot {operation}: pipeline is already sealed")]
    Sealed { operation: &'static str },
    #[error("cannot {operation}: pipeline has no generator")]
    NoGenerator { operation: &'static str },
    #[error("pipeline has no content source")]
    NoSource,
    #[error("pipeline has no serializer")]
    NotSealed,
    #[error("pipeline has not been prepared")]
    NotPrepared,
    #[error("pipeline has already been executed; recycle it first")]
    AlreadyExecuted,
    #[error("no output stream was supplied to execute the pipeline")]
    MissingOutput,
    #[error("a reader pipeline cannot stream events")]
    ReaderHasNoEvents,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disconnect_kinds_are_recognised() {
        for kind in [
            io::ErrorKind::BrokenPipe,
            io::ErrorKind::ConnectionReset,
            io::ErrorKind::ConnectionAborted,
        ] {
            assert!(is_disconnect(&io::Error::new(kind, "gone")), "{kind:?}");
        }
        assert!(!is_disconnect(&io::Error::from(io::ErrorKind::NotFound)));
    }

    #[test]
    fn converted_io_errors_are_never_client_resets() {
        let error = ProcessingError::from(io::Error::from(io::ErrorKind::ConnectionReset));
        assert!(!error.is_connection_reset());
        assert!(matches!(error, ProcessingError::Processing { .. }));
    }

    #[test]
    fn other_io_errors_are_processing_failures() {
        let error = ProcessingError::from(io::Error::other("disk on fire"));
        assert!(matches!(error, ProcessingError::Processing { .. }));
        assert!(StdError::source(&error).is_some());
    }

    #[test]
    fn configuration_error_names_component_kind() {
        let error = ConfigurationError::UnknownComponent {
            kind: ComponentKind::Generator,
            name: "file".to_string(),
        };
        assert_eq!(error.to_string(), "unknown generator type `file`");
    }
}
