//! Error types for the todoflow pipeline.
//!
//! Configuration and lookup errors are static defects: they are fatal at
//! startup or assembly time and never retried. Transport and stage errors
//! are handled uniformly by the checkpoint-and-restart substrate.

use crate::config::TopicKind;
use thiserror::Error;

/// The main error type for todoflow operations.
#[derive(Debug, Error)]
pub enum TodoflowError {
    /// A configuration error occurred.
    #[error("{0}")]
    Configuration(#[from] ConfigurationError),

    /// A topic role lookup failed.
    #[error("{0}")]
    Lookup(#[from] LookupError),

    /// The pipeline could not be assembled.
    #[error("{0}")]
    Assembly(#[from] AssemblyError),

    /// A transport-level failure occurred.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// A keyed stage failed while processing a record.
    #[error("{0}")]
    StageProcessing(#[from] StageError),

    /// The pipeline was cancelled by the operator.
    #[error("pipeline cancelled: {0}")]
    Cancelled(String),

    /// The pipeline kept failing immediately after restarts.
    #[error("unrecoverable pipeline failure after {restarts} restarts: {source}")]
    Unrecoverable {
        /// Number of restarts attempted before giving up.
        restarts: usize,
        /// The failure that exhausted the restart budget.
        #[source]
        source: Box<TodoflowError>,
    },

    /// A runner lifecycle method was called out of order.
    #[error("invalid runner transition: {0}")]
    InvalidTransition(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Error raised when the pipeline configuration is unusable.
///
/// Always fatal at startup, before any pipeline state is created.
#[derive(Debug, Error)]
pub enum ConfigurationError {
    /// The configuration document could not be read.
    #[error("cannot read config file '{path}': {source}")]
    Unreadable {
        /// The offending path.
        path: String,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The configuration document could not be parsed.
    #[error("cannot parse config: {0}")]
    Unparseable(#[from] serde_json::Error),

    /// A required topic role is missing from the topic list.
    #[error("required topic role '{name}' ({kind}) is missing from the configuration")]
    MissingRole {
        /// The role name.
        name: String,
        /// The required direction.
        kind: TopicKind,
    },

    /// A delivery-guarantee string did not match the supported set.
    #[error("{0}")]
    UnsupportedGuarantee(#[from] UnsupportedGuaranteeError),
}

/// Error raised when the pipeline topology is wired incompletely.
///
/// Fatal at assembly time; never encountered after successful startup
/// since assembly is one-shot.
#[derive(Debug, Clone, Error)]
#[error("pipeline assembly error: {message}")]
pub struct AssemblyError {
    /// What was missing or inconsistent.
    pub message: String,
}

impl AssemblyError {
    /// Creates a new assembly error.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Error raised when a (role, direction) pair resolves to no topic entry.
#[derive(Debug, Clone, Error)]
#[error("no topic entry for role '{name}' with type {kind}")]
pub struct LookupError {
    /// The role name that was looked up.
    pub name: String,
    /// The direction that was looked up.
    pub kind: TopicKind,
}

impl LookupError {
    /// Creates a new lookup error.
    #[must_use]
    pub fn new(name: impl Into<String>, kind: TopicKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }
}

/// Error raised when a delivery-guarantee literal is not recognized.
///
/// Matching is exact and case-sensitive; an unrecognized literal is a
/// startup fault, not a silent fallback to the default guarantee.
#[derive(Debug, Clone, Error)]
#[error("unsupported delivery guarantee '{value}' (supported: AT_LEAST_ONCE, EXACTLY_ONCE)")]
pub struct UnsupportedGuaranteeError {
    /// The unrecognized literal.
    pub value: String,
}

impl UnsupportedGuaranteeError {
    /// Creates a new unsupported guarantee error.
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
        }
    }
}

/// Error raised by the transport layer.
///
/// Recoverable through the checkpoint-and-restart mechanism.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    /// Subscribing to a topic failed.
    #[error("cannot subscribe to topic '{topic}': {reason}")]
    Subscribe {
        /// The topic name.
        topic: String,
        /// The reason for failure.
        reason: String,
    },

    /// Publishing a record failed.
    #[error("cannot publish to topic '{topic}': {reason}")]
    Publish {
        /// The topic name.
        topic: String,
        /// The reason for failure.
        reason: String,
    },

    /// The broker connection was lost.
    #[error("connection lost: {0}")]
    ConnectionLost(String),
}

/// Error raised inside a keyed stage.
///
/// Fatal to the pipeline instance: the whole pipeline restarts from the
/// last completed checkpoint rather than retrying the record locally.
#[derive(Debug, Clone, Error)]
#[error("stage '{stage}' failed: {reason}")]
pub struct StageError {
    /// The failing stage name.
    pub stage: String,
    /// The reason for failure.
    pub reason: String,
}

impl StageError {
    /// Creates a new stage error.
    #[must_use]
    pub fn new(stage: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            stage: stage.into(),
            reason: reason.into(),
        }
    }
}

impl TodoflowError {
    /// Returns true if the checkpoint-and-restart substrate may retry
    /// after this error.
    ///
    /// Configuration and lookup errors indicate a static defect and are
    /// never retried.
    #[must_use]
    pub fn is_restartable(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::StageProcessing(_))
    }
}
