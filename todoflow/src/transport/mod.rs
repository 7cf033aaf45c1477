//! Transport boundary for the partitioned log.
//!
//! The broker client itself is an external collaborator; the pipeline
//! depends only on the [`LogTransport`] contract: consumer-group style
//! subscription yielding raw text records, and publishers honoring a
//! delivery guarantee. [`MemoryTransport`] is the one in-process
//! implementation, used by the binary for local runs and by the tests.

mod memory;

pub use memory::MemoryTransport;

use crate::errors::{TransportError, UnsupportedGuaranteeError};
use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Literal accepted for the at-least-once guarantee.
pub const AT_LEAST_ONCE: &str = "AT_LEAST_ONCE";
/// Literal accepted for the exactly-once guarantee.
pub const EXACTLY_ONCE: &str = "EXACTLY_ONCE";

/// Consistency contract a publisher offers to the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum DeliveryGuarantee {
    /// Records may be delivered more than once after a restart.
    #[default]
    AtLeastOnce,
    /// Records become visible only when the enclosing checkpoint commits.
    ExactlyOnce,
}

impl DeliveryGuarantee {
    /// Resolves a configured guarantee literal.
    ///
    /// Matching is exact and case-sensitive; `None` resolves to the
    /// at-least-once default.
    ///
    /// # Errors
    ///
    /// Returns an [`UnsupportedGuaranteeError`] for an unrecognized
    /// literal.
    pub fn resolve(value: Option<&str>) -> Result<Self, UnsupportedGuaranteeError> {
        match value {
            None | Some(AT_LEAST_ONCE) => Ok(Self::AtLeastOnce),
            Some(EXACTLY_ONCE) => Ok(Self::ExactlyOnce),
            Some(other) => Err(UnsupportedGuaranteeError::new(other)),
        }
    }
}

/// One record read from or written to a log topic.
///
/// Values are opaque text; the optional key is the routing key the
/// transport partitions by.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogRecord {
    /// Routing key, if any.
    pub key: Option<String>,
    /// Opaque text payload.
    pub value: String,
    /// Position of the record within its topic.
    pub offset: u64,
}

impl LogRecord {
    /// Creates a record without a routing key.
    #[must_use]
    pub fn new(value: impl Into<String>, offset: u64) -> Self {
        Self {
            key: None,
            value: value.into(),
            offset,
        }
    }

    /// Creates a record with a routing key.
    #[must_use]
    pub fn keyed(key: impl Into<String>, value: impl Into<String>, offset: u64) -> Self {
        Self {
            key: Some(key.into()),
            value: value.into(),
            offset,
        }
    }
}

/// A handle for publishing records to one topic.
#[async_trait]
pub trait LogPublisher: Send + Sync {
    /// Publishes one record; resolves when the transport acknowledges it.
    async fn publish(&self, key: Option<String>, value: String) -> Result<(), TransportError>;
}

/// The partitioned append-only log transport.
///
/// Connections are established here, not at endpoint-build time. Each
/// subscription and publisher handle is owned by exactly one task.
#[async_trait]
pub trait LogTransport: Send + Sync {
    /// Subscribes to a topic, replaying from `from_offset`.
    ///
    /// The stream blocks when no input is available and ends when the
    /// topic is drained on bounded input.
    ///
    /// # Errors
    ///
    /// Returns a [`TransportError`] when the subscription cannot be
    /// established.
    async fn subscribe(
        &self,
        topic: &str,
        properties: &HashMap<String, String>,
        from_offset: u64,
    ) -> Result<BoxStream<'static, LogRecord>, TransportError>;

    /// Creates a publisher handle for a topic.
    ///
    /// # Errors
    ///
    /// Returns a [`TransportError`] when the publisher cannot be created.
    async fn publisher(
        &self,
        topic: &str,
        properties: &HashMap<String, String>,
    ) -> Result<Box<dyn LogPublisher>, TransportError>;
}
