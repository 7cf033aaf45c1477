//! Typed endpoint construction from resolved topic entries.
//!
//! Building an endpoint copies the entry's transport properties verbatim
//! and resolves the delivery guarantee; no network I/O happens here.
//! Connections are established by the transport when an endpoint is
//! opened at execution time.

use crate::config::TopicEntry;
use crate::errors::{TransportError, UnsupportedGuaranteeError};
use crate::transport::{DeliveryGuarantee, LogPublisher, LogRecord, LogTransport};
use futures::stream::BoxStream;
use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::Arc;

/// Derives the published record's routing key from its value.
///
/// Installed only where a sink must partition by something other than
/// the payload's natural key; returning `None` publishes unkeyed.
pub trait KeyEncoder: Send + Sync + Debug {
    /// Extracts the routing key for a record value.
    fn encode(&self, value: &str) -> Option<String>;
}

/// Keys transaction-log records by their transaction id.
#[derive(Debug, Clone, Copy, Default)]
pub struct TxLogKeyEncoder;

impl TxLogKeyEncoder {
    /// Creates the encoder.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl KeyEncoder for TxLogKeyEncoder {
    fn encode(&self, value: &str) -> Option<String> {
        let parsed: serde_json::Value = serde_json::from_str(value).ok()?;
        parsed
            .get("txId")
            .and_then(serde_json::Value::as_str)
            .map(String::from)
    }
}

/// A consumer endpoint bound to one source topic.
///
/// Values are decoded as raw text; payload interpretation belongs to the
/// stages.
#[derive(Debug, Clone)]
pub struct ConsumerEndpoint {
    topic: String,
    properties: HashMap<String, String>,
}

impl ConsumerEndpoint {
    /// The subscribed topic.
    #[must_use]
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// The transport properties, as configured.
    #[must_use]
    pub fn properties(&self) -> &HashMap<String, String> {
        &self.properties
    }

    /// Opens the subscription on a transport, replaying from an offset.
    ///
    /// # Errors
    ///
    /// Returns a [`TransportError`] when the subscription cannot be
    /// established.
    pub async fn open(
        &self,
        transport: &dyn LogTransport,
        from_offset: u64,
    ) -> Result<BoxStream<'static, LogRecord>, TransportError> {
        transport
            .subscribe(&self.topic, &self.properties, from_offset)
            .await
    }
}

/// Derived sink parameters, consumed immediately by endpoint
/// construction and not persisted.
#[derive(Debug, Clone)]
pub struct SinkSpec {
    /// Target topic.
    pub topic: String,
    /// Transport properties, as configured.
    pub properties: HashMap<String, String>,
    /// Resolved delivery guarantee.
    pub guarantee: DeliveryGuarantee,
    /// Optional routing-key strategy.
    pub key_encoder: Option<Arc<dyn KeyEncoder>>,
}

/// A publisher endpoint bound to one sink topic.
#[derive(Debug, Clone)]
pub struct PublisherEndpoint {
    spec: SinkSpec,
}

impl PublisherEndpoint {
    /// The target topic.
    #[must_use]
    pub fn topic(&self) -> &str {
        &self.spec.topic
    }

    /// The resolved delivery guarantee.
    #[must_use]
    pub fn guarantee(&self) -> DeliveryGuarantee {
        self.spec.guarantee
    }

    /// Returns true if a key encoder is installed.
    #[must_use]
    pub fn has_key_encoder(&self) -> bool {
        self.spec.key_encoder.is_some()
    }

    /// Derives the routing key for a record value.
    #[must_use]
    pub fn encode_key(&self, value: &str) -> Option<String> {
        self.spec
            .key_encoder
            .as_ref()
            .and_then(|encoder| encoder.encode(value))
    }

    /// Opens a publisher handle on a transport.
    ///
    /// # Errors
    ///
    /// Returns a [`TransportError`] when the publisher cannot be created.
    pub async fn open(
        &self,
        transport: &dyn LogTransport,
    ) -> Result<Box<dyn LogPublisher>, TransportError> {
        transport
            .publisher(&self.spec.topic, &self.spec.properties)
            .await
    }
}

/// Builds typed endpoints from resolved topic entries.
#[derive(Debug, Clone, Copy)]
pub struct EndpointBuilder;

impl EndpointBuilder {
    /// Builds a consumer endpoint from a source entry.
    ///
    /// The property copy is total: connectivity validation is the
    /// transport's responsibility, not the builder's.
    #[must_use]
    pub fn build_source(entry: &TopicEntry) -> ConsumerEndpoint {
        ConsumerEndpoint {
            topic: entry.topic.clone(),
            properties: entry.properties.clone(),
        }
    }

    /// Builds a publisher endpoint from a sink entry.
    ///
    /// A key encoder is installed only when supplied; the delivery
    /// guarantee defaults to at-least-once when the entry carries no
    /// `semantic` override.
    ///
    /// # Errors
    ///
    /// Returns an [`UnsupportedGuaranteeError`] when the entry's
    /// `semantic` does not name a supported guarantee.
    pub fn build_sink(
        entry: &TopicEntry,
        key_encoder: Option<Arc<dyn KeyEncoder>>,
    ) -> Result<PublisherEndpoint, UnsupportedGuaranteeError> {
        let guarantee = DeliveryGuarantee::resolve(entry.semantic.as_deref())?;
        Ok(PublisherEndpoint {
            spec: SinkSpec {
                topic: entry.topic.clone(),
                properties: entry.properties.clone(),
                guarantee,
                key_encoder,
            },
        })
    }
}
