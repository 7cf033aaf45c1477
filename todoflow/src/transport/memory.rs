//! In-process implementation of the log transport.
//!
//! Each topic is an append-only vector with offset-based replay. A
//! subscription blocks while the topic has no further input and ends
//! once the topic is sealed and drained, which is how the integration
//! tests model bounded input.

use super::{LogPublisher, LogRecord, LogTransport};
use crate::errors::TransportError;
use async_trait::async_trait;
use dashmap::DashMap;
use futures::stream::BoxStream;
use futures::StreamExt;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Notify;

#[derive(Default)]
struct TopicLog {
    records: Vec<LogRecord>,
    sealed: bool,
}

#[derive(Default)]
struct TopicState {
    log: Mutex<TopicLog>,
    notify: Notify,
}

impl TopicState {
    fn append(&self, key: Option<String>, value: String) {
        let mut log = self.log.lock();
        let offset = log.records.len() as u64;
        log.records.push(LogRecord { key, value, offset });
        drop(log);
        self.notify.notify_waiters();
    }
}

/// A partitioned in-memory log, one vector per topic.
#[derive(Default, Clone)]
pub struct MemoryTransport {
    topics: Arc<DashMap<String, Arc<TopicState>>>,
}

impl MemoryTransport {
    /// Creates an empty transport.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn topic(&self, name: &str) -> Arc<TopicState> {
        self.topics
            .entry(name.to_string())
            .or_default()
            .clone()
    }

    /// Appends unkeyed records to a topic.
    pub fn seed<I, S>(&self, topic: &str, values: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let state = self.topic(topic);
        for value in values {
            state.append(None, value.into());
        }
    }

    /// Seals a topic: subscriptions end once they reach the tail.
    pub fn seal(&self, topic: &str) {
        let state = self.topic(topic);
        state.log.lock().sealed = true;
        state.notify.notify_waiters();
    }

    /// Returns a snapshot of all records in a topic.
    #[must_use]
    pub fn records(&self, topic: &str) -> Vec<LogRecord> {
        self.topic(topic).log.lock().records.clone()
    }
}

impl std::fmt::Debug for MemoryTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryTransport")
            .field("topics", &self.topics.len())
            .finish()
    }
}

struct MemoryPublisher {
    topic: String,
    state: Arc<TopicState>,
}

#[async_trait]
impl LogPublisher for MemoryPublisher {
    async fn publish(&self, key: Option<String>, value: String) -> Result<(), TransportError> {
        if self.state.log.lock().sealed {
            return Err(TransportError::Publish {
                topic: self.topic.clone(),
                reason: "topic is sealed".to_string(),
            });
        }
        self.state.append(key, value);
        Ok(())
    }
}

#[async_trait]
impl LogTransport for MemoryTransport {
    async fn subscribe(
        &self,
        topic: &str,
        _properties: &HashMap<String, String>,
        from_offset: u64,
    ) -> Result<BoxStream<'static, LogRecord>, TransportError> {
        let state = self.topic(topic);

        let stream = futures::stream::unfold(
            (state, from_offset),
            |(state, offset)| async move {
                loop {
                    {
                        let log = state.log.lock();
                        if let Some(record) = log.records.get(offset as usize) {
                            let record = record.clone();
                            drop(log);
                            return Some((record, (state, offset + 1)));
                        }
                        if log.sealed {
                            return None;
                        }
                    }
                    // Arm the waiter, then re-check for an append that
                    // raced with the unlock above.
                    let notified = state.notify.notified();
                    {
                        let log = state.log.lock();
                        if log.records.len() > offset as usize || log.sealed {
                            continue;
                        }
                    }
                    notified.await;
                }
            },
        );

        Ok(stream.boxed())
    }

    async fn publisher(
        &self,
        topic: &str,
        _properties: &HashMap<String, String>,
    ) -> Result<Box<dyn LogPublisher>, TransportError> {
        Ok(Box::new(MemoryPublisher {
            topic: topic.to_string(),
            state: self.topic(topic),
        }))
    }
}
