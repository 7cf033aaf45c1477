//! Pipeline builder with validation.
//!
//! The builder is an explicit value threaded through each assembly step:
//! every method consumes and returns it, keeping assembly referentially
//! transparent and independently testable. Nothing is shared or mutated
//! in place until `build()` produces the assembled [`Pipeline`].

use super::runtime;
use super::{StageLayout, Topology};
use crate::cancellation::CancellationToken;
use crate::checkpoint::{Checkpoint, CheckpointCoordinator, CheckpointStore};
use crate::endpoints::{ConsumerEndpoint, PublisherEndpoint};
use crate::errors::{AssemblyError, TodoflowError};
use crate::stages::{KeyedStage, RecordFilter};
use crate::transport::LogTransport;
use std::sync::Arc;

/// Builder for the keyed stage chain and its endpoints.
#[derive(Clone)]
pub struct PipelineBuilder {
    transport: Arc<dyn LogTransport>,
    source: Option<ConsumerEndpoint>,
    filter: Option<Arc<dyn RecordFilter>>,
    stages: Vec<Arc<dyn KeyedStage>>,
    main_sink: Option<PublisherEndpoint>,
    side_sink: Option<PublisherEndpoint>,
    default_parallelism: usize,
    scale: usize,
    coordinator: Option<CheckpointCoordinator>,
    store: Option<Arc<dyn CheckpointStore>>,
}

impl PipelineBuilder {
    /// Creates a builder over the given transport.
    #[must_use]
    pub fn new(transport: Arc<dyn LogTransport>) -> Self {
        Self {
            transport,
            source: None,
            filter: None,
            stages: Vec::new(),
            main_sink: None,
            side_sink: None,
            default_parallelism: 1,
            scale: 1,
            coordinator: None,
            store: None,
        }
    }

    /// Sets the action source endpoint.
    #[must_use]
    pub fn source(mut self, endpoint: ConsumerEndpoint) -> Self {
        self.source = Some(endpoint);
        self
    }

    /// Sets the ingest filter.
    #[must_use]
    pub fn filter(mut self, filter: Arc<dyn RecordFilter>) -> Self {
        self.filter = Some(filter);
        self
    }

    /// Appends a keyed stage to the chain.
    #[must_use]
    pub fn keyed_stage(mut self, stage: Arc<dyn KeyedStage>) -> Self {
        self.stages.push(stage);
        self
    }

    /// Sets the main (reaction) sink endpoint.
    #[must_use]
    pub fn main_sink(mut self, endpoint: PublisherEndpoint) -> Self {
        self.main_sink = Some(endpoint);
        self
    }

    /// Sets the side-channel (transaction log) sink endpoint.
    #[must_use]
    pub fn side_sink(mut self, endpoint: PublisherEndpoint) -> Self {
        self.side_sink = Some(endpoint);
        self
    }

    /// Sets the parallelism of every non-terminal stage.
    #[must_use]
    pub fn default_parallelism(mut self, parallelism: usize) -> Self {
        self.default_parallelism = parallelism.max(1);
        self
    }

    /// Overrides the terminal stage's parallelism.
    ///
    /// Upstream stages keep the pipeline default, so the high-fan-out
    /// terminal stage scales independently without re-partitioning
    /// upstream state.
    #[must_use]
    pub fn scale(mut self, scale: usize) -> Self {
        self.scale = scale.max(1);
        self
    }

    /// Applies a checkpoint coordinator and the store completed
    /// snapshots go to.
    #[must_use]
    pub fn checkpointing(
        mut self,
        coordinator: Option<CheckpointCoordinator>,
        store: Arc<dyn CheckpointStore>,
    ) -> Self {
        self.coordinator = coordinator;
        self.store = Some(store);
        self
    }

    /// Validates the wiring and produces the assembled pipeline.
    ///
    /// # Errors
    ///
    /// Returns an [`AssemblyError`] when the source, filter, sinks, or
    /// stage chain are missing.
    pub fn build(self) -> Result<Pipeline, AssemblyError> {
        let source = self
            .source
            .ok_or_else(|| AssemblyError::new("no action source endpoint"))?;
        let filter = self
            .filter
            .ok_or_else(|| AssemblyError::new("no ingest filter"))?;
        let main_sink = self
            .main_sink
            .ok_or_else(|| AssemblyError::new("no main sink endpoint"))?;
        let side_sink = self
            .side_sink
            .ok_or_else(|| AssemblyError::new("no side-channel sink endpoint"))?;
        if self.stages.is_empty() {
            return Err(AssemblyError::new("pipeline has no keyed stages"));
        }

        let last = self.stages.len() - 1;
        let parallelism: Vec<usize> = self
            .stages
            .iter()
            .enumerate()
            .map(|(idx, _)| {
                if idx == last {
                    self.scale
                } else {
                    self.default_parallelism
                }
            })
            .collect();

        let topology = Topology {
            stages: self
                .stages
                .iter()
                .zip(&parallelism)
                .map(|(stage, &parallelism)| StageLayout {
                    name: stage.name().to_string(),
                    parallelism,
                })
                .collect(),
            main_sink: main_sink.topic().to_string(),
            side_sink: side_sink.topic().to_string(),
        };

        Ok(Pipeline {
            transport: self.transport,
            source,
            filter,
            stages: self.stages,
            parallelism,
            main_sink,
            side_sink,
            coordinator: self.coordinator,
            store: self.store,
            topology,
        })
    }
}

impl std::fmt::Debug for PipelineBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineBuilder")
            .field("stages", &self.stages.len())
            .field("default_parallelism", &self.default_parallelism)
            .field("scale", &self.scale)
            .finish()
    }
}

/// How a pipeline execution ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// Bounded input was drained to completion.
    Drained,
    /// The operator cancelled the pipeline.
    Cancelled,
}

/// An assembled, runnable pipeline.
pub struct Pipeline {
    pub(super) transport: Arc<dyn LogTransport>,
    pub(super) source: ConsumerEndpoint,
    pub(super) filter: Arc<dyn RecordFilter>,
    pub(super) stages: Vec<Arc<dyn KeyedStage>>,
    pub(super) parallelism: Vec<usize>,
    pub(super) main_sink: PublisherEndpoint,
    pub(super) side_sink: PublisherEndpoint,
    pub(super) coordinator: Option<CheckpointCoordinator>,
    pub(super) store: Option<Arc<dyn CheckpointStore>>,
    pub(super) topology: Topology,
}

impl Pipeline {
    /// The assembled topology.
    #[must_use]
    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    /// Executes the pipeline, restoring from `restore_from` when given.
    ///
    /// Blocks until bounded input drains, the operator cancels, or a
    /// task fails.
    ///
    /// # Errors
    ///
    /// Returns the first transport or stage failure observed; the caller
    /// decides whether to restart from a checkpoint.
    pub async fn run(
        &self,
        restore_from: Option<&Checkpoint>,
        cancellation: Arc<CancellationToken>,
    ) -> Result<RunOutcome, TodoflowError> {
        runtime::execute(self, restore_from, cancellation).await
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("topology", &self.topology)
            .field("checkpointing", &self.coordinator.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{TopicEntry, TopicKind};
    use crate::endpoints::{EndpointBuilder, TxLogKeyEncoder};
    use crate::stages::{ActionFilter, StateSpyStage, TodoActionStage, UserAuthStage};
    use crate::transport::MemoryTransport;
    use pretty_assertions::assert_eq;

    fn builder() -> PipelineBuilder {
        let transport = Arc::new(MemoryTransport::new());
        let source = EndpointBuilder::build_source(&TopicEntry::new(
            "action",
            TopicKind::Source,
            "todo-actions",
        ));
        let main_sink = EndpointBuilder::build_sink(
            &TopicEntry::new("reaction", TopicKind::Sink, "todo-reactions"),
            None,
        )
        .unwrap();
        let side_sink = EndpointBuilder::build_sink(
            &TopicEntry::new("txlog", TopicKind::Sink, "todo-txlog"),
            Some(Arc::new(TxLogKeyEncoder::new())),
        )
        .unwrap();

        PipelineBuilder::new(transport)
            .source(source)
            .filter(Arc::new(ActionFilter::new()))
            .keyed_stage(Arc::new(StateSpyStage::new()))
            .keyed_stage(Arc::new(UserAuthStage::new()))
            .keyed_stage(Arc::new(TodoActionStage::new()))
            .main_sink(main_sink)
            .side_sink(side_sink)
    }

    #[test]
    fn test_scale_applies_to_terminal_stage_only() {
        let pipeline = builder().scale(3).build().unwrap();
        let topology = pipeline.topology();

        assert_eq!(
            topology
                .stages
                .iter()
                .map(|s| (s.name.as_str(), s.parallelism))
                .collect::<Vec<_>>(),
            vec![("state-spy", 1), ("auth", 1), ("todo", 3)]
        );
        assert_eq!(topology.side_sink, "todo-txlog");
        assert_eq!(topology.main_sink, "todo-reactions");
    }

    #[test]
    fn test_missing_source_is_rejected() {
        let transport = Arc::new(MemoryTransport::new());
        let result = PipelineBuilder::new(transport)
            .filter(Arc::new(ActionFilter::new()))
            .keyed_stage(Arc::new(TodoActionStage::new()))
            .build();

        assert!(result.is_err());
    }

    #[test]
    fn test_empty_stage_chain_is_rejected() {
        let transport = Arc::new(MemoryTransport::new());
        let source = EndpointBuilder::build_source(&TopicEntry::new(
            "action",
            TopicKind::Source,
            "todo-actions",
        ));
        let sink = EndpointBuilder::build_sink(
            &TopicEntry::new("reaction", TopicKind::Sink, "todo-reactions"),
            None,
        )
        .unwrap();

        let result = PipelineBuilder::new(transport)
            .source(source)
            .filter(Arc::new(ActionFilter::new()))
            .main_sink(sink.clone())
            .side_sink(sink)
            .build();

        let err = result.unwrap_err();
        assert!(err.to_string().contains("no keyed stages"));
    }

    #[test]
    fn test_parallelism_floors_at_one() {
        let pipeline = builder().scale(0).default_parallelism(0).build().unwrap();
        assert!(pipeline
            .topology()
            .stages
            .iter()
            .all(|s| s.parallelism == 1));
    }
}
