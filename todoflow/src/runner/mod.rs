//! Pipeline lifecycle ownership.
//!
//! The runner drives the strictly sequential lifecycle: build
//! configuration, assemble the pipeline, then block on execution until
//! termination or failure. Restartable failures resume from the most
//! recent completed checkpoint; repeated immediate failures exhaust a
//! bounded restart budget and surface as an unrecoverable process
//! failure.

use crate::cancellation::CancellationToken;
use crate::checkpoint::{CheckpointCoordinator, CheckpointStore, InMemoryCheckpointStore};
use crate::config::{PipelineConfig, TopicKind};
use crate::endpoints::{EndpointBuilder, TxLogKeyEncoder};
use crate::errors::{ConfigurationError, TodoflowError};
use crate::pipeline::{Pipeline, PipelineBuilder, RunOutcome, Topology};
use crate::stages::{ActionFilter, StateSpyStage, TodoActionStage, UserAuthStage};
use crate::topics::{TopicRegistry, ROLE_ACTION, ROLE_REACTION, ROLE_TX_LOG};
use crate::transport::LogTransport;
use std::sync::Arc;
use tracing::{info, warn};

/// Consecutive restarts without a new completed checkpoint before the
/// runner gives up.
const MAX_RESTARTS: usize = 3;

/// Lifecycle states, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunnerState {
    /// No configuration loaded yet.
    Uninitialized,
    /// Configuration accepted.
    Configured,
    /// Pipeline assembled and ready to run.
    Assembled,
    /// Execution in progress.
    Running,
    /// Execution ended normally.
    Completed,
    /// Execution ended in an unrecoverable failure.
    Failed,
}

/// Owns the configuration and drives the pipeline to termination.
pub struct Runner {
    transport: Arc<dyn LogTransport>,
    store: Arc<dyn CheckpointStore>,
    cancellation: Arc<CancellationToken>,
    state: RunnerState,
    config: Option<PipelineConfig>,
    pipeline: Option<Pipeline>,
    retain_on_cancellation: bool,
}

impl Runner {
    /// Creates a runner with an in-memory checkpoint store.
    #[must_use]
    pub fn new(transport: Arc<dyn LogTransport>) -> Self {
        Self::with_store(transport, Arc::new(InMemoryCheckpointStore::new()))
    }

    /// Creates a runner with an explicit checkpoint store.
    #[must_use]
    pub fn with_store(transport: Arc<dyn LogTransport>, store: Arc<dyn CheckpointStore>) -> Self {
        Self {
            transport,
            store,
            cancellation: Arc::new(CancellationToken::new()),
            state: RunnerState::Uninitialized,
            config: None,
            pipeline: None,
            retain_on_cancellation: false,
        }
    }

    /// The current lifecycle state.
    #[must_use]
    pub fn state(&self) -> RunnerState {
        self.state
    }

    /// Token for operator-initiated cancellation.
    #[must_use]
    pub fn cancellation(&self) -> Arc<CancellationToken> {
        Arc::clone(&self.cancellation)
    }

    /// The assembled topology, once assembly has happened.
    #[must_use]
    pub fn topology(&self) -> Option<&Topology> {
        self.pipeline.as_ref().map(Pipeline::topology)
    }

    /// Accepts the process configuration.
    ///
    /// # Errors
    ///
    /// Returns an error when called out of order or when a required
    /// topic role is missing.
    pub fn configure(&mut self, config: PipelineConfig) -> Result<(), TodoflowError> {
        self.expect_state(RunnerState::Uninitialized, "configure")?;
        config.validate()?;
        self.config = Some(config);
        self.state = RunnerState::Configured;
        Ok(())
    }

    /// Resolves endpoints and wires the five-stage topology.
    ///
    /// # Errors
    ///
    /// Returns an error when called out of order, when a topic role
    /// cannot be resolved, or when a sink declares an unsupported
    /// delivery guarantee.
    pub fn assemble(&mut self) -> Result<(), TodoflowError> {
        self.expect_state(RunnerState::Configured, "assemble")?;
        let config = self
            .config
            .as_ref()
            .ok_or_else(|| TodoflowError::InvalidTransition("assemble without config".into()))?;

        let registry = TopicRegistry::new(config.topics.clone());
        let source =
            EndpointBuilder::build_source(registry.lookup(ROLE_ACTION, TopicKind::Source)?);
        let main_sink =
            EndpointBuilder::build_sink(registry.lookup(ROLE_REACTION, TopicKind::Sink)?, None)
                .map_err(ConfigurationError::from)?;
        let side_sink = EndpointBuilder::build_sink(
            registry.lookup(ROLE_TX_LOG, TopicKind::Sink)?,
            Some(Arc::new(TxLogKeyEncoder::new())),
        )
        .map_err(ConfigurationError::from)?;

        let coordinator = CheckpointCoordinator::from_policy(config.checkpointing());
        self.retain_on_cancellation =
            coordinator.is_some_and(|c| c.retain_on_cancellation());

        let pipeline = PipelineBuilder::new(Arc::clone(&self.transport))
            .source(source)
            .filter(Arc::new(ActionFilter::new()))
            .keyed_stage(Arc::new(StateSpyStage::new()))
            .keyed_stage(Arc::new(UserAuthStage::new()))
            .keyed_stage(Arc::new(TodoActionStage::new()))
            .main_sink(main_sink)
            .side_sink(side_sink)
            .scale(config.scale)
            .checkpointing(coordinator, Arc::clone(&self.store))
            .build()?;

        info!(topology = ?pipeline.topology(), "pipeline assembled");
        self.pipeline = Some(pipeline);
        self.state = RunnerState::Assembled;
        Ok(())
    }

    /// Starts execution and blocks until termination or failure.
    ///
    /// # Errors
    ///
    /// Returns an error when called out of order, or when the pipeline
    /// fails unrecoverably.
    pub async fn run(&mut self) -> Result<RunOutcome, TodoflowError> {
        self.expect_state(RunnerState::Assembled, "run")?;
        self.state = RunnerState::Running;

        let pipeline = match self.pipeline.as_ref() {
            Some(pipeline) => pipeline,
            None => {
                self.state = RunnerState::Failed;
                return Err(TodoflowError::InvalidTransition(
                    "run without assembled pipeline".into(),
                ));
            }
        };

        let mut restarts = 0;
        loop {
            let restored = self.store.latest();
            let restored_id = restored.as_ref().map(|checkpoint| checkpoint.id);

            match pipeline
                .run(restored.as_ref(), Arc::clone(&self.cancellation))
                .await
            {
                Ok(outcome) => {
                    if outcome == RunOutcome::Cancelled && !self.retain_on_cancellation {
                        info!("discarding checkpoints on cancellation");
                        self.store.clear();
                    }
                    self.state = RunnerState::Completed;
                    return Ok(outcome);
                }
                Err(error) if error.is_restartable() => {
                    let progressed =
                        self.store.latest().map(|checkpoint| checkpoint.id) != restored_id;
                    if progressed {
                        restarts = 0;
                    }
                    restarts += 1;
                    if restarts > MAX_RESTARTS {
                        self.state = RunnerState::Failed;
                        return Err(TodoflowError::Unrecoverable {
                            restarts: restarts - 1,
                            source: Box::new(error),
                        });
                    }
                    warn!(%error, restart = restarts, "pipeline failed, restarting from last checkpoint");
                }
                Err(error) => {
                    self.state = RunnerState::Failed;
                    return Err(error);
                }
            }
        }
    }

    fn expect_state(&self, expected: RunnerState, operation: &str) -> Result<(), TodoflowError> {
        if self.state == expected {
            Ok(())
        } else {
            Err(TodoflowError::InvalidTransition(format!(
                "{operation} requires {expected:?}, runner is {:?}",
                self.state
            )))
        }
    }
}

impl std::fmt::Debug for Runner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runner")
            .field("state", &self.state)
            .field("configured", &self.config.is_some())
            .finish()
    }
}
