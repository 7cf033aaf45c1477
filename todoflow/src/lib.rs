//! # Todoflow
//!
//! A multi-stage, keyed, fault-tolerant event-processing pipeline for
//! todo actions.
//!
//! Todoflow consumes action events from a partitioned log, pushes them
//! through an ordered chain of per-key stateful stages, and republishes
//! the reactions plus an auxiliary transaction log under a configurable
//! delivery guarantee:
//!
//! - **Declarative endpoints**: topic roles resolve to typed consumer
//!   and publisher endpoints from configuration
//! - **Keyed stages**: per-key state with in-order processing per key
//! - **Side channel**: a sum-typed auxiliary output demultiplexed to
//!   its own sink
//! - **Checkpointing**: periodic consistent snapshots with bounded
//!   concurrency and restart-from-last-good-state
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use todoflow::prelude::*;
//!
//! let config = todoflow::config::load(None)?;
//! let mut runner = Runner::new(transport);
//! runner.configure(config)?;
//! runner.assemble()?;
//! runner.run().await?;
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod cancellation;
pub mod checkpoint;
pub mod config;
pub mod endpoints;
pub mod errors;
pub mod model;
pub mod observability;
pub mod pipeline;
pub mod runner;
pub mod stages;
pub mod state;
pub mod topics;
pub mod transport;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::cancellation::CancellationToken;
    pub use crate::checkpoint::{
        Checkpoint, CheckpointCoordinator, CheckpointStore, InMemoryCheckpointStore,
    };
    pub use crate::config::{
        CheckpointMode, CheckpointPolicy, PipelineConfig, TopicEntry, TopicKind,
    };
    pub use crate::endpoints::{
        ConsumerEndpoint, EndpointBuilder, KeyEncoder, PublisherEndpoint, SinkSpec,
        TxLogKeyEncoder,
    };
    pub use crate::errors::{
        ConfigurationError, LookupError, StageError, TodoflowError, TransportError,
        UnsupportedGuaranteeError,
    };
    pub use crate::model::{ActionOp, Reaction, TodoAction, TodoStatus, TxLogEntry};
    pub use crate::pipeline::{Pipeline, PipelineBuilder, RunOutcome, StageLayout, Topology};
    pub use crate::runner::{Runner, RunnerState};
    pub use crate::stages::{
        ActionFilter, KeyedStage, RecordFilter, StageEmit, StateSpyStage, TodoActionStage,
        UserAuthStage,
    };
    pub use crate::state::{StateHandle, StateSnapshot, StateStore};
    pub use crate::topics::TopicRegistry;
    pub use crate::transport::{
        DeliveryGuarantee, LogPublisher, LogRecord, LogTransport, MemoryTransport,
    };
}
