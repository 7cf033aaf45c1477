//! Checkpoint policy application and snapshot persistence.
//!
//! The coordinator exists only when the configured policy is enabled;
//! an absent or disabled policy is an inert no-op and nothing is
//! scheduled. Completed checkpoints are kept in a [`CheckpointStore`],
//! from which the runner resumes after a fatal failure.

use crate::config::{CheckpointMode, CheckpointPolicy};
use crate::state::StateSnapshot;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt::Debug;
use std::time::Duration;

/// Applied checkpointing parameters for one pipeline execution.
///
/// Built from an enabled [`CheckpointPolicy`]; carries exactly the
/// consistency mode, timeout, interval, minimum pause, concurrency bound
/// and retention flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CheckpointCoordinator {
    mode: CheckpointMode,
    timeout: Duration,
    interval: Duration,
    pause: Duration,
    concurrent: usize,
    externalization: bool,
}

impl CheckpointCoordinator {
    /// Applies a checkpoint policy.
    ///
    /// Returns `None` when the policy is absent or not enabled: no
    /// snapshot interval is scheduled and execution stays unconfigured
    /// for snapshotting.
    #[must_use]
    pub fn from_policy(policy: Option<&CheckpointPolicy>) -> Option<Self> {
        let policy = policy.filter(|p| p.enabled)?;
        Some(Self {
            mode: policy.mode,
            timeout: policy.timeout(),
            interval: policy.interval(),
            pause: policy.pause(),
            concurrent: policy.concurrent.max(1),
            externalization: policy.externalization,
        })
    }

    /// Consistency mode.
    #[must_use]
    pub fn mode(&self) -> CheckpointMode {
        self.mode
    }

    /// Bound after which an in-flight checkpoint is abandoned.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Target spacing between checkpoint starts.
    #[must_use]
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Hard floor between one completion and the next start.
    #[must_use]
    pub fn pause(&self) -> Duration {
        self.pause
    }

    /// Maximum checkpoints in flight simultaneously.
    #[must_use]
    pub fn concurrent(&self) -> usize {
        self.concurrent
    }

    /// True if retained snapshots survive pipeline cancellation.
    #[must_use]
    pub fn retain_on_cancellation(&self) -> bool {
        self.externalization
    }
}

/// A globally consistent snapshot of pipeline state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Monotonic checkpoint id within the process.
    pub id: u64,
    /// When the checkpoint completed.
    pub created_at: DateTime<Utc>,
    /// Consistency mode it was taken under.
    pub mode: CheckpointMode,
    /// Source offset up to which input is covered.
    pub source_offset: u64,
    /// Merged per-stage state, keyed by stage name.
    pub stage_states: HashMap<String, StateSnapshot>,
}

impl Checkpoint {
    /// Returns the merged state for a stage, if captured.
    #[must_use]
    pub fn stage_state(&self, stage: &str) -> Option<&StateSnapshot> {
        self.stage_states.get(stage)
    }
}

/// Persistence for completed checkpoints.
pub trait CheckpointStore: Send + Sync + Debug {
    /// Records a completed checkpoint.
    fn save(&self, checkpoint: Checkpoint);

    /// Returns the most recent completed checkpoint.
    fn latest(&self) -> Option<Checkpoint>;

    /// Discards all retained checkpoints.
    fn clear(&self);
}

/// Keeps the latest completed checkpoint in memory.
#[derive(Debug, Default)]
pub struct InMemoryCheckpointStore {
    latest: Mutex<Option<Checkpoint>>,
    completed: Mutex<u64>,
}

impl InMemoryCheckpointStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of checkpoints completed over the store's lifetime.
    #[must_use]
    pub fn completed_count(&self) -> u64 {
        *self.completed.lock()
    }
}

impl CheckpointStore for InMemoryCheckpointStore {
    fn save(&self, checkpoint: Checkpoint) {
        *self.completed.lock() += 1;
        let mut latest = self.latest.lock();
        let stale = latest.as_ref().is_some_and(|kept| kept.id > checkpoint.id);
        if !stale {
            *latest = Some(checkpoint);
        }
    }

    fn latest(&self) -> Option<Checkpoint> {
        self.latest.lock().clone()
    }

    fn clear(&self) {
        *self.latest.lock() = None;
    }
}
