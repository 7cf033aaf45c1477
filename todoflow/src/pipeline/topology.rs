//! Assembled topology description.

use serde::{Deserialize, Serialize};

/// One stage of the assembled pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageLayout {
    /// Stage name.
    pub name: String,
    /// Number of parallel workers.
    pub parallelism: usize,
}

/// The wired shape of an assembled pipeline.
///
/// Produced by `build()` so tests and operators can inspect what was
/// assembled without running it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Topology {
    /// Keyed stages in execution order.
    pub stages: Vec<StageLayout>,
    /// Topic of the main (reaction) sink.
    pub main_sink: String,
    /// Topic of the side-channel (transaction log) sink.
    pub side_sink: String,
}

impl Topology {
    /// The terminal stage layout.
    #[must_use]
    pub fn terminal(&self) -> Option<&StageLayout> {
        self.stages.last()
    }

    /// Total worker count across all keyed stages.
    #[must_use]
    pub fn worker_count(&self) -> usize {
        self.stages.iter().map(|s| s.parallelism).sum()
    }
}
