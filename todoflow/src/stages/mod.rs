//! Stage seams and the shipped stage collaborators.
//!
//! The pipeline core is agnostic to what a stage computes: it only
//! requires the [`KeyedStage`] contract (derive a key, process records of
//! that key in arrival order against key-scoped state) and demultiplexes
//! the sum-typed [`StageEmit`] output. Stage implementations are
//! error-handling-free; an `Err` is fatal to the pipeline instance and
//! handled by the restart substrate.

mod auth;
mod filter;
mod state_spy;
mod todo;

pub use auth::UserAuthStage;
pub use filter::ActionFilter;
pub use state_spy::StateSpyStage;
pub use todo::TodoActionStage;

use crate::errors::StageError;
use crate::state::StateHandle;
use std::fmt::Debug;

/// One record emitted by a keyed stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageEmit {
    /// Continues down the main path toward the reaction sink.
    Main(String),
    /// Routed to the transaction-log side channel.
    Aux(String),
}

/// Predicate deciding whether an ingested record enters the pipeline.
pub trait RecordFilter: Send + Sync + Debug {
    /// Returns true if the record represents a recognized action.
    fn accept(&self, record: &str) -> bool;
}

/// A per-key stateful processing step.
///
/// All records sharing a key are processed by exactly one logical worker
/// in arrival order; `state` is scoped to the key derived for the
/// current record.
pub trait KeyedStage: Send + Sync + Debug {
    /// The stage name, used in topology descriptions and errors.
    fn name(&self) -> &str;

    /// Derives the routing key for a record.
    fn key(&self, record: &str) -> String;

    /// Processes one record, possibly mutating the key's state.
    ///
    /// An empty emit list short-circuits downstream propagation for this
    /// record.
    ///
    /// # Errors
    ///
    /// Returns a [`StageError`] on unrecoverable processing failure;
    /// this is fatal to the whole pipeline instance.
    fn process(
        &self,
        record: &str,
        state: &mut StateHandle<'_>,
    ) -> Result<Vec<StageEmit>, StageError>;
}
