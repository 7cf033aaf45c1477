//! State-spy stage: transition bookkeeping keyed by user.

use super::{KeyedStage, StageEmit};
use crate::errors::StageError;
use crate::model::TodoAction;
use crate::state::StateHandle;
use serde_json::json;
use tracing::debug;

const FIELD_TRANSITIONS: &str = "transitions";

/// Observes and counts state transitions per user, passing every record
/// through unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct StateSpyStage;

impl StateSpyStage {
    /// Creates the stage.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl KeyedStage for StateSpyStage {
    fn name(&self) -> &str {
        "state-spy"
    }

    fn key(&self, record: &str) -> String {
        TodoAction::parse(record).map(|a| a.user).unwrap_or_default()
    }

    fn process(
        &self,
        record: &str,
        state: &mut StateHandle<'_>,
    ) -> Result<Vec<StageEmit>, StageError> {
        let seen = state
            .get(FIELD_TRANSITIONS)
            .and_then(serde_json::Value::as_u64)
            .unwrap_or(0)
            + 1;
        state.put(FIELD_TRANSITIONS, json!(seen));
        debug!(user = state.key(), transitions = seen, "observed transition");

        Ok(vec![StageEmit::Main(record.to_string())])
    }
}
