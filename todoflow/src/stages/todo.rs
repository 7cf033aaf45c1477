//! Terminal todo stage keyed by item identity.
//!
//! Applies the action to the item's state machine, emits the reaction on
//! the main path and a transaction-log record on the side channel for
//! every applied transition.

use super::{KeyedStage, StageEmit};
use crate::errors::StageError;
use crate::model::{ActionOp, Reaction, TodoAction, TodoStatus, TxLogEntry};
use crate::state::StateHandle;
use serde_json::json;
use tracing::debug;

const FIELD_TEXT: &str = "text";
const FIELD_STATUS: &str = "status";

/// Produces the final reaction record per todo item.
#[derive(Debug, Clone, Copy, Default)]
pub struct TodoActionStage;

impl TodoActionStage {
    /// Creates the stage.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl KeyedStage for TodoActionStage {
    fn name(&self) -> &str {
        "todo"
    }

    fn key(&self, record: &str) -> String {
        TodoAction::parse(record)
            .map(|a| a.todo_id)
            .unwrap_or_default()
    }

    fn process(
        &self,
        record: &str,
        state: &mut StateHandle<'_>,
    ) -> Result<Vec<StageEmit>, StageError> {
        // The filter guarantees well-formed actions; anything else here
        // is an upstream wiring fault.
        let action = TodoAction::parse(record)
            .ok_or_else(|| StageError::new(self.name(), format!("unparseable record: {record}")))?;

        let status = match action.op {
            ActionOp::Add => {
                if let Some(text) = &action.text {
                    state.put(FIELD_TEXT, json!(text));
                }
                state.put(FIELD_STATUS, json!(TodoStatus::Active));
                TodoStatus::Active
            }
            ActionOp::Complete => {
                state.put(FIELD_STATUS, json!(TodoStatus::Done));
                TodoStatus::Done
            }
            ActionOp::Remove => {
                state.delete();
                TodoStatus::Removed
            }
        };

        let text = state
            .get(FIELD_TEXT)
            .and_then(serde_json::Value::as_str)
            .map(String::from);

        debug!(todo = %action.todo_id, op = %action.op, "applied transition");

        let reaction = Reaction {
            todo_id: action.todo_id.clone(),
            user: action.user.clone(),
            status,
            text,
        };
        let entry = TxLogEntry::record(action.todo_id, action.user, action.op);

        Ok(vec![
            StageEmit::Main(reaction.to_record()),
            StageEmit::Aux(entry.to_record()),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::StateStore;
    use pretty_assertions::assert_eq;

    fn process(stage: &TodoActionStage, store: &mut StateStore, raw: &str) -> Vec<StageEmit> {
        let key = stage.key(raw);
        let mut handle = store.handle(&key);
        stage.process(raw, &mut handle).unwrap()
    }

    fn main_reaction(emitted: &[StageEmit]) -> Reaction {
        let raw = emitted
            .iter()
            .find_map(|e| match e {
                StageEmit::Main(raw) => Some(raw.clone()),
                StageEmit::Aux(_) => None,
            })
            .unwrap();
        serde_json::from_str(&raw).unwrap()
    }

    #[test]
    fn test_keys_by_todo_id() {
        let stage = TodoActionStage::new();
        assert_eq!(
            stage.key(r#"{"user":"alice","todoId":"t-9","op":"ADD","text":"x"}"#),
            "t-9"
        );
    }

    #[test]
    fn test_add_then_complete() {
        let stage = TodoActionStage::new();
        let mut store = StateStore::new();

        let emitted = process(
            &stage,
            &mut store,
            r#"{"user":"alice","todoId":"t-1","op":"ADD","text":"buy milk"}"#,
        );
        let reaction = main_reaction(&emitted);
        assert_eq!(reaction.status, TodoStatus::Active);
        assert_eq!(reaction.text.as_deref(), Some("buy milk"));

        let emitted = process(
            &stage,
            &mut store,
            r#"{"user":"alice","todoId":"t-1","op":"COMPLETE"}"#,
        );
        let reaction = main_reaction(&emitted);
        assert_eq!(reaction.status, TodoStatus::Done);
        assert_eq!(reaction.text.as_deref(), Some("buy milk"));
    }

    #[test]
    fn test_remove_clears_state() {
        let stage = TodoActionStage::new();
        let mut store = StateStore::new();

        process(
            &stage,
            &mut store,
            r#"{"user":"alice","todoId":"t-1","op":"ADD","text":"x"}"#,
        );
        let emitted = process(
            &stage,
            &mut store,
            r#"{"user":"alice","todoId":"t-1","op":"REMOVE"}"#,
        );

        let reaction = main_reaction(&emitted);
        assert_eq!(reaction.status, TodoStatus::Removed);
        assert_eq!(reaction.text, None);
        assert!(store.is_empty());
    }

    #[test]
    fn test_every_transition_emits_a_txlog_entry() {
        let stage = TodoActionStage::new();
        let mut store = StateStore::new();

        let emitted = process(
            &stage,
            &mut store,
            r#"{"user":"alice","todoId":"t-1","op":"ADD","text":"x"}"#,
        );

        let aux: Vec<_> = emitted
            .iter()
            .filter_map(|e| match e {
                StageEmit::Aux(raw) => Some(raw.clone()),
                StageEmit::Main(_) => None,
            })
            .collect();
        assert_eq!(aux.len(), 1);

        let entry: TxLogEntry = serde_json::from_str(&aux[0]).unwrap();
        assert_eq!(entry.todo_id, "t-1");
        assert_eq!(entry.op, ActionOp::Add);
        assert!(!entry.tx_id.is_empty());
    }

    #[test]
    fn test_unparseable_record_is_a_stage_error() {
        let stage = TodoActionStage::new();
        let mut store = StateStore::new();
        let mut handle = store.handle("t-1");
        assert!(stage.process("garbage", &mut handle).is_err());
    }
}
