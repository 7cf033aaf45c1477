//! Authorization stage keyed by user identity.

use super::{KeyedStage, StageEmit};
use crate::errors::StageError;
use crate::model::TodoAction;
use crate::state::StateHandle;
use serde_json::json;
use std::collections::HashSet;
use tracing::warn;

const FIELD_GRANTED: &str = "granted";

/// Enforces per-user authorization.
///
/// The grant decision is taken once per user and remembered in key-scoped
/// state; a denied record short-circuits downstream propagation.
#[derive(Debug, Clone, Default)]
pub struct UserAuthStage {
    denied_users: HashSet<String>,
}

impl UserAuthStage {
    /// Creates a stage that grants every user.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Denies a specific user.
    #[must_use]
    pub fn with_denied_user(mut self, user: impl Into<String>) -> Self {
        self.denied_users.insert(user.into());
        self
    }
}

impl KeyedStage for UserAuthStage {
    fn name(&self) -> &str {
        "auth"
    }

    fn key(&self, record: &str) -> String {
        TodoAction::parse(record).map(|a| a.user).unwrap_or_default()
    }

    fn process(
        &self,
        record: &str,
        state: &mut StateHandle<'_>,
    ) -> Result<Vec<StageEmit>, StageError> {
        let granted = match state.get(FIELD_GRANTED).and_then(serde_json::Value::as_bool) {
            Some(decision) => decision,
            None => {
                let decision = !self.denied_users.contains(state.key());
                state.put(FIELD_GRANTED, json!(decision));
                decision
            }
        };

        if granted {
            Ok(vec![StageEmit::Main(record.to_string())])
        } else {
            warn!(user = state.key(), "denying unauthorized action");
            Ok(Vec::new())
        }
    }
}
