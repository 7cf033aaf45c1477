//! Wire shapes for the opaque-text records flowing through the pipeline.
//!
//! The core treats record payloads as raw text; these types are what the
//! shipped stage collaborators parse that text into.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Operation carried by a todo action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionOp {
    /// Create a todo item.
    Add,
    /// Mark an item as done.
    Complete,
    /// Delete an item.
    Remove,
}

impl std::fmt::Display for ActionOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Add => write!(f, "ADD"),
            Self::Complete => write!(f, "COMPLETE"),
            Self::Remove => write!(f, "REMOVE"),
        }
    }
}

/// One action event consumed from the action source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TodoAction {
    /// Identity of the user issuing the action.
    pub user: String,
    /// Identity of the todo item the action targets.
    #[serde(rename = "todoId")]
    pub todo_id: String,
    /// The requested operation.
    pub op: ActionOp,
    /// Item text, present on Add.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

impl TodoAction {
    /// Parses an action from its raw text record, if well-formed.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        serde_json::from_str(raw).ok()
    }
}

/// Lifecycle status of a todo item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TodoStatus {
    /// The item exists and is open.
    Active,
    /// The item has been completed.
    Done,
    /// The item has been deleted.
    Removed,
}

/// The reaction record published to the main sink.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reaction {
    /// The todo item the reaction describes.
    #[serde(rename = "todoId")]
    pub todo_id: String,
    /// The user whose action produced the reaction.
    pub user: String,
    /// Resulting item status.
    pub status: TodoStatus,
    /// Current item text, when the item still exists.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

impl Reaction {
    /// Serializes the reaction into its raw text record.
    #[must_use]
    pub fn to_record(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// One transaction-log record published to the side channel.
///
/// Keyed by `tx_id`, so log entries partition independently of the
/// payload's natural key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxLogEntry {
    /// Unique transaction id, the txlog routing key.
    #[serde(rename = "txId")]
    pub tx_id: String,
    /// The todo item the transition applied to.
    #[serde(rename = "todoId")]
    pub todo_id: String,
    /// The user who caused the transition.
    pub user: String,
    /// The applied operation.
    pub op: ActionOp,
    /// When the transition was applied.
    pub at: DateTime<Utc>,
}

impl TxLogEntry {
    /// Creates an entry for an applied transition, stamped now.
    #[must_use]
    pub fn record(todo_id: impl Into<String>, user: impl Into<String>, op: ActionOp) -> Self {
        Self {
            tx_id: Uuid::new_v4().to_string(),
            todo_id: todo_id.into(),
            user: user.into(),
            op,
            at: Utc::now(),
        }
    }

    /// Serializes the entry into its raw text record.
    #[must_use]
    pub fn to_record(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}
