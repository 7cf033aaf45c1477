//! Ingest filter for action records.

use super::RecordFilter;
use crate::model::TodoAction;
use tracing::debug;

/// Discards records that do not parse as a well-formed todo action.
#[derive(Debug, Clone, Copy, Default)]
pub struct ActionFilter;

impl ActionFilter {
    /// Creates the filter.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl RecordFilter for ActionFilter {
    fn accept(&self, record: &str) -> bool {
        let accepted = TodoAction::parse(record).is_some();
        if !accepted {
            debug!(record, "dropping unrecognized action record");
        }
        accepted
    }
}
