//! Consumer-visible state of a preview slot.

use crate::models::media::FormatFamily;
use serde::Serialize;

#[derive(Serialize, Clone, Debug, Default, PartialEq, Eq)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum PreviewState {
    /// Nothing selected.
    #[default]
    Idle,
    /// A selection is being converted.
    Pending,
    /// The latest selection is displayable at `url`.
    Ready { url: String },
    /// The latest selection could not be converted.
    Failed { family: FormatFamily, reason: String },
}

impl PreviewState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, PreviewState::Ready { .. } | PreviewState::Failed { .. })
    }
}
