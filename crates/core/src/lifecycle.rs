use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::DocumentStatus;

/// Actions that move a billing note or receipt through its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionAction {
    Submit,
    Approve,
    Reject,
    Void,
}

impl TransitionAction {
    /// Returns the metrics/log label for the action.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Submit => "submit",
            Self::Approve => "approve",
            Self::Reject => "reject",
            Self::Void => "void",
        }
    }

    /// Review actions are reserved for ADMIN actors.
    pub fn requires_admin(self) -> bool {
        matches!(self, Self::Approve | Self::Reject | Self::Void)
    }
}

impl fmt::Display for TransitionAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Validates a lifecycle transition and returns the resulting status.
///
/// The machine is `DRAFT -> PENDING -> APPROVED -> (REJECTED | VOIDED)`
/// with REJECTED reached from PENDING and VOIDED from APPROVED. Every
/// other combination is a conflict.
pub fn next_status(
    current: DocumentStatus,
    action: TransitionAction,
) -> Result<DocumentStatus, TransitionError> {
    match (current, action) {
        (DocumentStatus::Draft, TransitionAction::Submit) => Ok(DocumentStatus::Pending),
        (DocumentStatus::Pending, TransitionAction::Approve) => Ok(DocumentStatus::Approved),
        (DocumentStatus::Pending, TransitionAction::Reject) => Ok(DocumentStatus::Rejected),
        (DocumentStatus::Approved, TransitionAction::Void) => Ok(DocumentStatus::Voided),
        _ => Err(TransitionError {
            from: current,
            action,
        }),
    }
}

/// Invalid (state, action) combination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("cannot {action} a {from} document")]
pub struct TransitionError {
    pub from: DocumentStatus,
    pub action: TransitionAction,
}
