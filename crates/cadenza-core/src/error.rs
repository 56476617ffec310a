//! Error taxonomy for the dispatcher and tool layer

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{HandlerId, TurnPhase};

/// Errors that cross the dispatcher boundary.
///
/// `ProfileNotFound` is fatal to conversation start. The remaining
/// variants are invariant violations: the turn is aborted rather than
/// continuing with an inconsistent conversation state.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("no customer profile found for id {0}")]
    ProfileNotFound(i64),

    #[error("cannot leave the primary handler: delegate stack would underflow")]
    StackUnderflow,

    #[error("invalid state transition: {0}")]
    InvalidStateTransition(String),

    #[error("routing did not reach a stable point within {0} steps")]
    RouteLimitExceeded(usize),

    #[error("collaborator failure: {0:#}")]
    Collaborator(#[from] anyhow::Error),
}

impl DispatchError {
    pub(crate) fn invalid(detail: impl Into<String>) -> Self {
        Self::InvalidStateTransition(detail.into())
    }

    pub(crate) fn illegal_transition(handler: HandlerId, transition: &str, phase: TurnPhase) -> Self {
        Self::InvalidStateTransition(format!(
            "{} handler emitted {} during {:?}",
            handler, transition, phase
        ))
    }

    /// Generic notice shown to the user when the conversation cannot continue
    pub fn user_notice(&self) -> &'static str {
        match self {
            Self::ProfileNotFound(_) => {
                "Sorry, I couldn't find your customer account, so I can't help with this conversation."
            }
            _ => "Sorry, something went wrong on our side and this conversation has to end. Please start a new one.",
        }
    }
}

/// Stable, serializable classification of a tool failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolErrorKind {
    NotFound,
    Validation,
    Connectivity,
    Timeout,
    Unauthorized,
    ConfirmationFailed,
    ConfirmationCancelled,
    AlreadyResolved,
}

/// A recoverable tool failure, fed back to the active handler as a tool message
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ToolError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid input: {0}")]
    Validation(String),

    #[error("backend unavailable: {0}")]
    Connectivity(String),

    #[error("tool timed out after {0}s")]
    Timeout(u64),

    #[error("tool '{tool}' is not available to the {handler} handler")]
    Unauthorized { tool: String, handler: HandlerId },

    #[error("confirmation failed: {0}")]
    ConfirmationFailed(String),

    #[error("the request was cancelled before it ran")]
    ConfirmationCancelled,

    #[error("tool call {0} was already executed")]
    AlreadyResolved(String),
}

impl ToolError {
    pub fn kind(&self) -> ToolErrorKind {
        match self {
            Self::NotFound(_) => ToolErrorKind::NotFound,
            Self::Validation(_) => ToolErrorKind::Validation,
            Self::Connectivity(_) => ToolErrorKind::Connectivity,
            Self::Timeout(_) => ToolErrorKind::Timeout,
            Self::Unauthorized { .. } => ToolErrorKind::Unauthorized,
            Self::ConfirmationFailed(_) => ToolErrorKind::ConfirmationFailed,
            Self::ConfirmationCancelled => ToolErrorKind::ConfirmationCancelled,
            Self::AlreadyResolved(_) => ToolErrorKind::AlreadyResolved,
        }
    }
}

impl From<anyhow::Error> for ToolError {
    fn from(e: anyhow::Error) -> Self {
        Self::Connectivity(format!("{:#}", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tool_error_kinds() {
        assert_eq!(ToolError::Timeout(5).kind(), ToolErrorKind::Timeout);
        let unauthorized = ToolError::Unauthorized {
            tool: "update_email".to_string(),
            handler: HandlerId::MusicCatalog,
        };
        assert_eq!(unauthorized.kind(), ToolErrorKind::Unauthorized);
        assert!(unauthorized.to_string().contains("music_catalog"));
    }

    #[test]
    fn test_anyhow_maps_to_connectivity() {
        let err: ToolError = anyhow::anyhow!("database is locked").into();
        assert_eq!(err.kind(), ToolErrorKind::Connectivity);
    }

    #[test]
    fn test_user_notice_is_generic_for_defects() {
        let notice = DispatchError::StackUnderflow.user_notice();
        assert!(!notice.contains("underflow"));
        assert!(DispatchError::ProfileNotFound(3).user_notice().contains("account"));
    }
}
