//! Error types for the governance orchestrator

use crate::types::{IntentId, PlanId, PlanStatus};
use crate::validator::ValidationError;
use thiserror::Error;
use warden_audit::AuditError;

/// Errors returned by orchestrator operations.
///
/// Every variant leaves the orchestrator state exactly as it was before the
/// call.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("intent not found: {0}")]
    IntentNotFound(IntentId),

    #[error("plan not found: {0}")]
    PlanNotFound(PlanId),

    #[error("invalid transition for plan {plan_id}: cannot {action} from {from}")]
    InvalidTransition {
        plan_id: PlanId,
        from: PlanStatus,
        action: &'static str,
    },

    #[error("concurrent execution rejected: plan {requested} cannot start while plan {executing} is executing")]
    ConcurrentExecutionRejected { requested: PlanId, executing: PlanId },

    #[error("halt is active: plan {0} cannot start executing")]
    HaltActive(PlanId),

    #[error("audit write failed, operation aborted: {0}")]
    AuditWriteFailure(#[from] AuditError),
}

impl OrchestratorError {
    /// Whether this error is a rejected attempt to break an execution invariant
    pub fn is_invariant_violation(&self) -> bool {
        matches!(
            self,
            Self::ConcurrentExecutionRejected { .. } | Self::HaltActive(_)
        )
    }
}

/// Result type for orchestrator operations
pub type Result<T> = std::result::Result<T, OrchestratorError>;
