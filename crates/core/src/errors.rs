use thiserror::Error;

use crate::domain::request::LeaveRequestId;
use crate::domain::staff::StaffId;
use crate::domain::step::ApproverRole;
use crate::store::StoreError;

/// Failures surfaced by the engine's public operations. Every variant carries
/// a stable machine code and a plain-language message separate from the
/// diagnostic `Display` text.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum WorkflowError {
    #[error("no staff profile on record for `{staff_id}`")]
    UnknownStaff { staff_id: StaffId },
    #[error("staff member is not eligible for this leave: {}", reasons.join("; "))]
    NotEligible { reasons: Vec<String> },
    #[error("no approver could be resolved for role `{role}`")]
    ApproverNotFound { role: ApproverRole },
    #[error("leave request `{id}` not found")]
    RequestNotFound { id: LeaveRequestId },
    #[error("leave request `{id}` has no approval step at level {level}")]
    StepNotFound { id: LeaveRequestId, level: u32 },
    #[error("invalid transition: {detail}")]
    InvalidTransition { detail: String },
    #[error("resubmission limit reached after {count} attempts")]
    ResubmissionLimitExceeded { count: u32 },
    #[error("leave request `{id}` is awaiting external clearance")]
    ExternalClearancePending { id: LeaveRequestId },
    #[error("staff member `{requester}` does not own leave request `{id}`")]
    NotRequestOwner { id: LeaveRequestId, requester: StaffId },
    #[error("domain invariant violation: {0}")]
    Invariant(String),
    #[error(transparent)]
    Storage(#[from] StoreError),
}

impl WorkflowError {
    /// Stable machine-readable code, safe to match on across releases.
    pub fn code(&self) -> &'static str {
        match self {
            Self::UnknownStaff { .. } => "unknown_staff",
            Self::NotEligible { .. } => "not_eligible",
            Self::ApproverNotFound { .. } => "approver_not_found",
            Self::RequestNotFound { .. } => "request_not_found",
            Self::StepNotFound { .. } => "step_not_found",
            Self::InvalidTransition { .. } => "invalid_transition",
            Self::ResubmissionLimitExceeded { .. } => "resubmission_limit_exceeded",
            Self::ExternalClearancePending { .. } => "external_clearance_pending",
            Self::NotRequestOwner { .. } => "not_request_owner",
            Self::Invariant(_) => "invariant_violation",
            Self::Storage(_) => "storage_unavailable",
        }
    }

    /// User-facing wording, free of internal diagnostic detail.
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::UnknownStaff { .. } => "We could not find your staff record.",
            Self::NotEligible { .. } => "You are not eligible for this leave request.",
            Self::ApproverNotFound { .. } => {
                "No approver is available for your request. Contact HR to update the approval chain."
            }
            Self::RequestNotFound { .. } | Self::StepNotFound { .. } => {
                "The leave request could not be found."
            }
            Self::InvalidTransition { .. } => {
                "This approval has already been processed or cannot be changed."
            }
            Self::ResubmissionLimitExceeded { .. } => {
                "This request has been resubmitted the maximum number of times. Please create a new request."
            }
            Self::ExternalClearancePending { .. } => {
                "This request is awaiting clearance from the external authority."
            }
            Self::NotRequestOwner { .. } => "Only the requester can perform this action.",
            Self::Invariant(_) => "The request could not be processed. Check inputs and try again.",
            Self::Storage(_) => "The service is temporarily unavailable. Please retry shortly.",
        }
    }

    /// Transient failures the caller should retry with the same idempotency
    /// key; everything else is a definitive outcome.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Storage(_))
    }
}

#[cfg(test)]
mod tests {
    use super::WorkflowError;
    use crate::domain::request::LeaveRequestId;
    use crate::store::StoreError;

    #[test]
    fn codes_are_stable_and_distinct_from_diagnostics() {
        let error = WorkflowError::ResubmissionLimitExceeded { count: 3 };
        assert_eq!(error.code(), "resubmission_limit_exceeded");
        assert!(error.to_string().contains('3'));
        assert!(!error.user_message().contains('3'));
    }

    #[test]
    fn only_storage_failures_are_retryable() {
        let storage = WorkflowError::from(StoreError::Backend("lock timeout".to_string()));
        assert!(storage.is_retryable());
        assert_eq!(storage.code(), "storage_unavailable");

        let terminal =
            WorkflowError::RequestNotFound { id: LeaveRequestId("LR-404".to_string()) };
        assert!(!terminal.is_retryable());
    }
}
