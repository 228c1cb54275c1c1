use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::request::{ClearanceStatus, LeaveRequest, RequestStatus};
use crate::domain::step::{ApprovalStep, StepStatus};
use crate::errors::WorkflowError;

/// Interactive decision on one approval step.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Approve,
    Reject,
}

impl Decision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Approve => "approve",
            Self::Reject => "reject",
        }
    }
}

/// Administrative override outcomes. `Reversed` cancels the request outside
/// the normal sequence.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ForcedStatus {
    Approved,
    Rejected,
    Reversed,
}

impl ForcedStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Reversed => "reversed",
        }
    }
}

/// Request status derived from the full set of step states plus the external
/// clearance gate. Never maintained incrementally.
///
/// A rejection anywhere rejects the request immediately; remaining pending
/// steps are abandoned, not auto-closed. Full approval only becomes terminal
/// once the clearance gate (when applicable) has cleared. A cancelled
/// request stays cancelled.
pub fn derived_status(request: &LeaveRequest, steps: &[ApprovalStep]) -> RequestStatus {
    if request.status == RequestStatus::Cancelled {
        return RequestStatus::Cancelled;
    }
    if request.requires_external_clearance
        && matches!(request.external_clearance_status, Some(ClearanceStatus::Rejected))
    {
        return RequestStatus::Rejected;
    }
    if steps.iter().any(|step| step.status == StepStatus::Rejected) {
        return RequestStatus::Rejected;
    }
    let all_approved =
        !steps.is_empty() && steps.iter().all(|step| step.status == StepStatus::Approved);
    if all_approved && !request.clearance_outstanding() {
        return RequestStatus::Approved;
    }
    RequestStatus::Pending
}

/// The "awaiting external clearance" sub-state: every internal step has
/// approved but the external authority has not resolved the gate.
pub fn awaiting_external_clearance(request: &LeaveRequest, steps: &[ApprovalStep]) -> bool {
    request.clearance_outstanding()
        && !matches!(request.external_clearance_status, Some(ClearanceStatus::Rejected))
        && !steps.is_empty()
        && steps.iter().all(|step| step.status == StepStatus::Approved)
        && request.status != RequestStatus::Cancelled
}

/// Moves a step out of `pending` exactly once. Anything else is an invalid
/// transition reported as "already processed".
pub fn apply_decision(
    step: &mut ApprovalStep,
    decision: Decision,
    comments: Option<String>,
    now: DateTime<Utc>,
) -> Result<(), WorkflowError> {
    if !step.is_pending() {
        return Err(WorkflowError::InvalidTransition {
            detail: format!(
                "step {} of `{}` was already processed ({})",
                step.level,
                step.request_id,
                step.status.as_str()
            ),
        });
    }
    step.status = match decision {
        Decision::Approve => StepStatus::Approved,
        Decision::Reject => StepStatus::Rejected,
    };
    step.comments = comments;
    step.approval_date = Some(now);
    Ok(())
}

/// Stamps the activation time on the step that just became current, if any.
pub fn activate_next_pending(steps: &mut [ApprovalStep], now: DateTime<Utc>) {
    if let Some(next) = steps
        .iter_mut()
        .filter(|step| step.is_pending())
        .min_by_key(|step| step.level)
    {
        if next.activated_at.is_none() {
            next.activated_at = Some(now);
        }
    }
}
