use chrono::{DateTime, Utc};

use crate::domain::request::{LeaveRequest, LeaveRequestId, RequestStatus};
use crate::domain::staff::StaffId;
use crate::errors::WorkflowError;
use crate::flows::awaiting_external_clearance;
use crate::store::RequestRecord;

/// Preconditions for creating a linked resubmission: the requester owns the
/// original, the original was rejected, and the retry bound has not been
/// reached.
pub fn ensure_resubmittable(
    original: &RequestRecord,
    requester: &StaffId,
    limit: u32,
) -> Result<(), WorkflowError> {
    if original.request.staff_id != *requester {
        return Err(WorkflowError::NotRequestOwner {
            id: original.request.id.clone(),
            requester: requester.clone(),
        });
    }
    match original.request.status {
        RequestStatus::Rejected => {}
        RequestStatus::Pending
            if awaiting_external_clearance(&original.request, &original.steps) =>
        {
            return Err(WorkflowError::ExternalClearancePending {
                id: original.request.id.clone(),
            });
        }
        other => {
            return Err(WorkflowError::InvalidTransition {
                detail: format!(
                    "only rejected requests can be resubmitted; `{}` is {}",
                    original.request.id,
                    other.as_str()
                ),
            });
        }
    }
    if original.request.resubmission_count >= limit {
        return Err(WorkflowError::ResubmissionLimitExceeded {
            count: original.request.resubmission_count,
        });
    }
    Ok(())
}

/// A fresh request carrying the original payload forward. Workflow fields
/// are reset; the clearance flag comes from the re-run determination since
/// the org context may have changed.
pub fn carry_forward(
    original: &LeaveRequest,
    new_id: LeaveRequestId,
    requires_external_clearance: bool,
    now: DateTime<Utc>,
) -> LeaveRequest {
    LeaveRequest {
        id: new_id,
        staff_id: original.staff_id.clone(),
        staff_name: original.staff_name.clone(),
        leave_type: original.leave_type,
        start_date: original.start_date,
        end_date: original.end_date,
        day_count: original.day_count,
        reason: original.reason.clone(),
        officer_taking_over: original.officer_taking_over.clone(),
        handover_notes: original.handover_notes.clone(),
        status: RequestStatus::Pending,
        resubmitted_from: Some(original.id.clone()),
        resubmission_count: original.resubmission_count + 1,
        requires_external_clearance,
        external_clearance_status: requires_external_clearance
            .then_some(crate::domain::request::ClearanceStatus::Pending),
        hr_validated: None,
        created_at: now,
        updated_at: now,
    }
}
