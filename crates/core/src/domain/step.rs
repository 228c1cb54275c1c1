use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::request::LeaveRequestId;
use crate::domain::staff::StaffId;

/// Closed set of approval roles. The original system compared free-form role
/// strings; each variant here maps to exactly one resolution strategy in
/// `resolve`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApproverRole {
    ImmediateSupervisor,
    UnitHead,
    Auditor,
    Director,
    HrDirector,
    HrOfficer,
    FinalAuthority,
}

impl ApproverRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ImmediateSupervisor => "immediate_supervisor",
            Self::UnitHead => "unit_head",
            Self::Auditor => "auditor",
            Self::Director => "director",
            Self::HrDirector => "hr_director",
            Self::HrOfficer => "hr_officer",
            Self::FinalAuthority => "final_authority",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "immediate_supervisor" => Some(Self::ImmediateSupervisor),
            "unit_head" => Some(Self::UnitHead),
            "auditor" => Some(Self::Auditor),
            "director" => Some(Self::Director),
            "hr_director" => Some(Self::HrDirector),
            "hr_officer" => Some(Self::HrOfficer),
            "final_authority" => Some(Self::FinalAuthority),
            _ => None,
        }
    }
}

impl std::fmt::Display for ApproverRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Approved,
    Rejected,
}

impl StepStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        }
    }
}

/// One required sign-off in a request's approval chain.
///
/// Levels are contiguous starting at 1 and unique within a request. A step
/// leaves `pending` exactly once; escalation metadata is the only mutation
/// permitted alongside a still-pending status.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalStep {
    pub request_id: LeaveRequestId,
    pub level: u32,
    pub approver_role: ApproverRole,
    pub approver_id: StaffId,
    pub approver_name: String,
    pub status: StepStatus,
    pub comments: Option<String>,
    pub approval_date: Option<DateTime<Utc>>,
    /// Set when this step becomes the current pending step: level 1 at
    /// submission, level n+1 when level n approves.
    pub activated_at: Option<DateTime<Utc>>,
    pub escalated: bool,
    pub escalated_to: Option<StaffId>,
    pub escalation_date: Option<DateTime<Utc>>,
}

impl ApprovalStep {
    pub fn is_pending(&self) -> bool {
        self.status == StepStatus::Pending
    }
}

/// Levels must be exactly `1..=N` with no gaps or duplicates. Enforced at the
/// storage boundary rather than trusted per call site.
pub fn levels_are_contiguous(steps: &[ApprovalStep]) -> bool {
    let mut levels: Vec<u32> = steps.iter().map(|step| step.level).collect();
    levels.sort_unstable();
    levels.iter().enumerate().all(|(index, level)| *level == index as u32 + 1)
}

/// The lowest-level pending step, if any. This is the step whose approver is
/// expected to act next.
pub fn next_pending_step(steps: &[ApprovalStep]) -> Option<&ApprovalStep> {
    steps.iter().filter(|step| step.is_pending()).min_by_key(|step| step.level)
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::{
        levels_are_contiguous, next_pending_step, ApprovalStep, ApproverRole, StepStatus,
    };
    use crate::domain::request::LeaveRequestId;
    use crate::domain::staff::StaffId;

    fn step(level: u32, status: StepStatus) -> ApprovalStep {
        ApprovalStep {
            request_id: LeaveRequestId("LR-1".to_string()),
            level,
            approver_role: ApproverRole::ImmediateSupervisor,
            approver_id: StaffId(format!("u-{level}")),
            approver_name: format!("Approver {level}"),
            status,
            comments: None,
            approval_date: None,
            activated_at: Some(Utc::now()),
            escalated: false,
            escalated_to: None,
            escalation_date: None,
        }
    }

    #[test]
    fn contiguous_levels_start_at_one_without_gaps() {
        let steps =
            vec![step(2, StepStatus::Pending), step(1, StepStatus::Pending), step(3, StepStatus::Pending)];
        assert!(levels_are_contiguous(&steps));

        let gapped = vec![step(1, StepStatus::Pending), step(3, StepStatus::Pending)];
        assert!(!levels_are_contiguous(&gapped));

        let duplicated = vec![step(1, StepStatus::Pending), step(1, StepStatus::Pending)];
        assert!(!levels_are_contiguous(&duplicated));

        let zero_based = vec![step(0, StepStatus::Pending), step(1, StepStatus::Pending)];
        assert!(!levels_are_contiguous(&zero_based));
    }

    #[test]
    fn next_pending_step_picks_lowest_pending_level() {
        let steps = vec![
            step(1, StepStatus::Approved),
            step(3, StepStatus::Pending),
            step(2, StepStatus::Pending),
        ];
        assert_eq!(next_pending_step(&steps).map(|s| s.level), Some(2));

        let done = vec![step(1, StepStatus::Approved), step(2, StepStatus::Rejected)];
        assert!(next_pending_step(&done).is_none());
    }
}
