use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::request::LeaveRequest;
use crate::domain::step::{ApprovalStep, ApproverRole};

/// SLA for one approval level. Thresholds are policy data, not execution
/// timeouts.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LevelSla {
    pub threshold_hours: i64,
    /// Whether the level may be closed by policy instead of a person.
    pub auto_approve: bool,
    /// Default escalation target when no explicit target is supplied.
    pub escalate_to: Option<ApproverRole>,
}

impl Default for LevelSla {
    fn default() -> Self {
        Self { threshold_hours: 72, auto_approve: false, escalate_to: Some(ApproverRole::FinalAuthority) }
    }
}

#[derive(Clone, Debug, Default)]
pub struct EscalationPolicy {
    default: LevelSla,
    overrides: HashMap<ApproverRole, LevelSla>,
}

impl EscalationPolicy {
    pub fn new(default: LevelSla, overrides: HashMap<ApproverRole, LevelSla>) -> Self {
        Self { default, overrides }
    }

    pub fn sla_for(&self, role: ApproverRole) -> &LevelSla {
        self.overrides.get(&role).unwrap_or(&self.default)
    }
}

/// What the periodic sweep should do with one pending step.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SweepAction {
    /// Inside SLA, or nothing further to do.
    Wait,
    /// Close the step with an attributed policy approval.
    AutoApprove,
    /// Flag the step and notify the target; the step itself stays pending.
    Escalate { to: ApproverRole },
}

/// Evaluates one pending step against its level's SLA.
///
/// Elapsed time is measured from the step's activation, falling back to the
/// request's creation. Escalation fires at most once per step; the
/// auto-approval branch is independent and may still fire on a step that was
/// escalated by an earlier run.
pub fn evaluate_step(
    policy: &EscalationPolicy,
    request: &LeaveRequest,
    step: &ApprovalStep,
    now: DateTime<Utc>,
) -> SweepAction {
    if !step.is_pending() {
        return SweepAction::Wait;
    }

    let since = step.activated_at.unwrap_or(request.created_at);
    let sla = policy.sla_for(step.approver_role);
    if now - since < Duration::hours(sla.threshold_hours) {
        return SweepAction::Wait;
    }

    if sla.auto_approve {
        return SweepAction::AutoApprove;
    }
    if !step.escalated {
        return SweepAction::Escalate {
            to: sla.escalate_to.unwrap_or(ApproverRole::FinalAuthority),
        };
    }
    SweepAction::Wait
}
