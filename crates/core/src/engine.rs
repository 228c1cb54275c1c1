use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::audit::{AuditRecord, AuditSink};
use crate::compliance::ComplianceCheck;
use crate::domain::request::{
    ClearanceStatus, LeaveRequest, LeaveRequestId, LeaveType, RequestStatus,
};
use crate::domain::staff::{Person, StaffId};
use crate::domain::step::{next_pending_step, ApprovalStep, ApproverRole, StepStatus};
use crate::errors::WorkflowError;
use crate::escalation::{evaluate_step, EscalationPolicy, SweepAction};
use crate::flows::{
    activate_next_pending, apply_decision, awaiting_external_clearance, derived_status, Decision,
    ForcedStatus,
};
use crate::notify::{Notification, Notifier};
use crate::resolve::{person_named, resolve_approver, ResolutionContext};
use crate::resubmit::{carry_forward, ensure_resubmittable};
use crate::routing::RoutePlanner;
use crate::store::{RecordStore, RequestFilter, RequestRecord, StepGuard};

/// Payload for a new submission. Everything else on the stored request is
/// derived by the engine.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewLeaveRequest {
    pub staff_id: StaffId,
    pub leave_type: LeaveType,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub day_count: u32,
    pub reason: String,
    pub officer_taking_over: Option<StaffId>,
    pub handover_notes: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmissionReceipt {
    pub request_id: LeaveRequestId,
    pub first_approver: Person,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecisionOutcome {
    pub status: RequestStatus,
    pub awaiting_external_clearance: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepBrief {
    pub level: u32,
    pub approver_role: ApproverRole,
    pub approver_name: String,
    pub status: StepStatus,
    pub escalated: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusReport {
    pub request_id: LeaveRequestId,
    pub status: RequestStatus,
    pub awaiting_external_clearance: bool,
    pub hr_validated: Option<bool>,
    pub steps: Vec<StepBrief>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SweepOutcome {
    pub evaluated: usize,
    pub auto_approved: Vec<(LeaveRequestId, u32)>,
    pub escalated: Vec<(LeaveRequestId, u32)>,
}

/// The approval workflow engine. Request-driven with no state of its own:
/// everything lives behind the record-store port.
pub struct WorkflowEngine<S, N, A, C> {
    store: S,
    notifier: N,
    audit: A,
    compliance: C,
    planner: RoutePlanner,
    policy: EscalationPolicy,
}

impl<S, N, A, C> WorkflowEngine<S, N, A, C>
where
    S: RecordStore,
    N: Notifier,
    A: AuditSink,
    C: ComplianceCheck,
{
    pub fn new(
        store: S,
        notifier: N,
        audit: A,
        compliance: C,
        planner: RoutePlanner,
        policy: EscalationPolicy,
    ) -> Self {
        Self { store, notifier, audit, compliance, planner, policy }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Runs eligibility, workflow determination, and approver resolution,
    /// then persists the request with its full approval chain and notifies
    /// the first approver.
    pub async fn submit(
        &self,
        new_request: NewLeaveRequest,
    ) -> Result<SubmissionReceipt, WorkflowError> {
        if new_request.end_date < new_request.start_date || new_request.day_count == 0 {
            return Err(WorkflowError::Invariant(format!(
                "leave window {}..={} with {} day(s) is not a valid request",
                new_request.start_date, new_request.end_date, new_request.day_count
            )));
        }

        let profile = self
            .store
            .load_org_profile(&new_request.staff_id)
            .await?
            .ok_or_else(|| WorkflowError::UnknownStaff {
                staff_id: new_request.staff_id.clone(),
            })?;

        let eligibility = self.compliance.is_eligible(
            &new_request.staff_id,
            new_request.leave_type,
            new_request.day_count,
        )?;
        if !eligibility.eligible {
            return Err(WorkflowError::NotEligible { reasons: eligibility.reasons });
        }

        let now = Utc::now();
        let plan =
            self.planner.plan(&profile, new_request.leave_type, new_request.day_count);
        let request_id = LeaveRequestId(Uuid::new_v4().to_string());
        let ctx = ResolutionContext {
            requester: &profile,
            directory: self.planner.directory(),
            leave_type: new_request.leave_type,
            today: now.date_naive(),
        };

        let mut steps = Vec::with_capacity(plan.levels.len());
        for planned in &plan.levels {
            let resolved = resolve_approver(&self.store, planned.approver_role, &ctx).await?;
            steps.push(ApprovalStep {
                request_id: request_id.clone(),
                level: planned.level,
                approver_role: planned.approver_role,
                approver_id: resolved.person.staff_id,
                approver_name: resolved.person.display_name,
                status: StepStatus::Pending,
                comments: None,
                approval_date: None,
                activated_at: (planned.level == 1).then_some(now),
                escalated: false,
                escalated_to: None,
                escalation_date: None,
            });
        }

        let request = LeaveRequest {
            id: request_id.clone(),
            staff_id: new_request.staff_id.clone(),
            staff_name: profile.display_name.clone(),
            leave_type: new_request.leave_type,
            start_date: new_request.start_date,
            end_date: new_request.end_date,
            day_count: new_request.day_count,
            reason: new_request.reason,
            officer_taking_over: new_request.officer_taking_over,
            handover_notes: new_request.handover_notes,
            status: RequestStatus::Pending,
            resubmitted_from: None,
            resubmission_count: 0,
            requires_external_clearance: plan.requires_external_clearance,
            external_clearance_status: plan
                .requires_external_clearance
                .then_some(ClearanceStatus::Pending),
            hr_validated: None,
            created_at: now,
            updated_at: now,
        };

        let record = RequestRecord { request, steps };
        self.store.save_request(&record).await?;

        info!(
            event_name = "workflow.request_submitted",
            request_id = %request_id,
            staff_id = %new_request.staff_id,
            levels = record.steps.len(),
            "leave request submitted"
        );
        self.audit_warn(
            AuditRecord::new("request.submitted", new_request.staff_id.0.clone(), request_id.clone())
                .with_detail("leave_type", new_request.leave_type.as_str())
                .with_detail("levels", record.steps.len().to_string()),
        );

        let first = record.steps.first().ok_or_else(|| {
            WorkflowError::Invariant(format!("approval chain for `{request_id}` is empty"))
        })?;
        self.notify_warn(
            &first.approver_id.clone(),
            Notification::new(
                "Leave request awaiting your approval",
                format!(
                    "{} requested {} day(s) of {} leave.",
                    record.request.staff_name, record.request.day_count, record.request.leave_type
                ),
            )
            .with_link(format!("/leaves/{request_id}")),
        );

        Ok(SubmissionReceipt {
            request_id,
            first_approver: Person {
                staff_id: first.approver_id.clone(),
                display_name: first.approver_name.clone(),
            },
        })
    }

    /// Applies an approve/reject decision to one step. Concurrent decisions
    /// on the same step serialize through the store's guarded write: exactly
    /// one wins, the loser sees an invalid-transition error.
    pub async fn decide(
        &self,
        request_id: &LeaveRequestId,
        level: u32,
        decision: Decision,
        actor: &StaffId,
        comments: Option<String>,
    ) -> Result<DecisionOutcome, WorkflowError> {
        let record = self.load_record(request_id).await?;
        if record.request.status.is_terminal() {
            return Err(WorkflowError::InvalidTransition {
                detail: format!(
                    "leave request `{request_id}` is already {}",
                    record.request.status.as_str()
                ),
            });
        }

        let now = Utc::now();
        let mut mutated = record;
        let role = {
            let step = mutated
                .step_at_mut(level)
                .ok_or_else(|| WorkflowError::StepNotFound { id: request_id.clone(), level })?;
            apply_decision(step, decision, comments, now)?;
            step.approver_role
        };
        if role == ApproverRole::HrOfficer {
            mutated.request.hr_validated = Some(decision == Decision::Approve);
        }
        if decision == Decision::Approve {
            activate_next_pending(&mut mutated.steps, now);
        }
        mutated.request.updated_at = now;
        mutated.request.status = derived_status(&mutated.request, &mutated.steps);

        let Some(updated) =
            self.store.commit_step_transition(&mutated, level, StepGuard::Pending).await?
        else {
            return Err(WorkflowError::InvalidTransition {
                detail: format!(
                    "step {level} of `{request_id}` was already processed"
                ),
            });
        };

        self.audit_warn(
            AuditRecord::new("request.decided", actor.0.clone(), request_id.clone())
                .with_detail("level", level.to_string())
                .with_detail("decision", decision.as_str())
                .with_detail("status", updated.request.status.as_str()),
        );
        self.fan_out_decision_notifications(&updated, decision);

        Ok(DecisionOutcome {
            status: updated.request.status,
            awaiting_external_clearance: awaiting_external_clearance(
                &updated.request,
                &updated.steps,
            ),
        })
    }

    /// Marks a pending step escalated and notifies the target. The step's
    /// status does not change; a decision must still follow.
    pub async fn escalate(
        &self,
        request_id: &LeaveRequestId,
        level: u32,
        target: Option<StaffId>,
    ) -> Result<ApprovalStep, WorkflowError> {
        let record = self.load_record(request_id).await?;
        let step = record
            .step_at(level)
            .ok_or_else(|| WorkflowError::StepNotFound { id: request_id.clone(), level })?;
        if !step.is_pending() {
            return Err(WorkflowError::InvalidTransition {
                detail: format!("step {level} of `{request_id}` was already processed"),
            });
        }
        if step.escalated {
            return Err(WorkflowError::InvalidTransition {
                detail: format!("step {level} of `{request_id}` is already escalated"),
            });
        }

        let person = match target {
            Some(staff_id) => person_named(&self.store, &staff_id).await?,
            None => {
                let role = self
                    .policy
                    .sla_for(step.approver_role)
                    .escalate_to
                    .unwrap_or(ApproverRole::FinalAuthority);
                self.resolve_for_request(&record.request, role).await?
            }
        };

        let now = Utc::now();
        match self.apply_escalation(record, level, person, now).await? {
            Some(updated) => Ok(updated
                .step_at(level)
                .cloned()
                .ok_or_else(|| WorkflowError::StepNotFound { id: request_id.clone(), level })?),
            None => Err(WorkflowError::InvalidTransition {
                detail: format!(
                    "step {level} of `{request_id}` is already escalated or decided"
                ),
            }),
        }
    }

    /// Records the external authority's verdict. Clearance rejection rejects
    /// the request outright; clearing unlocks final approval once the
    /// internal chain is complete.
    pub async fn set_external_clearance(
        &self,
        request_id: &LeaveRequestId,
        status: ClearanceStatus,
        references: Option<String>,
    ) -> Result<LeaveRequest, WorkflowError> {
        let record = self.load_record(request_id).await?;
        if !record.request.requires_external_clearance {
            return Err(WorkflowError::InvalidTransition {
                detail: format!(
                    "leave request `{request_id}` does not require external clearance"
                ),
            });
        }
        if record.request.status.is_terminal() {
            return Err(WorkflowError::InvalidTransition {
                detail: format!(
                    "leave request `{request_id}` is already {}",
                    record.request.status.as_str()
                ),
            });
        }
        if status == ClearanceStatus::Pending {
            return Err(WorkflowError::InvalidTransition {
                detail: "external clearance cannot be reset to pending".to_string(),
            });
        }

        let updated = self
            .store
            .commit_clearance(request_id, status)
            .await?
            .ok_or_else(|| WorkflowError::RequestNotFound { id: request_id.clone() })?;

        let mut audit = AuditRecord::new(
            "request.clearance_updated",
            "external_authority",
            request_id.clone(),
        )
        .with_detail("clearance", status.as_str())
        .with_detail("status", updated.request.status.as_str());
        if let Some(references) = references {
            audit = audit.with_detail("references", references);
        }
        self.audit_warn(audit);

        let summary = match updated.request.status {
            RequestStatus::Approved => "Your leave request is approved.",
            RequestStatus::Rejected => "Your leave request was rejected by the external authority.",
            _ => "External clearance was recorded on your leave request.",
        };
        self.notify_warn(
            &updated.request.staff_id.clone(),
            Notification::new("Leave request update", summary)
                .with_link(format!("/leaves/{request_id}")),
        );

        Ok(updated.request)
    }

    /// Creates a linked resubmission from a rejected request, re-running
    /// determination and resolution against the current org context.
    pub async fn resubmit(
        &self,
        request_id: &LeaveRequestId,
        requester: &StaffId,
    ) -> Result<LeaveRequestId, WorkflowError> {
        let original = self.load_record(request_id).await?;
        ensure_resubmittable(&original, requester, self.planner.rules().resubmission_limit)?;

        let profile = self
            .store
            .load_org_profile(requester)
            .await?
            .ok_or_else(|| WorkflowError::UnknownStaff { staff_id: requester.clone() })?;

        let now = Utc::now();
        let plan = self.planner.plan(
            &profile,
            original.request.leave_type,
            original.request.day_count,
        );
        let new_id = LeaveRequestId(Uuid::new_v4().to_string());
        let request = carry_forward(
            &original.request,
            new_id.clone(),
            plan.requires_external_clearance,
            now,
        );

        let ctx = ResolutionContext {
            requester: &profile,
            directory: self.planner.directory(),
            leave_type: request.leave_type,
            today: now.date_naive(),
        };
        let mut steps = Vec::with_capacity(plan.levels.len());
        for planned in &plan.levels {
            let resolved = resolve_approver(&self.store, planned.approver_role, &ctx).await?;
            steps.push(ApprovalStep {
                request_id: new_id.clone(),
                level: planned.level,
                approver_role: planned.approver_role,
                approver_id: resolved.person.staff_id,
                approver_name: resolved.person.display_name,
                status: StepStatus::Pending,
                comments: None,
                approval_date: None,
                activated_at: (planned.level == 1).then_some(now),
                escalated: false,
                escalated_to: None,
                escalation_date: None,
            });
        }

        let record = RequestRecord { request, steps };
        self.store.save_request(&record).await?;

        self.audit_warn(
            AuditRecord::new("request.resubmitted", requester.0.clone(), new_id.clone())
                .with_detail("original", request_id.0.clone())
                .with_detail(
                    "resubmission_count",
                    record.request.resubmission_count.to_string(),
                ),
        );
        let first = record.steps.first().ok_or_else(|| {
            WorkflowError::Invariant(format!("approval chain for `{new_id}` is empty"))
        })?;
        self.notify_warn(
            &first.approver_id.clone(),
            Notification::new(
                "Leave request awaiting your approval",
                format!(
                    "{} resubmitted {} day(s) of {} leave.",
                    record.request.staff_name, record.request.day_count, record.request.leave_type
                ),
            )
            .with_link(format!("/leaves/{new_id}")),
        );

        Ok(new_id)
    }

    /// Administrative override. Bypasses step-order invariants and the
    /// compare-and-set guard; every use is separately audited with the
    /// supplied reason.
    pub async fn override_step(
        &self,
        request_id: &LeaveRequestId,
        level: u32,
        forced: ForcedStatus,
        actor: &StaffId,
        reason: String,
    ) -> Result<LeaveRequest, WorkflowError> {
        let mut record = self.load_record(request_id).await?;
        if record.step_at(level).is_none() {
            return Err(WorkflowError::StepNotFound { id: request_id.clone(), level });
        }

        let now = Utc::now();
        match forced {
            ForcedStatus::Approved | ForcedStatus::Rejected => {
                let role = {
                    let step = record
                        .step_at_mut(level)
                        .ok_or_else(|| WorkflowError::StepNotFound {
                            id: request_id.clone(),
                            level,
                        })?;
                    step.status = if forced == ForcedStatus::Approved {
                        StepStatus::Approved
                    } else {
                        StepStatus::Rejected
                    };
                    step.comments = Some(reason.clone());
                    step.approval_date = Some(now);
                    step.approver_role
                };
                if role == ApproverRole::HrOfficer {
                    record.request.hr_validated = Some(forced == ForcedStatus::Approved);
                }
                if forced == ForcedStatus::Approved {
                    activate_next_pending(&mut record.steps, now);
                }
                record.request.status = derived_status(&record.request, &record.steps);
            }
            ForcedStatus::Reversed => {
                record.request.status = RequestStatus::Cancelled;
            }
        }
        record.request.updated_at = now;

        self.store.commit_step_transition(&record, level, StepGuard::Unguarded).await?;

        self.audit_warn(
            AuditRecord::new("request.overridden", actor.0.clone(), request_id.clone())
                .with_detail("level", level.to_string())
                .with_detail("forced", forced.as_str())
                .with_detail("reason", reason)
                .with_detail("status", record.request.status.as_str()),
        );
        self.notify_warn(
            &record.request.staff_id.clone(),
            Notification::new(
                "Leave request update",
                format!(
                    "An administrator set your leave request to {}.",
                    record.request.status.as_str()
                ),
            )
            .with_link(format!("/leaves/{request_id}")),
        );

        Ok(record.request)
    }

    /// Periodic pass over every pending request's current step, applying the
    /// escalation policy with the same guarded writes as interactive
    /// decisions, so a sweep racing a decision cannot double-apply.
    pub async fn sweep(&self, now: DateTime<Utc>) -> Result<SweepOutcome, WorkflowError> {
        let pending = self.store.list_requests(&RequestFilter::pending()).await?;
        let mut outcome = SweepOutcome::default();

        for record in pending {
            let Some((level, action)) = next_pending_step(&record.steps)
                .map(|step| (step.level, evaluate_step(&self.policy, &record.request, step, now)))
            else {
                continue;
            };
            outcome.evaluated += 1;

            match action {
                SweepAction::Wait => {}
                SweepAction::AutoApprove => {
                    let request_id = record.request.id.clone();
                    if self.apply_auto_approval(record, level, now).await?.is_some() {
                        outcome.auto_approved.push((request_id, level));
                    }
                }
                SweepAction::Escalate { to } => {
                    let request_id = record.request.id.clone();
                    let person = match self.resolve_for_request(&record.request, to).await {
                        Ok(person) => person,
                        Err(WorkflowError::ApproverNotFound { role }) => {
                            warn!(
                                event_name = "sweep.escalation_target_unresolved",
                                request_id = %request_id,
                                role = %role,
                                "no escalation target could be resolved; leaving step as-is"
                            );
                            continue;
                        }
                        Err(other) => return Err(other),
                    };
                    if self.apply_escalation(record, level, person, now).await?.is_some() {
                        outcome.escalated.push((request_id, level));
                    }
                }
            }
        }

        info!(
            event_name = "workflow.sweep_completed",
            evaluated = outcome.evaluated,
            auto_approved = outcome.auto_approved.len(),
            escalated = outcome.escalated.len(),
            "escalation sweep completed"
        );
        Ok(outcome)
    }

    /// Direct status query, including the awaiting-clearance sub-state.
    pub async fn status(
        &self,
        request_id: &LeaveRequestId,
    ) -> Result<StatusReport, WorkflowError> {
        let record = self.load_record(request_id).await?;
        Ok(StatusReport {
            request_id: record.request.id.clone(),
            status: record.request.status,
            awaiting_external_clearance: awaiting_external_clearance(
                &record.request,
                &record.steps,
            ),
            hr_validated: record.request.hr_validated,
            steps: record
                .steps
                .iter()
                .map(|step| StepBrief {
                    level: step.level,
                    approver_role: step.approver_role,
                    approver_name: step.approver_name.clone(),
                    status: step.status,
                    escalated: step.escalated,
                })
                .collect(),
        })
    }

    async fn load_record(
        &self,
        request_id: &LeaveRequestId,
    ) -> Result<RequestRecord, WorkflowError> {
        self.store
            .load_request(request_id)
            .await?
            .ok_or_else(|| WorkflowError::RequestNotFound { id: request_id.clone() })
    }

    async fn resolve_for_request(
        &self,
        request: &LeaveRequest,
        role: ApproverRole,
    ) -> Result<Person, WorkflowError> {
        let profile = self
            .store
            .load_org_profile(&request.staff_id)
            .await?
            .ok_or_else(|| WorkflowError::UnknownStaff { staff_id: request.staff_id.clone() })?;
        let ctx = ResolutionContext {
            requester: &profile,
            directory: self.planner.directory(),
            leave_type: request.leave_type,
            today: Utc::now().date_naive(),
        };
        Ok(resolve_approver(&self.store, role, &ctx).await?.person)
    }

    async fn apply_escalation(
        &self,
        mut record: RequestRecord,
        level: u32,
        target: Person,
        now: DateTime<Utc>,
    ) -> Result<Option<RequestRecord>, WorkflowError> {
        let request_id = record.request.id.clone();
        {
            let Some(step) = record.step_at_mut(level) else {
                return Err(WorkflowError::StepNotFound { id: request_id, level });
            };
            step.escalated = true;
            step.escalated_to = Some(target.staff_id.clone());
            step.escalation_date = Some(now);
        }
        record.request.updated_at = now;

        let Some(updated) = self
            .store
            .commit_step_transition(&record, level, StepGuard::PendingNotEscalated)
            .await?
        else {
            return Ok(None);
        };

        self.audit_warn(
            AuditRecord::new("request.escalated", "policy:escalation", request_id.clone())
                .with_detail("level", level.to_string())
                .with_detail("escalated_to", target.staff_id.0.clone()),
        );
        self.notify_warn(
            &target.staff_id,
            Notification::new(
                "Escalated leave request",
                format!(
                    "A leave request from {} has exceeded its approval SLA and needs attention.",
                    updated.request.staff_name
                ),
            )
            .with_link(format!("/leaves/{request_id}")),
        );

        Ok(Some(updated))
    }

    async fn apply_auto_approval(
        &self,
        mut record: RequestRecord,
        level: u32,
        now: DateTime<Utc>,
    ) -> Result<Option<RequestRecord>, WorkflowError> {
        let request_id = record.request.id.clone();
        let role = {
            let Some(step) = record.step_at_mut(level) else {
                return Err(WorkflowError::StepNotFound { id: request_id, level });
            };
            if apply_decision(
                step,
                Decision::Approve,
                Some("Auto-approved by escalation policy".to_string()),
                now,
            )
            .is_err()
            {
                return Ok(None);
            }
            step.approver_role
        };
        if role == ApproverRole::HrOfficer {
            record.request.hr_validated = Some(true);
        }
        activate_next_pending(&mut record.steps, now);
        record.request.updated_at = now;
        record.request.status = derived_status(&record.request, &record.steps);

        let Some(updated) =
            self.store.commit_step_transition(&record, level, StepGuard::Pending).await?
        else {
            return Ok(None);
        };

        self.audit_warn(
            AuditRecord::new("request.auto_approved", "policy:escalation", request_id)
                .with_detail("level", level.to_string())
                .with_detail("status", updated.request.status.as_str()),
        );
        self.fan_out_decision_notifications(&updated, Decision::Approve);

        Ok(Some(updated))
    }

    fn fan_out_decision_notifications(&self, updated: &RequestRecord, decision: Decision) {
        let request_id = &updated.request.id;
        if updated.request.status == RequestStatus::Pending {
            if awaiting_external_clearance(&updated.request, &updated.steps) {
                self.notify_warn(
                    &updated.request.staff_id.clone(),
                    Notification::new(
                        "Leave request update",
                        "All internal approvals are complete; awaiting external clearance.",
                    )
                    .with_link(format!("/leaves/{request_id}")),
                );
            } else if decision == Decision::Approve {
                if let Some(next) = next_pending_step(&updated.steps) {
                    self.notify_warn(
                        &next.approver_id.clone(),
                        Notification::new(
                            "Leave request awaiting your approval",
                            format!(
                                "{}'s {} leave request needs your decision.",
                                updated.request.staff_name, updated.request.leave_type
                            ),
                        )
                        .with_link(format!("/leaves/{request_id}")),
                    );
                }
            }
        } else {
            self.notify_warn(
                &updated.request.staff_id.clone(),
                Notification::new(
                    "Leave request update",
                    format!("Your leave request is {}.", updated.request.status.as_str()),
                )
                .with_link(format!("/leaves/{request_id}")),
            );
        }
    }

    fn audit_warn(&self, record: AuditRecord) {
        if let Err(error) = self.audit.record(record) {
            warn!(
                event_name = "audit.record_failed",
                error = %error,
                "audit record was not persisted"
            );
        }
    }

    fn notify_warn(&self, user: &StaffId, notification: Notification) {
        if let Err(error) = self.notifier.notify(user, notification) {
            warn!(
                event_name = "notify.delivery_failed",
                user = %user,
                error = %error,
                "notification was not delivered"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use chrono::{Duration, Utc};

    use super::{NewLeaveRequest, WorkflowEngine};
    use crate::audit::InMemoryAuditSink;
    use crate::compliance::StaticComplianceCheck;
    use crate::domain::request::{ClearanceStatus, LeaveType, RequestStatus};
    use crate::domain::staff::{OrgScope, Person, StaffId, StaffOrgProfile};
    use crate::domain::step::{ApproverRole, StepStatus};
    use crate::errors::WorkflowError;
    use crate::escalation::{EscalationPolicy, LevelSla};
    use crate::flows::{Decision, ForcedStatus};
    use crate::hierarchy::{OrgDirectory, UnitRouting};
    use crate::notify::InMemoryNotifier;
    use crate::routing::{RoutePlanner, WorkflowRules};
    use crate::store::{InMemoryRecordStore, RecordStore};

    type TestEngine = WorkflowEngine<
        InMemoryRecordStore,
        InMemoryNotifier,
        InMemoryAuditSink,
        StaticComplianceCheck,
    >;

    struct Fixture {
        engine: TestEngine,
        notifier: InMemoryNotifier,
        audit: InMemoryAuditSink,
    }

    fn directory() -> OrgDirectory {
        OrgDirectory::new(
            vec![
                UnitRouting {
                    unit: "registry".to_string(),
                    directorate: None,
                    reports_to_top: true,
                },
                UnitRouting {
                    unit: "field-ops".to_string(),
                    directorate: Some("operations".to_string()),
                    reports_to_top: false,
                },
            ],
            Some("people-services".to_string()),
            None,
        )
    }

    async fn seeded_store(with_final_authority: bool) -> InMemoryRecordStore {
        let store = InMemoryRecordStore::default();
        store
            .upsert_profile(StaffOrgProfile {
                staff_id: StaffId("u-staff".to_string()),
                display_name: "Asha Verma".to_string(),
                duty_station: Some("HQ".to_string()),
                directorate: None,
                division: None,
                unit: Some("registry".to_string()),
                grade: Some(4),
                manager_id: None,
                immediate_supervisor_id: Some(StaffId("u-sup".to_string())),
            })
            .await;
        store
            .upsert_profile(StaffOrgProfile {
                staff_id: StaffId("u-sup".to_string()),
                display_name: "Lena Osei".to_string(),
                duty_station: Some("HQ".to_string()),
                directorate: None,
                division: None,
                unit: Some("registry".to_string()),
                grade: Some(8),
                manager_id: None,
                immediate_supervisor_id: None,
            })
            .await;
        store
            .register_role_holder(
                ApproverRole::UnitHead,
                OrgScope::unit("registry"),
                Person {
                    staff_id: StaffId("u-head".to_string()),
                    display_name: "Noor Haddad".to_string(),
                },
            )
            .await;
        store
            .register_role_holder(
                ApproverRole::HrOfficer,
                OrgScope::organization_wide(),
                Person {
                    staff_id: StaffId("u-hr".to_string()),
                    display_name: "Rui Campos".to_string(),
                },
            )
            .await;
        if with_final_authority {
            store
                .register_role_holder(
                    ApproverRole::FinalAuthority,
                    OrgScope::organization_wide(),
                    Person {
                        staff_id: StaffId("u-fa".to_string()),
                        display_name: "Director General".to_string(),
                    },
                )
                .await;
        }
        store
    }

    fn make_engine(
        store: InMemoryRecordStore,
        policy: EscalationPolicy,
        compliance: StaticComplianceCheck,
    ) -> Fixture {
        let notifier = InMemoryNotifier::default();
        let audit = InMemoryAuditSink::default();
        let planner = RoutePlanner::new(directory(), WorkflowRules::default());
        let engine = WorkflowEngine::new(
            store,
            notifier.clone(),
            audit.clone(),
            compliance,
            planner,
            policy,
        );
        Fixture { engine, notifier, audit }
    }

    async fn fixture() -> Fixture {
        make_engine(
            seeded_store(true).await,
            EscalationPolicy::default(),
            StaticComplianceCheck::allowing(),
        )
    }

    fn annual_request(days: u32) -> NewLeaveRequest {
        let start = Utc::now().date_naive();
        NewLeaveRequest {
            staff_id: StaffId("u-staff".to_string()),
            leave_type: LeaveType::Annual,
            start_date: start,
            end_date: start + Duration::days(days as i64 - 1),
            day_count: days,
            reason: "family visit".to_string(),
            officer_taking_over: Some(StaffId("u-peer".to_string())),
            handover_notes: Some("handover file on shared drive".to_string()),
        }
    }

    fn staff() -> StaffId {
        StaffId("u-staff".to_string())
    }

    #[tokio::test]
    async fn submit_builds_contiguous_resolved_chain_and_notifies_first_approver() {
        let fixture = fixture().await;
        let receipt = fixture.engine.submit(annual_request(3)).await.expect("submit");

        assert_eq!(receipt.first_approver.staff_id.0, "u-sup");
        assert_eq!(receipt.first_approver.display_name, "Lena Osei");

        let report = fixture.engine.status(&receipt.request_id).await.expect("status");
        let levels: Vec<u32> = report.steps.iter().map(|s| s.level).collect();
        assert_eq!(levels, vec![1, 2, 3]);
        let roles: Vec<ApproverRole> = report.steps.iter().map(|s| s.approver_role).collect();
        assert_eq!(
            roles,
            vec![
                ApproverRole::ImmediateSupervisor,
                ApproverRole::UnitHead,
                ApproverRole::FinalAuthority,
            ]
        );
        assert_eq!(report.status, RequestStatus::Pending);

        let sent = fixture.notifier.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0 .0, "u-sup");

        let actions: Vec<String> =
            fixture.audit.records().into_iter().map(|r| r.action).collect();
        assert_eq!(actions, vec!["request.submitted".to_string()]);
    }

    #[tokio::test]
    async fn approving_every_level_in_order_approves_the_request() {
        let fixture = fixture().await;
        let receipt = fixture.engine.submit(annual_request(3)).await.expect("submit");
        let id = receipt.request_id;

        let first = fixture
            .engine
            .decide(&id, 1, Decision::Approve, &StaffId("u-sup".to_string()), None)
            .await
            .expect("level 1");
        assert_eq!(first.status, RequestStatus::Pending);

        let second = fixture
            .engine
            .decide(&id, 2, Decision::Approve, &StaffId("u-head".to_string()), None)
            .await
            .expect("level 2");
        assert_eq!(second.status, RequestStatus::Pending);

        let last = fixture
            .engine
            .decide(&id, 3, Decision::Approve, &StaffId("u-fa".to_string()), None)
            .await
            .expect("level 3");
        assert_eq!(last.status, RequestStatus::Approved);
        assert!(!last.awaiting_external_clearance);

        // Requester learns about the final resolution.
        let sent = fixture.notifier.sent();
        let to_requester: Vec<_> =
            sent.iter().filter(|(user, _)| user.0 == "u-staff").collect();
        assert!(!to_requester.is_empty());
        assert!(to_requester
            .iter()
            .any(|(_, notification)| notification.message.contains("approved")));
    }

    #[tokio::test]
    async fn rejection_rejects_immediately_and_abandons_later_steps() {
        let fixture = fixture().await;
        let receipt = fixture.engine.submit(annual_request(3)).await.expect("submit");
        let id = receipt.request_id;

        let outcome = fixture
            .engine
            .decide(
                &id,
                1,
                Decision::Reject,
                &StaffId("u-sup".to_string()),
                Some("clashes with audit week".to_string()),
            )
            .await
            .expect("reject level 1");
        assert_eq!(outcome.status, RequestStatus::Rejected);

        let report = fixture.engine.status(&id).await.expect("status");
        assert_eq!(report.status, RequestStatus::Rejected);
        // Abandoned, not auto-closed.
        assert_eq!(report.steps[1].status, StepStatus::Pending);
        assert_eq!(report.steps[2].status, StepStatus::Pending);

        let late = fixture
            .engine
            .decide(&id, 2, Decision::Approve, &StaffId("u-head".to_string()), None)
            .await
            .expect_err("decisions on a rejected request are refused");
        assert_eq!(late.code(), "invalid_transition");
    }

    #[tokio::test]
    async fn second_decision_on_the_same_step_gets_invalid_transition() {
        let fixture = fixture().await;
        let receipt = fixture.engine.submit(annual_request(3)).await.expect("submit");
        let id = receipt.request_id;

        fixture
            .engine
            .decide(&id, 1, Decision::Approve, &StaffId("u-sup".to_string()), None)
            .await
            .expect("first decision");
        let error = fixture
            .engine
            .decide(&id, 1, Decision::Reject, &StaffId("u-sup".to_string()), None)
            .await
            .expect_err("second decision on the same step");
        assert_eq!(error.code(), "invalid_transition");
    }

    #[tokio::test]
    async fn clearance_gated_request_waits_for_the_external_authority() {
        let fixture = fixture().await;
        let mut request = annual_request(3);
        request.leave_type = LeaveType::Unpaid;
        let receipt = fixture.engine.submit(request).await.expect("submit");
        let id = receipt.request_id;

        let report = fixture.engine.status(&id).await.expect("status");
        let roles: Vec<ApproverRole> = report.steps.iter().map(|s| s.approver_role).collect();
        assert_eq!(
            roles,
            vec![
                ApproverRole::ImmediateSupervisor,
                ApproverRole::UnitHead,
                ApproverRole::HrOfficer,
                ApproverRole::FinalAuthority,
            ]
        );

        let actors = ["u-sup", "u-head", "u-hr", "u-fa"];
        let mut last_status = RequestStatus::Pending;
        for (index, actor) in actors.iter().enumerate() {
            let outcome = fixture
                .engine
                .decide(
                    &id,
                    index as u32 + 1,
                    Decision::Approve,
                    &StaffId(actor.to_string()),
                    None,
                )
                .await
                .expect("approve");
            last_status = outcome.status;
        }
        // All internal steps approved, yet the request is not terminal.
        assert_eq!(last_status, RequestStatus::Pending);

        let report = fixture.engine.status(&id).await.expect("status");
        assert_eq!(report.status, RequestStatus::Pending);
        assert!(report.awaiting_external_clearance);
        assert_eq!(report.hr_validated, Some(true));

        let updated = fixture
            .engine
            .set_external_clearance(&id, ClearanceStatus::Cleared, Some("EXT/2026/88".to_string()))
            .await
            .expect("clearance");
        assert_eq!(updated.status, RequestStatus::Approved);
    }

    #[tokio::test]
    async fn clearance_rejection_rejects_despite_internal_approvals() {
        let fixture = fixture().await;
        let mut request = annual_request(3);
        request.leave_type = LeaveType::Unpaid;
        let receipt = fixture.engine.submit(request).await.expect("submit");
        let id = receipt.request_id;

        for (index, actor) in ["u-sup", "u-head", "u-hr", "u-fa"].iter().enumerate() {
            fixture
                .engine
                .decide(
                    &id,
                    index as u32 + 1,
                    Decision::Approve,
                    &StaffId(actor.to_string()),
                    None,
                )
                .await
                .expect("approve");
        }

        let updated = fixture
            .engine
            .set_external_clearance(&id, ClearanceStatus::Rejected, None)
            .await
            .expect("clearance");
        assert_eq!(updated.status, RequestStatus::Rejected);
    }

    #[tokio::test]
    async fn ineligible_staff_cannot_submit() {
        let fixture = make_engine(
            seeded_store(true).await,
            EscalationPolicy::default(),
            StaticComplianceCheck::blocking(vec!["annual balance exhausted".to_string()]),
        );

        let error =
            fixture.engine.submit(annual_request(3)).await.expect_err("blocked by compliance");
        assert_eq!(error.code(), "not_eligible");
        assert!(fixture.notifier.sent().is_empty());
    }

    #[tokio::test]
    async fn unresolvable_role_makes_submission_fail() {
        let fixture = make_engine(
            seeded_store(false).await,
            EscalationPolicy::default(),
            StaticComplianceCheck::allowing(),
        );

        let error = fixture.engine.submit(annual_request(3)).await.expect_err("no final authority");
        assert_eq!(
            error,
            WorkflowError::ApproverNotFound { role: ApproverRole::FinalAuthority }
        );
    }

    #[tokio::test]
    async fn resubmission_links_back_and_increments_count() {
        let fixture = fixture().await;
        let receipt = fixture.engine.submit(annual_request(3)).await.expect("submit");
        let id = receipt.request_id;
        fixture
            .engine
            .decide(&id, 1, Decision::Reject, &StaffId("u-sup".to_string()), None)
            .await
            .expect("reject");

        let new_id = fixture.engine.resubmit(&id, &staff()).await.expect("resubmit");
        assert_ne!(new_id, id);

        let record = fixture
            .engine
            .store()
            .load_request(&new_id)
            .await
            .expect("load")
            .expect("new request exists");
        assert_eq!(record.request.resubmitted_from, Some(id));
        assert_eq!(record.request.resubmission_count, 1);
        assert_eq!(record.request.status, RequestStatus::Pending);
        assert_eq!(record.steps.len(), 3);
    }

    #[tokio::test]
    async fn resubmission_cap_is_enforced() {
        let fixture = fixture().await;
        let receipt = fixture.engine.submit(annual_request(3)).await.expect("submit");
        let id = receipt.request_id;
        fixture
            .engine
            .decide(&id, 1, Decision::Reject, &StaffId("u-sup".to_string()), None)
            .await
            .expect("reject");

        let mut record = fixture
            .engine
            .store()
            .load_request(&id)
            .await
            .expect("load")
            .expect("exists");
        record.request.resubmission_count = 3;
        fixture.engine.store().save_request(&record).await.expect("save");

        let error = fixture.engine.resubmit(&id, &staff()).await.expect_err("cap reached");
        assert_eq!(error, WorkflowError::ResubmissionLimitExceeded { count: 3 });
    }

    #[tokio::test]
    async fn only_the_requester_can_resubmit() {
        let fixture = fixture().await;
        let receipt = fixture.engine.submit(annual_request(3)).await.expect("submit");
        let id = receipt.request_id;
        fixture
            .engine
            .decide(&id, 1, Decision::Reject, &StaffId("u-sup".to_string()), None)
            .await
            .expect("reject");

        let error = fixture
            .engine
            .resubmit(&id, &StaffId("u-other".to_string()))
            .await
            .expect_err("not the owner");
        assert_eq!(error.code(), "not_request_owner");
    }

    #[tokio::test]
    async fn sweep_escalates_overdue_step_exactly_once() {
        let fixture = fixture().await;
        let receipt = fixture.engine.submit(annual_request(3)).await.expect("submit");
        let id = receipt.request_id;

        let later = Utc::now() + Duration::hours(100);
        let outcome = fixture.engine.sweep(later).await.expect("sweep");
        assert_eq!(outcome.escalated, vec![(id.clone(), 1)]);
        assert!(outcome.auto_approved.is_empty());

        let report = fixture.engine.status(&id).await.expect("status");
        assert!(report.steps[0].escalated);
        // Escalation does not advance the step.
        assert_eq!(report.steps[0].status, StepStatus::Pending);
        assert_eq!(report.status, RequestStatus::Pending);

        let record = fixture
            .engine
            .store()
            .load_request(&id)
            .await
            .expect("load")
            .expect("exists");
        assert_eq!(
            record.steps[0].escalated_to,
            Some(StaffId("u-fa".to_string())),
            "default escalation target is the final authority"
        );

        // A later run does not re-escalate.
        let again = fixture.engine.sweep(later + Duration::hours(1)).await.expect("sweep again");
        assert!(again.escalated.is_empty());
    }

    #[tokio::test]
    async fn sweep_auto_approves_when_the_level_policy_allows() {
        let mut overrides = HashMap::new();
        overrides.insert(
            ApproverRole::ImmediateSupervisor,
            LevelSla { threshold_hours: 24, auto_approve: true, escalate_to: None },
        );
        let fixture = make_engine(
            seeded_store(true).await,
            EscalationPolicy::new(LevelSla::default(), overrides),
            StaticComplianceCheck::allowing(),
        );
        let receipt = fixture.engine.submit(annual_request(3)).await.expect("submit");
        let id = receipt.request_id;

        let later = Utc::now() + Duration::hours(30);
        let outcome = fixture.engine.sweep(later).await.expect("sweep");
        assert_eq!(outcome.auto_approved, vec![(id.clone(), 1)]);

        let record = fixture
            .engine
            .store()
            .load_request(&id)
            .await
            .expect("load")
            .expect("exists");
        assert_eq!(record.steps[0].status, StepStatus::Approved);
        assert_eq!(
            record.steps[0].comments.as_deref(),
            Some("Auto-approved by escalation policy")
        );
        // The next level's clock starts at the sweep, so it is not overdue.
        let again = fixture.engine.sweep(later).await.expect("sweep again");
        assert!(again.auto_approved.is_empty());
        assert!(again.escalated.is_empty());
    }

    #[tokio::test]
    async fn explicit_escalation_target_wins_over_policy() {
        let fixture = fixture().await;
        let receipt = fixture.engine.submit(annual_request(3)).await.expect("submit");
        let id = receipt.request_id;

        let step = fixture
            .engine
            .escalate(&id, 1, Some(StaffId("u-head".to_string())))
            .await
            .expect("escalate");
        assert!(step.escalated);
        assert_eq!(step.escalated_to, Some(StaffId("u-head".to_string())));
        assert_eq!(step.status, StepStatus::Pending);

        let error = fixture
            .engine
            .escalate(&id, 1, None)
            .await
            .expect_err("already escalated");
        assert_eq!(error.code(), "invalid_transition");
    }

    #[tokio::test]
    async fn override_reverse_cancels_the_request() {
        let fixture = fixture().await;
        let receipt = fixture.engine.submit(annual_request(3)).await.expect("submit");
        let id = receipt.request_id;

        let updated = fixture
            .engine
            .override_step(
                &id,
                1,
                ForcedStatus::Reversed,
                &StaffId("u-admin".to_string()),
                "submitted in error".to_string(),
            )
            .await
            .expect("override");
        assert_eq!(updated.status, RequestStatus::Cancelled);

        let report = fixture.engine.status(&id).await.expect("status");
        assert_eq!(report.status, RequestStatus::Cancelled);

        let actions: Vec<String> =
            fixture.audit.records().into_iter().map(|r| r.action).collect();
        assert!(actions.contains(&"request.overridden".to_string()));
    }

    #[tokio::test]
    async fn override_can_force_a_decided_step() {
        let fixture = fixture().await;
        let receipt = fixture.engine.submit(annual_request(3)).await.expect("submit");
        let id = receipt.request_id;
        fixture
            .engine
            .decide(&id, 1, Decision::Reject, &StaffId("u-sup".to_string()), None)
            .await
            .expect("reject");

        let updated = fixture
            .engine
            .override_step(
                &id,
                1,
                ForcedStatus::Approved,
                &StaffId("u-admin".to_string()),
                "rejection was a mistake".to_string(),
            )
            .await
            .expect("forced approval bypasses the decided-step guard");
        assert_eq!(updated.status, RequestStatus::Pending);

        let report = fixture.engine.status(&id).await.expect("status");
        assert_eq!(report.steps[0].status, StepStatus::Approved);
    }

    #[tokio::test]
    async fn invalid_window_is_rejected_before_any_side_effects() {
        let fixture = fixture().await;
        let mut request = annual_request(3);
        request.end_date = request.start_date - Duration::days(1);

        let error = fixture.engine.submit(request).await.expect_err("invalid window");
        assert_eq!(error.code(), "invariant_violation");
        assert!(fixture.notifier.sent().is_empty());
        assert!(fixture.audit.records().is_empty());
    }
}
