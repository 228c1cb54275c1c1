use std::collections::HashMap;

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::RwLock;

use crate::domain::acting::ActingAppointment;
use crate::domain::delegation::{ApprovalDelegation, DelegationStatus};
use crate::domain::request::{
    ClearanceStatus, LeaveRequest, LeaveRequestId, LeaveType, RequestStatus,
};
use crate::domain::staff::{OrgScope, Person, StaffId, StaffOrgProfile};
use crate::domain::step::{levels_are_contiguous, ApprovalStep, ApproverRole};
use crate::flows::derived_status;

/// Record-store failures are transient from the engine's perspective: the
/// operation aborts and the caller retries with the same idempotency key.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("storage backend error: {0}")]
    Backend(String),
    #[error("stored record could not be decoded: {0}")]
    Decode(String),
    #[error("storage constraint violated: {0}")]
    Constraint(String),
}

/// A leave request together with its approval chain. The pair is loaded and
/// written atomically.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestRecord {
    pub request: LeaveRequest,
    pub steps: Vec<ApprovalStep>,
}

impl RequestRecord {
    pub fn step_at(&self, level: u32) -> Option<&ApprovalStep> {
        self.steps.iter().find(|step| step.level == level)
    }

    pub fn step_at_mut(&mut self, level: u32) -> Option<&mut ApprovalStep> {
        self.steps.iter_mut().find(|step| step.level == level)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RequestFilter {
    pub staff_id: Option<StaffId>,
    pub status: Option<RequestStatus>,
    pub leave_type: Option<LeaveType>,
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
}

impl RequestFilter {
    pub fn pending() -> Self {
        Self { status: Some(RequestStatus::Pending), ..Self::default() }
    }

    pub fn matches(&self, request: &LeaveRequest) -> bool {
        if let Some(staff_id) = &self.staff_id {
            if request.staff_id != *staff_id {
                return false;
            }
        }
        if let Some(status) = self.status {
            if request.status != status {
                return false;
            }
        }
        if let Some(leave_type) = self.leave_type {
            if request.leave_type != leave_type {
                return false;
            }
        }
        if let Some(from) = self.from {
            if request.start_date < from {
                return false;
            }
        }
        if let Some(to) = self.to {
            if request.start_date > to {
                return false;
            }
        }
        true
    }
}

/// Precondition checked inside the same atomic write as the mutation itself.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StepGuard {
    /// The stored step must still be pending (and the request undecided).
    Pending,
    /// As `Pending`, and the stored step must not already be escalated.
    PendingNotEscalated,
    /// No precondition; the record is written wholesale. Administrative
    /// overrides only, audited separately.
    Unguarded,
}

/// Abstract record store the engine operates against.
///
/// `save_request` is atomic across the request and its steps. The guarded
/// commit merges the mutated step into current stored state and recomputes
/// the derived request status inside the same atomic section, so concurrent
/// actions on different steps of one request interleave without lost
/// updates, while two actions on the same step serialize to one winner.
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn load_request(
        &self,
        id: &LeaveRequestId,
    ) -> Result<Option<RequestRecord>, StoreError>;

    async fn list_requests(&self, filter: &RequestFilter)
        -> Result<Vec<RequestRecord>, StoreError>;

    async fn save_request(&self, record: &RequestRecord) -> Result<(), StoreError>;

    /// Applies the step at `guarded_level` (plus activation stamps and
    /// request-level decision metadata) only when the stored step still
    /// satisfies `guard`. Returns the updated record, or `None` without
    /// writing when the precondition no longer holds.
    async fn commit_step_transition(
        &self,
        record: &RequestRecord,
        guarded_level: u32,
        guard: StepGuard,
    ) -> Result<Option<RequestRecord>, StoreError>;

    /// Sets the external clearance field and recomputes the derived status
    /// from the stored step states, atomically. Returns `None` for an
    /// unknown request.
    async fn commit_clearance(
        &self,
        id: &LeaveRequestId,
        status: ClearanceStatus,
    ) -> Result<Option<RequestRecord>, StoreError>;

    async fn load_org_profile(
        &self,
        staff_id: &StaffId,
    ) -> Result<Option<StaffOrgProfile>, StoreError>;

    /// Nominal holder of `role` within `scope`, if one is on record.
    async fn load_role_holder(
        &self,
        role: ApproverRole,
        scope: &OrgScope,
    ) -> Result<Option<Person>, StoreError>;

    /// Delegations where `delegator` has transferred authority, active on
    /// `on` (status active and date window containing `on`).
    async fn load_active_delegations(
        &self,
        delegator: &StaffId,
        on: NaiveDate,
    ) -> Result<Vec<ApprovalDelegation>, StoreError>;

    /// Acting appointments filling `role`, in effect on `on`.
    async fn load_active_acting_appointments(
        &self,
        role: ApproverRole,
        on: NaiveDate,
    ) -> Result<Vec<ActingAppointment>, StoreError>;
}

pub fn validate_record(record: &RequestRecord) -> Result<(), StoreError> {
    if !levels_are_contiguous(&record.steps) {
        return Err(StoreError::Constraint(format!(
            "approval steps for `{}` are not contiguous from level 1",
            record.request.id
        )));
    }
    if let Some(step) = record.steps.iter().find(|step| step.request_id != record.request.id) {
        return Err(StoreError::Constraint(format!(
            "step at level {} belongs to `{}`, not `{}`",
            step.level, step.request_id, record.request.id
        )));
    }
    Ok(())
}

/// Shared merge semantics for guarded commits, used by every store
/// implementation: the guarded step is replaced, activation stamps are
/// carried over, request-level decision metadata (`hr_validated`,
/// `updated_at`) is taken from the incoming record, and the status is
/// re-derived from the merged step set.
pub fn merge_step_transition(
    stored: &RequestRecord,
    incoming: &RequestRecord,
    guarded_level: u32,
    guard: StepGuard,
) -> Option<RequestRecord> {
    let stored_step = stored.step_at(guarded_level)?;
    let precondition_holds = match guard {
        StepGuard::Pending => stored_step.is_pending() && stored.request.status == RequestStatus::Pending,
        StepGuard::PendingNotEscalated => {
            stored_step.is_pending()
                && !stored_step.escalated
                && stored.request.status == RequestStatus::Pending
        }
        StepGuard::Unguarded => return Some(incoming.clone()),
    };
    if !precondition_holds {
        return None;
    }

    let mut merged = stored.clone();
    let incoming_step = incoming.step_at(guarded_level)?;
    *merged.step_at_mut(guarded_level)? = incoming_step.clone();
    for step in merged.steps.iter_mut() {
        if step.activated_at.is_none() {
            if let Some(activated) = incoming.step_at(step.level).and_then(|s| s.activated_at) {
                step.activated_at = Some(activated);
            }
        }
    }
    merged.request.hr_validated = incoming.request.hr_validated;
    merged.request.updated_at = incoming.request.updated_at;
    merged.request.status = derived_status(&merged.request, &merged.steps);
    Some(merged)
}

/// In-memory record store for tests, fixtures, and local tooling.
#[derive(Default)]
pub struct InMemoryRecordStore {
    requests: RwLock<HashMap<String, RequestRecord>>,
    profiles: RwLock<HashMap<String, StaffOrgProfile>>,
    role_holders: RwLock<Vec<RoleHolderEntry>>,
    delegations: RwLock<Vec<ApprovalDelegation>>,
    appointments: RwLock<Vec<ActingAppointment>>,
}

#[derive(Clone, Debug)]
struct RoleHolderEntry {
    role: ApproverRole,
    scope: OrgScope,
    person: Person,
}

impl InMemoryRecordStore {
    pub async fn upsert_profile(&self, profile: StaffOrgProfile) {
        let mut profiles = self.profiles.write().await;
        profiles.insert(profile.staff_id.0.clone(), profile);
    }

    pub async fn register_role_holder(&self, role: ApproverRole, scope: OrgScope, person: Person) {
        let mut holders = self.role_holders.write().await;
        holders.retain(|entry| !(entry.role == role && entry.scope == scope));
        holders.push(RoleHolderEntry { role, scope, person });
    }

    /// Rejects a second active delegation whose window overlaps an existing
    /// one for the same delegator.
    pub async fn save_delegation(
        &self,
        delegation: ApprovalDelegation,
    ) -> Result<(), StoreError> {
        let mut delegations = self.delegations.write().await;
        if let Some(existing) = delegations
            .iter()
            .filter(|existing| existing.id != delegation.id)
            .find(|existing| existing.conflicts_with(&delegation))
        {
            return Err(StoreError::Constraint(format!(
                "delegator `{}` already has an active delegation `{}` overlapping {}..={}",
                delegation.delegator, existing.id.0, delegation.start_date, delegation.end_date
            )));
        }
        delegations.retain(|existing| existing.id != delegation.id);
        delegations.push(delegation);
        Ok(())
    }

    pub async fn save_acting_appointment(&self, appointment: ActingAppointment) {
        let mut appointments = self.appointments.write().await;
        appointments.retain(|existing| existing.id != appointment.id);
        appointments.push(appointment);
    }
}

#[async_trait]
impl RecordStore for InMemoryRecordStore {
    async fn load_request(
        &self,
        id: &LeaveRequestId,
    ) -> Result<Option<RequestRecord>, StoreError> {
        let requests = self.requests.read().await;
        Ok(requests.get(&id.0).cloned())
    }

    async fn list_requests(
        &self,
        filter: &RequestFilter,
    ) -> Result<Vec<RequestRecord>, StoreError> {
        let requests = self.requests.read().await;
        let mut matching: Vec<RequestRecord> =
            requests.values().filter(|record| filter.matches(&record.request)).cloned().collect();
        matching.sort_by(|left, right| left.request.created_at.cmp(&right.request.created_at));
        Ok(matching)
    }

    async fn save_request(&self, record: &RequestRecord) -> Result<(), StoreError> {
        validate_record(record)?;
        let mut requests = self.requests.write().await;
        requests.insert(record.request.id.0.clone(), record.clone());
        Ok(())
    }

    async fn commit_step_transition(
        &self,
        record: &RequestRecord,
        guarded_level: u32,
        guard: StepGuard,
    ) -> Result<Option<RequestRecord>, StoreError> {
        validate_record(record)?;
        let mut requests = self.requests.write().await;
        let stored = requests.get(&record.request.id.0).ok_or_else(|| {
            StoreError::Constraint(format!("unknown leave request `{}`", record.request.id))
        })?;
        if stored.step_at(guarded_level).is_none() {
            return Err(StoreError::Constraint(format!(
                "leave request `{}` has no step at level {guarded_level}",
                record.request.id
            )));
        }

        match merge_step_transition(stored, record, guarded_level, guard) {
            Some(merged) => {
                requests.insert(merged.request.id.0.clone(), merged.clone());
                Ok(Some(merged))
            }
            None => Ok(None),
        }
    }

    async fn commit_clearance(
        &self,
        id: &LeaveRequestId,
        status: ClearanceStatus,
    ) -> Result<Option<RequestRecord>, StoreError> {
        let mut requests = self.requests.write().await;
        let Some(stored) = requests.get(&id.0) else {
            return Ok(None);
        };
        let mut updated = stored.clone();
        updated.request.external_clearance_status = Some(status);
        updated.request.status = derived_status(&updated.request, &updated.steps);
        updated.request.updated_at = chrono::Utc::now();
        requests.insert(id.0.clone(), updated.clone());
        Ok(Some(updated))
    }

    async fn load_org_profile(
        &self,
        staff_id: &StaffId,
    ) -> Result<Option<StaffOrgProfile>, StoreError> {
        let profiles = self.profiles.read().await;
        Ok(profiles.get(&staff_id.0).cloned())
    }

    async fn load_role_holder(
        &self,
        role: ApproverRole,
        scope: &OrgScope,
    ) -> Result<Option<Person>, StoreError> {
        let holders = self.role_holders.read().await;
        Ok(holders
            .iter()
            .find(|entry| entry.role == role && entry.scope == *scope)
            .map(|entry| entry.person.clone()))
    }

    async fn load_active_delegations(
        &self,
        delegator: &StaffId,
        on: NaiveDate,
    ) -> Result<Vec<ApprovalDelegation>, StoreError> {
        let delegations = self.delegations.read().await;
        Ok(delegations
            .iter()
            .filter(|delegation| delegation.delegator == *delegator)
            .filter(|delegation| {
                delegation.status == DelegationStatus::Active
                    && delegation.start_date <= on
                    && on <= delegation.end_date
            })
            .cloned()
            .collect())
    }

    async fn load_active_acting_appointments(
        &self,
        role: ApproverRole,
        on: NaiveDate,
    ) -> Result<Vec<ActingAppointment>, StoreError> {
        let appointments = self.appointments.read().await;
        Ok(appointments
            .iter()
            .filter(|appointment| appointment.role == role && appointment.in_effect(on))
            .cloned()
            .collect())
    }
}
