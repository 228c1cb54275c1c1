use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::domain::request::LeaveType;
use crate::domain::staff::{OrgScope, Person, StaffId, StaffOrgProfile};
use crate::domain::step::ApproverRole;
use crate::errors::WorkflowError;
use crate::hierarchy::OrgDirectory;
use crate::store::{RecordStore, StoreError};

/// How a concrete approver was arrived at; recorded in the audit trail.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResolutionPath {
    Nominal,
    Acting { authority_source: String },
    Delegated { delegator: StaffId },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedApprover {
    pub person: Person,
    pub path: ResolutionPath,
}

pub struct ResolutionContext<'a> {
    pub requester: &'a StaffOrgProfile,
    pub directory: &'a OrgDirectory,
    pub leave_type: LeaveType,
    pub today: NaiveDate,
}

/// Resolves an abstract role to a concrete person.
///
/// Resolution order: an active acting appointment for the role wins over the
/// nominal holder; an active, scope-matching delegation is applied last and
/// therefore overrides both. Failure is fatal to submission, never retried.
pub async fn resolve_approver<S>(
    store: &S,
    role: ApproverRole,
    ctx: &ResolutionContext<'_>,
) -> Result<ResolvedApprover, WorkflowError>
where
    S: RecordStore + ?Sized,
{
    let (person, path) = match acting_appointee(store, role, ctx).await? {
        Some(resolved) => resolved,
        None => match nominal_holder(store, role, ctx).await? {
            Some(person) => (person, ResolutionPath::Nominal),
            None => return Err(WorkflowError::ApproverNotFound { role }),
        },
    };

    let mut delegations = store.load_active_delegations(&person.staff_id, ctx.today).await?;
    delegations.retain(|delegation| delegation.covers(ctx.leave_type, ctx.today));
    delegations.sort_by_key(|delegation| delegation.start_date);
    if let Some(delegation) = delegations.first() {
        let delegatee = person_named(store, &delegation.delegatee).await?;
        return Ok(ResolvedApprover {
            person: delegatee,
            path: ResolutionPath::Delegated { delegator: person.staff_id },
        });
    }

    Ok(ResolvedApprover { person, path })
}

async fn acting_appointee<S>(
    store: &S,
    role: ApproverRole,
    ctx: &ResolutionContext<'_>,
) -> Result<Option<(Person, ResolutionPath)>, WorkflowError>
where
    S: RecordStore + ?Sized,
{
    let mut appointments = store.load_active_acting_appointments(role, ctx.today).await?;
    appointments.sort_by_key(|appointment| appointment.effective_date);
    let Some(appointment) = appointments.into_iter().next() else {
        return Ok(None);
    };
    let person = person_named(store, &appointment.staff_id).await?;
    Ok(Some((
        person,
        ResolutionPath::Acting { authority_source: appointment.authority_source },
    )))
}

async fn nominal_holder<S>(
    store: &S,
    role: ApproverRole,
    ctx: &ResolutionContext<'_>,
) -> Result<Option<Person>, WorkflowError>
where
    S: RecordStore + ?Sized,
{
    match role {
        ApproverRole::ImmediateSupervisor => {
            let Some(supervisor_id) = ctx.directory.supervisor_of(ctx.requester) else {
                return Ok(None);
            };
            Ok(Some(person_named(store, supervisor_id).await?))
        }
        ApproverRole::UnitHead | ApproverRole::Auditor => {
            let Some(unit) = ctx.requester.unit.as_deref() else {
                return Ok(None);
            };
            Ok(store.load_role_holder(role, &OrgScope::unit(unit)).await?)
        }
        ApproverRole::Director => {
            let directorate = ctx.requester.directorate.clone().or_else(|| {
                ctx.requester
                    .unit
                    .as_deref()
                    .and_then(|unit| ctx.directory.directorate_of(unit))
                    .map(str::to_string)
            });
            let Some(directorate) = directorate else {
                return Ok(None);
            };
            Ok(store.load_role_holder(role, &OrgScope::directorate(directorate)).await?)
        }
        ApproverRole::HrDirector | ApproverRole::HrOfficer | ApproverRole::FinalAuthority => {
            Ok(store.load_role_holder(role, &OrgScope::organization_wide()).await?)
        }
    }
}

/// Display name from the staff directory; a missing profile falls back to
/// the raw id rather than failing a resolution that already has a person.
pub(crate) async fn person_named<S>(store: &S, staff_id: &StaffId) -> Result<Person, StoreError>
where
    S: RecordStore + ?Sized,
{
    match store.load_org_profile(staff_id).await? {
        Some(profile) => Ok(profile.person()),
        None => {
            warn!(
                event_name = "resolve.profile_missing",
                staff_id = %staff_id,
                "no org profile for resolved approver; using id as display name"
            );
            Ok(Person { staff_id: staff_id.clone(), display_name: staff_id.0.clone() })
        }
    }
}
