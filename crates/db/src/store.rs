use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::{QueryBuilder, Row, Sqlite, Transaction};

use leavewell_core::domain::acting::{ActingAppointment, ActingAppointmentId};
use leavewell_core::domain::delegation::{ApprovalDelegation, DelegationId, DelegationStatus};
use leavewell_core::domain::request::{
    ClearanceStatus, LeaveRequest, LeaveRequestId, LeaveType, RequestStatus,
};
use leavewell_core::domain::staff::{OrgScope, Person, StaffId, StaffOrgProfile};
use leavewell_core::domain::step::{ApprovalStep, ApproverRole, StepStatus};
use leavewell_core::flows::derived_status;
use leavewell_core::store::{
    merge_step_transition, validate_record, RecordStore, RequestFilter, RequestRecord, StepGuard,
    StoreError,
};

use crate::DbPool;

/// SQLite-backed record store. Request+steps writes run in one transaction;
/// guarded commits re-read current state inside the transaction so the
/// compare-and-set precondition and the derived-status recompute are atomic.
pub struct SqlRecordStore {
    pool: DbPool,
}

impl SqlRecordStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn upsert_profile(&self, profile: &StaffOrgProfile) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO staff_profile (staff_id, display_name, duty_station, directorate,
                                        division, unit, grade, manager_id, immediate_supervisor_id)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(staff_id) DO UPDATE SET
                 display_name = excluded.display_name,
                 duty_station = excluded.duty_station,
                 directorate = excluded.directorate,
                 division = excluded.division,
                 unit = excluded.unit,
                 grade = excluded.grade,
                 manager_id = excluded.manager_id,
                 immediate_supervisor_id = excluded.immediate_supervisor_id",
        )
        .bind(&profile.staff_id.0)
        .bind(&profile.display_name)
        .bind(&profile.duty_station)
        .bind(&profile.directorate)
        .bind(&profile.division)
        .bind(&profile.unit)
        .bind(profile.grade.map(i64::from))
        .bind(profile.manager_id.as_ref().map(|id| id.0.clone()))
        .bind(profile.immediate_supervisor_id.as_ref().map(|id| id.0.clone()))
        .execute(&self.pool)
        .await
        .map_err(backend)?;
        Ok(())
    }

    pub async fn register_role_holder(
        &self,
        role: ApproverRole,
        scope: &OrgScope,
        person: &Person,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO role_holder (role, scope_unit, scope_directorate, staff_id, display_name)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(role, scope_unit, scope_directorate) DO UPDATE SET
                 staff_id = excluded.staff_id,
                 display_name = excluded.display_name",
        )
        .bind(role.as_str())
        .bind(scope_key(scope.unit.as_deref()))
        .bind(scope_key(scope.directorate.as_deref()))
        .bind(&person.staff_id.0)
        .bind(&person.display_name)
        .execute(&self.pool)
        .await
        .map_err(backend)?;
        Ok(())
    }

    /// Rejects a second active delegation whose window overlaps an existing
    /// one for the same delegator.
    pub async fn save_delegation(
        &self,
        delegation: &ApprovalDelegation,
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await.map_err(backend)?;

        if delegation.status == DelegationStatus::Active {
            let overlapping = sqlx::query(
                "SELECT id FROM approval_delegation
                 WHERE delegator = ? AND status = 'active' AND id != ?
                   AND start_date <= ? AND ? <= end_date",
            )
            .bind(&delegation.delegator.0)
            .bind(&delegation.id.0)
            .bind(delegation.end_date.to_string())
            .bind(delegation.start_date.to_string())
            .fetch_optional(&mut *tx)
            .await
            .map_err(backend)?;

            if let Some(row) = overlapping {
                let existing: String = row.try_get("id").map_err(decode)?;
                return Err(StoreError::Constraint(format!(
                    "delegator `{}` already has an active delegation `{existing}` overlapping {}..={}",
                    delegation.delegator, delegation.start_date, delegation.end_date
                )));
            }
        }

        sqlx::query(
            "INSERT INTO approval_delegation (id, delegator, delegatee, start_date, end_date,
                                              leave_types, status)
             VALUES (?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                 delegator = excluded.delegator,
                 delegatee = excluded.delegatee,
                 start_date = excluded.start_date,
                 end_date = excluded.end_date,
                 leave_types = excluded.leave_types,
                 status = excluded.status",
        )
        .bind(&delegation.id.0)
        .bind(&delegation.delegator.0)
        .bind(&delegation.delegatee.0)
        .bind(delegation.start_date.to_string())
        .bind(delegation.end_date.to_string())
        .bind(
            serde_json::to_string(&delegation.leave_types)
                .map_err(|error| StoreError::Decode(error.to_string()))?,
        )
        .bind(delegation.status.as_str())
        .execute(&mut *tx)
        .await
        .map_err(backend)?;

        tx.commit().await.map_err(backend)?;
        Ok(())
    }

    pub async fn save_acting_appointment(
        &self,
        appointment: &ActingAppointment,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO acting_appointment (id, role, staff_id, effective_date, end_date,
                                             authority_source)
             VALUES (?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                 role = excluded.role,
                 staff_id = excluded.staff_id,
                 effective_date = excluded.effective_date,
                 end_date = excluded.end_date,
                 authority_source = excluded.authority_source",
        )
        .bind(&appointment.id.0)
        .bind(appointment.role.as_str())
        .bind(&appointment.staff_id.0)
        .bind(appointment.effective_date.to_string())
        .bind(appointment.end_date.to_string())
        .bind(&appointment.authority_source)
        .execute(&self.pool)
        .await
        .map_err(backend)?;
        Ok(())
    }
}

#[async_trait]
impl RecordStore for SqlRecordStore {
    async fn load_request(
        &self,
        id: &LeaveRequestId,
    ) -> Result<Option<RequestRecord>, StoreError> {
        let mut tx = self.pool.begin().await.map_err(backend)?;
        let record = load_record_tx(&mut tx, id).await?;
        tx.commit().await.map_err(backend)?;
        Ok(record)
    }

    async fn list_requests(
        &self,
        filter: &RequestFilter,
    ) -> Result<Vec<RequestRecord>, StoreError> {
        let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(
            "SELECT id, staff_id, staff_name, leave_type, start_date, end_date, day_count,
                    reason, officer_taking_over, handover_notes, status, resubmitted_from,
                    resubmission_count, requires_external_clearance, external_clearance_status,
                    hr_validated, created_at, updated_at
             FROM leave_request WHERE 1 = 1",
        );
        if let Some(staff_id) = &filter.staff_id {
            builder.push(" AND staff_id = ").push_bind(staff_id.0.clone());
        }
        if let Some(status) = filter.status {
            builder.push(" AND status = ").push_bind(status.as_str());
        }
        if let Some(leave_type) = filter.leave_type {
            builder.push(" AND leave_type = ").push_bind(leave_type.as_str());
        }
        if let Some(from) = filter.from {
            builder.push(" AND start_date >= ").push_bind(from.to_string());
        }
        if let Some(to) = filter.to {
            builder.push(" AND start_date <= ").push_bind(to.to_string());
        }
        builder.push(" ORDER BY created_at ASC");

        let rows = builder.build().fetch_all(&self.pool).await.map_err(backend)?;
        let mut records = Vec::with_capacity(rows.len());
        for row in &rows {
            let request = row_to_request(row)?;
            let steps = load_steps(&self.pool, &request.id).await?;
            records.push(RequestRecord { request, steps });
        }
        Ok(records)
    }

    async fn save_request(&self, record: &RequestRecord) -> Result<(), StoreError> {
        validate_record(record)?;
        let mut tx = self.pool.begin().await.map_err(backend)?;
        write_record_tx(&mut tx, record).await?;
        tx.commit().await.map_err(backend)?;
        Ok(())
    }

    async fn commit_step_transition(
        &self,
        record: &RequestRecord,
        guarded_level: u32,
        guard: StepGuard,
    ) -> Result<Option<RequestRecord>, StoreError> {
        validate_record(record)?;
        let mut tx = self.pool.begin().await.map_err(backend)?;
        let stored = load_record_tx(&mut tx, &record.request.id).await?.ok_or_else(|| {
            StoreError::Constraint(format!("unknown leave request `{}`", record.request.id))
        })?;
        if stored.step_at(guarded_level).is_none() {
            return Err(StoreError::Constraint(format!(
                "leave request `{}` has no step at level {guarded_level}",
                record.request.id
            )));
        }

        match merge_step_transition(&stored, record, guarded_level, guard) {
            Some(merged) => {
                write_record_tx(&mut tx, &merged).await?;
                tx.commit().await.map_err(backend)?;
                Ok(Some(merged))
            }
            None => {
                tx.rollback().await.map_err(backend)?;
                Ok(None)
            }
        }
    }

    async fn commit_clearance(
        &self,
        id: &LeaveRequestId,
        status: ClearanceStatus,
    ) -> Result<Option<RequestRecord>, StoreError> {
        let mut tx = self.pool.begin().await.map_err(backend)?;
        let Some(mut stored) = load_record_tx(&mut tx, id).await? else {
            tx.rollback().await.map_err(backend)?;
            return Ok(None);
        };

        stored.request.external_clearance_status = Some(status);
        stored.request.status = derived_status(&stored.request, &stored.steps);
        stored.request.updated_at = Utc::now();

        sqlx::query(
            "UPDATE leave_request
             SET external_clearance_status = ?, status = ?, updated_at = ?
             WHERE id = ?",
        )
        .bind(status.as_str())
        .bind(stored.request.status.as_str())
        .bind(stored.request.updated_at.to_rfc3339())
        .bind(&id.0)
        .execute(&mut *tx)
        .await
        .map_err(backend)?;

        tx.commit().await.map_err(backend)?;
        Ok(Some(stored))
    }

    async fn load_org_profile(
        &self,
        staff_id: &StaffId,
    ) -> Result<Option<StaffOrgProfile>, StoreError> {
        let row = sqlx::query(
            "SELECT staff_id, display_name, duty_station, directorate, division, unit, grade,
                    manager_id, immediate_supervisor_id
             FROM staff_profile WHERE staff_id = ?",
        )
        .bind(&staff_id.0)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;

        row.as_ref().map(row_to_profile).transpose()
    }

    async fn load_role_holder(
        &self,
        role: ApproverRole,
        scope: &OrgScope,
    ) -> Result<Option<Person>, StoreError> {
        let row = sqlx::query(
            "SELECT staff_id, display_name FROM role_holder
             WHERE role = ? AND scope_unit = ? AND scope_directorate = ?",
        )
        .bind(role.as_str())
        .bind(scope_key(scope.unit.as_deref()))
        .bind(scope_key(scope.directorate.as_deref()))
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;

        row.as_ref()
            .map(|row| {
                Ok(Person {
                    staff_id: StaffId(row.try_get("staff_id").map_err(decode)?),
                    display_name: row.try_get("display_name").map_err(decode)?,
                })
            })
            .transpose()
    }

    async fn load_active_delegations(
        &self,
        delegator: &StaffId,
        on: NaiveDate,
    ) -> Result<Vec<ApprovalDelegation>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, delegator, delegatee, start_date, end_date, leave_types, status
             FROM approval_delegation
             WHERE delegator = ? AND status = 'active' AND start_date <= ? AND ? <= end_date
             ORDER BY start_date ASC",
        )
        .bind(&delegator.0)
        .bind(on.to_string())
        .bind(on.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;

        rows.iter().map(row_to_delegation).collect()
    }

    async fn load_active_acting_appointments(
        &self,
        role: ApproverRole,
        on: NaiveDate,
    ) -> Result<Vec<ActingAppointment>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, role, staff_id, effective_date, end_date, authority_source
             FROM acting_appointment
             WHERE role = ? AND effective_date <= ? AND ? <= end_date
             ORDER BY effective_date ASC",
        )
        .bind(role.as_str())
        .bind(on.to_string())
        .bind(on.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;

        rows.iter().map(row_to_appointment).collect()
    }
}

fn backend(error: sqlx::Error) -> StoreError {
    StoreError::Backend(error.to_string())
}

fn decode(error: sqlx::Error) -> StoreError {
    StoreError::Decode(error.to_string())
}

fn scope_key(value: Option<&str>) -> String {
    value.map(|v| v.trim().to_ascii_lowercase()).unwrap_or_default()
}

fn parse_date(raw: &str) -> Result<NaiveDate, StoreError> {
    raw.parse::<NaiveDate>()
        .map_err(|_| StoreError::Decode(format!("invalid date `{raw}`")))
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| StoreError::Decode(format!("invalid timestamp `{raw}`")))
}

fn parse_opt_timestamp(raw: Option<String>) -> Result<Option<DateTime<Utc>>, StoreError> {
    raw.as_deref().map(parse_timestamp).transpose()
}

fn parse_request_status(raw: &str) -> Result<RequestStatus, StoreError> {
    match raw {
        "pending" => Ok(RequestStatus::Pending),
        "approved" => Ok(RequestStatus::Approved),
        "rejected" => Ok(RequestStatus::Rejected),
        "cancelled" => Ok(RequestStatus::Cancelled),
        other => Err(StoreError::Decode(format!("unknown request status `{other}`"))),
    }
}

fn parse_step_status(raw: &str) -> Result<StepStatus, StoreError> {
    match raw {
        "pending" => Ok(StepStatus::Pending),
        "approved" => Ok(StepStatus::Approved),
        "rejected" => Ok(StepStatus::Rejected),
        other => Err(StoreError::Decode(format!("unknown step status `{other}`"))),
    }
}

fn parse_clearance_status(raw: &str) -> Result<ClearanceStatus, StoreError> {
    match raw {
        "pending" => Ok(ClearanceStatus::Pending),
        "cleared" => Ok(ClearanceStatus::Cleared),
        "rejected" => Ok(ClearanceStatus::Rejected),
        other => Err(StoreError::Decode(format!("unknown clearance status `{other}`"))),
    }
}

fn parse_delegation_status(raw: &str) -> Result<DelegationStatus, StoreError> {
    match raw {
        "active" => Ok(DelegationStatus::Active),
        "expired" => Ok(DelegationStatus::Expired),
        "revoked" => Ok(DelegationStatus::Revoked),
        other => Err(StoreError::Decode(format!("unknown delegation status `{other}`"))),
    }
}

fn parse_role(raw: &str) -> Result<ApproverRole, StoreError> {
    ApproverRole::parse(raw)
        .ok_or_else(|| StoreError::Decode(format!("unknown approver role `{raw}`")))
}

fn row_to_request(row: &sqlx::sqlite::SqliteRow) -> Result<LeaveRequest, StoreError> {
    let status: String = row.try_get("status").map_err(decode)?;
    let leave_type: String = row.try_get("leave_type").map_err(decode)?;
    let start_date: String = row.try_get("start_date").map_err(decode)?;
    let end_date: String = row.try_get("end_date").map_err(decode)?;
    let clearance: Option<String> =
        row.try_get("external_clearance_status").map_err(decode)?;
    let created_at: String = row.try_get("created_at").map_err(decode)?;
    let updated_at: String = row.try_get("updated_at").map_err(decode)?;
    let day_count: i64 = row.try_get("day_count").map_err(decode)?;
    let resubmission_count: i64 = row.try_get("resubmission_count").map_err(decode)?;
    let hr_validated: Option<i64> = row.try_get("hr_validated").map_err(decode)?;

    Ok(LeaveRequest {
        id: LeaveRequestId(row.try_get("id").map_err(decode)?),
        staff_id: StaffId(row.try_get("staff_id").map_err(decode)?),
        staff_name: row.try_get("staff_name").map_err(decode)?,
        leave_type: LeaveType::parse(&leave_type)
            .ok_or_else(|| StoreError::Decode(format!("unknown leave type `{leave_type}`")))?,
        start_date: parse_date(&start_date)?,
        end_date: parse_date(&end_date)?,
        day_count: day_count as u32,
        reason: row.try_get("reason").map_err(decode)?,
        officer_taking_over: row
            .try_get::<Option<String>, _>("officer_taking_over")
            .map_err(decode)?
            .map(StaffId),
        handover_notes: row.try_get("handover_notes").map_err(decode)?,
        status: parse_request_status(&status)?,
        resubmitted_from: row
            .try_get::<Option<String>, _>("resubmitted_from")
            .map_err(decode)?
            .map(LeaveRequestId),
        resubmission_count: resubmission_count as u32,
        requires_external_clearance: row
            .try_get::<i64, _>("requires_external_clearance")
            .map_err(decode)?
            != 0,
        external_clearance_status: clearance.as_deref().map(parse_clearance_status).transpose()?,
        hr_validated: hr_validated.map(|value| value != 0),
        created_at: parse_timestamp(&created_at)?,
        updated_at: parse_timestamp(&updated_at)?,
    })
}

fn row_to_step(row: &sqlx::sqlite::SqliteRow) -> Result<ApprovalStep, StoreError> {
    let role: String = row.try_get("approver_role").map_err(decode)?;
    let status: String = row.try_get("status").map_err(decode)?;
    let level: i64 = row.try_get("level").map_err(decode)?;
    let approval_date: Option<String> = row.try_get("approval_date").map_err(decode)?;
    let activated_at: Option<String> = row.try_get("activated_at").map_err(decode)?;
    let escalation_date: Option<String> = row.try_get("escalation_date").map_err(decode)?;

    Ok(ApprovalStep {
        request_id: LeaveRequestId(row.try_get("request_id").map_err(decode)?),
        level: level as u32,
        approver_role: parse_role(&role)?,
        approver_id: StaffId(row.try_get("approver_id").map_err(decode)?),
        approver_name: row.try_get("approver_name").map_err(decode)?,
        status: parse_step_status(&status)?,
        comments: row.try_get("comments").map_err(decode)?,
        approval_date: parse_opt_timestamp(approval_date)?,
        activated_at: parse_opt_timestamp(activated_at)?,
        escalated: row.try_get::<i64, _>("escalated").map_err(decode)? != 0,
        escalated_to: row
            .try_get::<Option<String>, _>("escalated_to")
            .map_err(decode)?
            .map(StaffId),
        escalation_date: parse_opt_timestamp(escalation_date)?,
    })
}

fn row_to_profile(row: &sqlx::sqlite::SqliteRow) -> Result<StaffOrgProfile, StoreError> {
    let grade: Option<i64> = row.try_get("grade").map_err(decode)?;
    Ok(StaffOrgProfile {
        staff_id: StaffId(row.try_get("staff_id").map_err(decode)?),
        display_name: row.try_get("display_name").map_err(decode)?,
        duty_station: row.try_get("duty_station").map_err(decode)?,
        directorate: row.try_get("directorate").map_err(decode)?,
        division: row.try_get("division").map_err(decode)?,
        unit: row.try_get("unit").map_err(decode)?,
        grade: grade.map(|value| value as u8),
        manager_id: row.try_get::<Option<String>, _>("manager_id").map_err(decode)?.map(StaffId),
        immediate_supervisor_id: row
            .try_get::<Option<String>, _>("immediate_supervisor_id")
            .map_err(decode)?
            .map(StaffId),
    })
}

fn row_to_delegation(row: &sqlx::sqlite::SqliteRow) -> Result<ApprovalDelegation, StoreError> {
    let start_date: String = row.try_get("start_date").map_err(decode)?;
    let end_date: String = row.try_get("end_date").map_err(decode)?;
    let status: String = row.try_get("status").map_err(decode)?;
    let leave_types_raw: String = row.try_get("leave_types").map_err(decode)?;
    let leave_types: Vec<LeaveType> = serde_json::from_str(&leave_types_raw)
        .map_err(|error| StoreError::Decode(format!("invalid leave_types payload: {error}")))?;

    Ok(ApprovalDelegation {
        id: DelegationId(row.try_get("id").map_err(decode)?),
        delegator: StaffId(row.try_get("delegator").map_err(decode)?),
        delegatee: StaffId(row.try_get("delegatee").map_err(decode)?),
        start_date: parse_date(&start_date)?,
        end_date: parse_date(&end_date)?,
        leave_types,
        status: parse_delegation_status(&status)?,
    })
}

fn row_to_appointment(row: &sqlx::sqlite::SqliteRow) -> Result<ActingAppointment, StoreError> {
    let role: String = row.try_get("role").map_err(decode)?;
    let effective_date: String = row.try_get("effective_date").map_err(decode)?;
    let end_date: String = row.try_get("end_date").map_err(decode)?;

    Ok(ActingAppointment {
        id: ActingAppointmentId(row.try_get("id").map_err(decode)?),
        role: parse_role(&role)?,
        staff_id: StaffId(row.try_get("staff_id").map_err(decode)?),
        effective_date: parse_date(&effective_date)?,
        end_date: parse_date(&end_date)?,
        authority_source: row.try_get("authority_source").map_err(decode)?,
    })
}

async fn load_steps(pool: &DbPool, id: &LeaveRequestId) -> Result<Vec<ApprovalStep>, StoreError> {
    let rows = sqlx::query(
        "SELECT request_id, level, approver_role, approver_id, approver_name, status, comments,
                approval_date, activated_at, escalated, escalated_to, escalation_date
         FROM approval_step WHERE request_id = ? ORDER BY level ASC",
    )
    .bind(&id.0)
    .fetch_all(pool)
    .await
    .map_err(backend)?;

    rows.iter().map(row_to_step).collect()
}

async fn load_record_tx(
    tx: &mut Transaction<'_, Sqlite>,
    id: &LeaveRequestId,
) -> Result<Option<RequestRecord>, StoreError> {
    let row = sqlx::query(
        "SELECT id, staff_id, staff_name, leave_type, start_date, end_date, day_count, reason,
                officer_taking_over, handover_notes, status, resubmitted_from,
                resubmission_count, requires_external_clearance, external_clearance_status,
                hr_validated, created_at, updated_at
         FROM leave_request WHERE id = ?",
    )
    .bind(&id.0)
    .fetch_optional(&mut **tx)
    .await
    .map_err(backend)?;

    let Some(row) = row else {
        return Ok(None);
    };
    let request = row_to_request(&row)?;

    let rows = sqlx::query(
        "SELECT request_id, level, approver_role, approver_id, approver_name, status, comments,
                approval_date, activated_at, escalated, escalated_to, escalation_date
         FROM approval_step WHERE request_id = ? ORDER BY level ASC",
    )
    .bind(&id.0)
    .fetch_all(&mut **tx)
    .await
    .map_err(backend)?;
    let steps = rows.iter().map(row_to_step).collect::<Result<Vec<_>, _>>()?;

    Ok(Some(RequestRecord { request, steps }))
}

async fn write_record_tx(
    tx: &mut Transaction<'_, Sqlite>,
    record: &RequestRecord,
) -> Result<(), StoreError> {
    let request = &record.request;
    sqlx::query(
        "INSERT INTO leave_request (id, staff_id, staff_name, leave_type, start_date, end_date,
                                    day_count, reason, officer_taking_over, handover_notes,
                                    status, resubmitted_from, resubmission_count,
                                    requires_external_clearance, external_clearance_status,
                                    hr_validated, created_at, updated_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(id) DO UPDATE SET
             staff_name = excluded.staff_name,
             status = excluded.status,
             resubmitted_from = excluded.resubmitted_from,
             resubmission_count = excluded.resubmission_count,
             requires_external_clearance = excluded.requires_external_clearance,
             external_clearance_status = excluded.external_clearance_status,
             hr_validated = excluded.hr_validated,
             updated_at = excluded.updated_at",
    )
    .bind(&request.id.0)
    .bind(&request.staff_id.0)
    .bind(&request.staff_name)
    .bind(request.leave_type.as_str())
    .bind(request.start_date.to_string())
    .bind(request.end_date.to_string())
    .bind(i64::from(request.day_count))
    .bind(&request.reason)
    .bind(request.officer_taking_over.as_ref().map(|id| id.0.clone()))
    .bind(&request.handover_notes)
    .bind(request.status.as_str())
    .bind(request.resubmitted_from.as_ref().map(|id| id.0.clone()))
    .bind(i64::from(request.resubmission_count))
    .bind(i64::from(request.requires_external_clearance))
    .bind(request.external_clearance_status.map(|status| status.as_str()))
    .bind(request.hr_validated.map(i64::from))
    .bind(request.created_at.to_rfc3339())
    .bind(request.updated_at.to_rfc3339())
    .execute(&mut **tx)
    .await
    .map_err(backend)?;

    sqlx::query("DELETE FROM approval_step WHERE request_id = ?")
        .bind(&request.id.0)
        .execute(&mut **tx)
        .await
        .map_err(backend)?;

    for step in &record.steps {
        sqlx::query(
            "INSERT INTO approval_step (request_id, level, approver_role, approver_id,
                                        approver_name, status, comments, approval_date,
                                        activated_at, escalated, escalated_to, escalation_date)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&step.request_id.0)
        .bind(i64::from(step.level))
        .bind(step.approver_role.as_str())
        .bind(&step.approver_id.0)
        .bind(&step.approver_name)
        .bind(step.status.as_str())
        .bind(&step.comments)
        .bind(step.approval_date.map(|dt| dt.to_rfc3339()))
        .bind(step.activated_at.map(|dt| dt.to_rfc3339()))
        .bind(i64::from(step.escalated))
        .bind(step.escalated_to.as_ref().map(|id| id.0.clone()))
        .bind(step.escalation_date.map(|dt| dt.to_rfc3339()))
        .execute(&mut **tx)
        .await
        .map_err(backend)?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use chrono::{NaiveDate, Utc};

    use leavewell_core::audit::InMemoryAuditSink;
    use leavewell_core::compliance::StaticComplianceCheck;
    use leavewell_core::domain::acting::{ActingAppointment, ActingAppointmentId};
    use leavewell_core::domain::delegation::{
        ApprovalDelegation, DelegationId, DelegationStatus,
    };
    use leavewell_core::domain::request::{
        ClearanceStatus, LeaveRequest, LeaveRequestId, LeaveType, RequestStatus,
    };
    use leavewell_core::domain::staff::{OrgScope, Person, StaffId, StaffOrgProfile};
    use leavewell_core::domain::step::{ApprovalStep, ApproverRole, StepStatus};
    use leavewell_core::engine::{NewLeaveRequest, WorkflowEngine};
    use leavewell_core::escalation::EscalationPolicy;
    use leavewell_core::flows::Decision;
    use leavewell_core::hierarchy::{OrgDirectory, UnitRouting};
    use leavewell_core::notify::InMemoryNotifier;
    use leavewell_core::routing::{RoutePlanner, WorkflowRules};
    use leavewell_core::store::{RecordStore, RequestFilter, RequestRecord, StepGuard};

    use super::SqlRecordStore;
    use crate::{connect_with_settings, migrations};

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
    }

    async fn setup() -> SqlRecordStore {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        SqlRecordStore::new(pool)
    }

    fn sample_record(id: &str, levels: u32) -> RequestRecord {
        let now = Utc::now();
        let request_id = LeaveRequestId(id.to_string());
        let steps = (1..=levels)
            .map(|level| ApprovalStep {
                request_id: request_id.clone(),
                level,
                approver_role: ApproverRole::ImmediateSupervisor,
                approver_id: StaffId(format!("u-{level}")),
                approver_name: format!("Approver {level}"),
                status: StepStatus::Pending,
                comments: None,
                approval_date: None,
                activated_at: (level == 1).then_some(now),
                escalated: false,
                escalated_to: None,
                escalation_date: None,
            })
            .collect();
        RequestRecord {
            request: LeaveRequest {
                id: request_id,
                staff_id: StaffId("u-staff".to_string()),
                staff_name: "Asha Verma".to_string(),
                leave_type: LeaveType::Annual,
                start_date: date(2026, 9, 1),
                end_date: date(2026, 9, 5),
                day_count: 5,
                reason: "family visit".to_string(),
                officer_taking_over: Some(StaffId("u-peer".to_string())),
                handover_notes: Some("handover file on shared drive".to_string()),
                status: RequestStatus::Pending,
                resubmitted_from: None,
                resubmission_count: 0,
                requires_external_clearance: false,
                external_clearance_status: None,
                hr_validated: None,
                created_at: now,
                updated_at: now,
            },
            steps,
        }
    }

    #[tokio::test]
    async fn request_round_trips_with_all_fields() {
        let store = setup().await;
        let record = sample_record("LR-1", 2);

        store.save_request(&record).await.expect("save");
        let found = store
            .load_request(&LeaveRequestId("LR-1".to_string()))
            .await
            .expect("load")
            .expect("exists");

        assert_eq!(found.request.staff_name, "Asha Verma");
        assert_eq!(found.request.officer_taking_over, record.request.officer_taking_over);
        assert_eq!(found.request.handover_notes, record.request.handover_notes);
        assert_eq!(found.steps.len(), 2);
        assert_eq!(found.steps[0].level, 1);
        assert!(found.steps[0].activated_at.is_some());
        assert!(found.steps[1].activated_at.is_none());
    }

    #[tokio::test]
    async fn guarded_commit_serializes_same_step_decisions() {
        let store = setup().await;
        let record = sample_record("LR-1", 2);
        store.save_request(&record).await.expect("save");

        let mut decided = record.clone();
        decided.steps[0].status = StepStatus::Approved;
        let first = store
            .commit_step_transition(&decided, 1, StepGuard::Pending)
            .await
            .expect("first commit");
        assert!(first.is_some());

        let mut late = record;
        late.steps[0].status = StepStatus::Rejected;
        let second = store
            .commit_step_transition(&late, 1, StepGuard::Pending)
            .await
            .expect("second commit");
        assert!(second.is_none(), "decided step must not be re-decided");

        let stored = store
            .load_request(&LeaveRequestId("LR-1".to_string()))
            .await
            .expect("load")
            .expect("exists");
        assert_eq!(stored.steps[0].status, StepStatus::Approved);
    }

    #[tokio::test]
    async fn interleaved_decisions_on_different_steps_both_survive() {
        let store = setup().await;
        let record = sample_record("LR-1", 2);
        store.save_request(&record).await.expect("save");

        let mut from_a = record.clone();
        from_a.steps[0].status = StepStatus::Approved;
        store
            .commit_step_transition(&from_a, 1, StepGuard::Pending)
            .await
            .expect("commit level 1")
            .expect("applies");

        let mut from_b = record;
        from_b.steps[1].status = StepStatus::Rejected;
        let merged = store
            .commit_step_transition(&from_b, 2, StepGuard::Pending)
            .await
            .expect("commit level 2")
            .expect("applies");

        assert_eq!(merged.steps[0].status, StepStatus::Approved);
        assert_eq!(merged.steps[1].status, StepStatus::Rejected);
        assert_eq!(merged.request.status, RequestStatus::Rejected);
    }

    #[tokio::test]
    async fn clearance_commit_unlocks_fully_approved_request() {
        let store = setup().await;
        let mut record = sample_record("LR-1", 1);
        record.request.requires_external_clearance = true;
        record.request.external_clearance_status = Some(ClearanceStatus::Pending);
        record.steps[0].status = StepStatus::Approved;
        store.save_request(&record).await.expect("save");

        let updated = store
            .commit_clearance(&record.request.id, ClearanceStatus::Cleared)
            .await
            .expect("commit")
            .expect("exists");
        assert_eq!(updated.request.status, RequestStatus::Approved);
        assert_eq!(
            updated.request.external_clearance_status,
            Some(ClearanceStatus::Cleared)
        );
    }

    #[tokio::test]
    async fn role_holder_scopes_are_distinct() {
        let store = setup().await;
        store
            .register_role_holder(
                ApproverRole::UnitHead,
                &OrgScope::unit("registry"),
                &Person {
                    staff_id: StaffId("u-head".to_string()),
                    display_name: "Noor Haddad".to_string(),
                },
            )
            .await
            .expect("register unit head");
        store
            .register_role_holder(
                ApproverRole::FinalAuthority,
                &OrgScope::organization_wide(),
                &Person {
                    staff_id: StaffId("u-fa".to_string()),
                    display_name: "Director General".to_string(),
                },
            )
            .await
            .expect("register final authority");

        let unit_head = store
            .load_role_holder(ApproverRole::UnitHead, &OrgScope::unit("Registry"))
            .await
            .expect("load");
        assert_eq!(unit_head.map(|p| p.staff_id.0), Some("u-head".to_string()));

        let wrong_unit = store
            .load_role_holder(ApproverRole::UnitHead, &OrgScope::unit("field-ops"))
            .await
            .expect("load");
        assert!(wrong_unit.is_none());

        let authority = store
            .load_role_holder(ApproverRole::FinalAuthority, &OrgScope::organization_wide())
            .await
            .expect("load");
        assert_eq!(authority.map(|p| p.staff_id.0), Some("u-fa".to_string()));
    }

    #[tokio::test]
    async fn delegations_filter_by_window_and_overlaps_are_refused() {
        let store = setup().await;
        let delegation = ApprovalDelegation {
            id: DelegationId("DLG-1".to_string()),
            delegator: StaffId("u-head".to_string()),
            delegatee: StaffId("u-deputy".to_string()),
            start_date: date(2026, 3, 1),
            end_date: date(2026, 3, 15),
            leave_types: vec![LeaveType::Annual],
            status: DelegationStatus::Active,
        };
        store.save_delegation(&delegation).await.expect("save");

        let inside = store
            .load_active_delegations(&StaffId("u-head".to_string()), date(2026, 3, 10))
            .await
            .expect("load");
        assert_eq!(inside.len(), 1);
        assert_eq!(inside[0].leave_types, vec![LeaveType::Annual]);

        let outside = store
            .load_active_delegations(&StaffId("u-head".to_string()), date(2026, 4, 1))
            .await
            .expect("load");
        assert!(outside.is_empty());

        let overlapping = ApprovalDelegation {
            id: DelegationId("DLG-2".to_string()),
            start_date: date(2026, 3, 10),
            end_date: date(2026, 3, 20),
            ..delegation
        };
        let error =
            store.save_delegation(&overlapping).await.expect_err("overlap must be refused");
        assert!(error.to_string().contains("overlapping"));
    }

    #[tokio::test]
    async fn acting_appointments_filter_by_role_and_window() {
        let store = setup().await;
        store
            .save_acting_appointment(&ActingAppointment {
                id: ActingAppointmentId("ACT-1".to_string()),
                role: ApproverRole::Director,
                staff_id: StaffId("u-acting".to_string()),
                effective_date: date(2026, 5, 1),
                end_date: date(2026, 5, 31),
                authority_source: "HR/2026/114".to_string(),
            })
            .await
            .expect("save");

        let active = store
            .load_active_acting_appointments(ApproverRole::Director, date(2026, 5, 15))
            .await
            .expect("load");
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].authority_source, "HR/2026/114");

        let wrong_role = store
            .load_active_acting_appointments(ApproverRole::UnitHead, date(2026, 5, 15))
            .await
            .expect("load");
        assert!(wrong_role.is_empty());

        let expired = store
            .load_active_acting_appointments(ApproverRole::Director, date(2026, 6, 15))
            .await
            .expect("load");
        assert!(expired.is_empty());
    }

    #[tokio::test]
    async fn list_requests_filters_by_status_and_type() {
        let store = setup().await;
        let mut sick = sample_record("LR-1", 1);
        sick.request.leave_type = LeaveType::Sick;
        store.save_request(&sick).await.expect("save");
        let annual = sample_record("LR-2", 1);
        store.save_request(&annual).await.expect("save");

        let pending = store.list_requests(&RequestFilter::pending()).await.expect("list");
        assert_eq!(pending.len(), 2);

        let sick_only = store
            .list_requests(&RequestFilter {
                leave_type: Some(LeaveType::Sick),
                ..RequestFilter::default()
            })
            .await
            .expect("list");
        assert_eq!(sick_only.len(), 1);
        assert_eq!(sick_only[0].request.id.0, "LR-1");
        assert_eq!(sick_only[0].steps.len(), 1);
    }

    #[tokio::test]
    async fn engine_runs_a_full_approval_over_sqlite() {
        let store = setup().await;
        store
            .upsert_profile(&StaffOrgProfile {
                staff_id: StaffId("u-staff".to_string()),
                display_name: "Asha Verma".to_string(),
                duty_station: None,
                directorate: None,
                division: None,
                unit: Some("registry".to_string()),
                grade: Some(4),
                manager_id: None,
                immediate_supervisor_id: Some(StaffId("u-sup".to_string())),
            })
            .await
            .expect("profile");
        store
            .upsert_profile(&StaffOrgProfile {
                staff_id: StaffId("u-sup".to_string()),
                display_name: "Lena Osei".to_string(),
                duty_station: None,
                directorate: None,
                division: None,
                unit: Some("registry".to_string()),
                grade: Some(8),
                manager_id: None,
                immediate_supervisor_id: None,
            })
            .await
            .expect("profile");
        store
            .register_role_holder(
                ApproverRole::UnitHead,
                &OrgScope::unit("registry"),
                &Person {
                    staff_id: StaffId("u-head".to_string()),
                    display_name: "Noor Haddad".to_string(),
                },
            )
            .await
            .expect("holder");
        store
            .register_role_holder(
                ApproverRole::FinalAuthority,
                &OrgScope::organization_wide(),
                &Person {
                    staff_id: StaffId("u-fa".to_string()),
                    display_name: "Director General".to_string(),
                },
            )
            .await
            .expect("holder");

        let directory = OrgDirectory::new(
            vec![UnitRouting {
                unit: "registry".to_string(),
                directorate: None,
                reports_to_top: true,
            }],
            None,
            None,
        );
        let engine = WorkflowEngine::new(
            store,
            InMemoryNotifier::default(),
            InMemoryAuditSink::default(),
            StaticComplianceCheck::allowing(),
            RoutePlanner::new(directory, WorkflowRules::default()),
            EscalationPolicy::default(),
        );

        let start = date(2026, 9, 1);
        let receipt = engine
            .submit(NewLeaveRequest {
                staff_id: StaffId("u-staff".to_string()),
                leave_type: LeaveType::Annual,
                start_date: start,
                end_date: date(2026, 9, 3),
                day_count: 3,
                reason: "family visit".to_string(),
                officer_taking_over: None,
                handover_notes: None,
            })
            .await
            .expect("submit");

        for (index, actor) in ["u-sup", "u-head", "u-fa"].iter().enumerate() {
            engine
                .decide(
                    &receipt.request_id,
                    index as u32 + 1,
                    Decision::Approve,
                    &StaffId(actor.to_string()),
                    None,
                )
                .await
                .expect("approve");
        }

        let report = engine.status(&receipt.request_id).await.expect("status");
        assert_eq!(report.status, RequestStatus::Approved);
    }
}
