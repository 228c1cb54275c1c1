use chrono::NaiveDate;
use serde::Serialize;

use leavewell_core::domain::acting::{ActingAppointment, ActingAppointmentId};
use leavewell_core::domain::delegation::{ApprovalDelegation, DelegationId, DelegationStatus};
use leavewell_core::domain::request::LeaveType;
use leavewell_core::domain::staff::{OrgScope, Person, StaffId, StaffOrgProfile};
use leavewell_core::domain::step::ApproverRole;
use leavewell_core::store::StoreError;

use crate::store::SqlRecordStore;
use crate::DbPool;

/// Deterministic demo dataset: a small org chart with one unit reporting
/// straight to the top, an active delegation, and an acting directorship.
pub struct SeedDataset;

#[derive(Clone, Debug, Serialize)]
pub struct SeedResult {
    pub profiles: usize,
    pub role_holders: usize,
    pub delegations: usize,
    pub acting_appointments: usize,
}

#[derive(Clone, Debug, Serialize)]
pub struct SeedVerification {
    pub all_present: bool,
    pub checks: Vec<(&'static str, bool)>,
}

fn profile(
    staff_id: &str,
    display_name: &str,
    unit: Option<&str>,
    grade: u8,
    supervisor: Option<&str>,
) -> StaffOrgProfile {
    StaffOrgProfile {
        staff_id: StaffId(staff_id.to_string()),
        display_name: display_name.to_string(),
        duty_station: Some("HQ".to_string()),
        directorate: None,
        division: None,
        unit: unit.map(str::to_string),
        grade: Some(grade),
        manager_id: None,
        immediate_supervisor_id: supervisor.map(|id| StaffId(id.to_string())),
    }
}

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap_or_default()
}

impl SeedDataset {
    pub async fn load(pool: &DbPool) -> Result<SeedResult, StoreError> {
        let store = SqlRecordStore::new(pool.clone());

        let profiles = [
            profile("u-staff", "Asha Verma", Some("registry"), 4, Some("u-sup")),
            profile("u-sup", "Lena Osei", Some("registry"), 8, Some("u-head")),
            profile("u-head", "Noor Haddad", Some("registry"), 10, None),
            profile("u-hr", "Rui Campos", Some("people-services"), 9, None),
            profile("u-fa", "Director General", None, 12, None),
            profile("u-deputy", "Mei Tanaka", Some("registry"), 9, None),
            profile("u-acting", "Sol Berg", Some("field-ops"), 10, None),
        ];
        for entry in &profiles {
            store.upsert_profile(entry).await?;
        }

        let role_holders = [
            (
                ApproverRole::UnitHead,
                OrgScope::unit("registry"),
                Person {
                    staff_id: StaffId("u-head".to_string()),
                    display_name: "Noor Haddad".to_string(),
                },
            ),
            (
                ApproverRole::Director,
                OrgScope::directorate("operations"),
                Person {
                    staff_id: StaffId("u-dir".to_string()),
                    display_name: "Ade Bakare".to_string(),
                },
            ),
            (
                ApproverRole::HrOfficer,
                OrgScope::organization_wide(),
                Person {
                    staff_id: StaffId("u-hr".to_string()),
                    display_name: "Rui Campos".to_string(),
                },
            ),
            (
                ApproverRole::HrDirector,
                OrgScope::organization_wide(),
                Person {
                    staff_id: StaffId("u-hrd".to_string()),
                    display_name: "Ines Duarte".to_string(),
                },
            ),
            (
                ApproverRole::FinalAuthority,
                OrgScope::organization_wide(),
                Person {
                    staff_id: StaffId("u-fa".to_string()),
                    display_name: "Director General".to_string(),
                },
            ),
        ];
        for (role, scope, person) in &role_holders {
            store.register_role_holder(*role, scope, person).await?;
        }

        store
            .save_delegation(&ApprovalDelegation {
                id: DelegationId("DLG-SEED-1".to_string()),
                delegator: StaffId("u-head".to_string()),
                delegatee: StaffId("u-deputy".to_string()),
                start_date: date(2026, 8, 1),
                end_date: date(2026, 8, 31),
                leave_types: vec![LeaveType::Annual, LeaveType::Sick],
                status: DelegationStatus::Active,
            })
            .await?;

        store
            .save_acting_appointment(&ActingAppointment {
                id: ActingAppointmentId("ACT-SEED-1".to_string()),
                role: ApproverRole::Director,
                staff_id: StaffId("u-acting".to_string()),
                effective_date: date(2026, 8, 10),
                end_date: date(2026, 9, 10),
                authority_source: "HR/2026/114".to_string(),
            })
            .await?;

        Ok(SeedResult {
            profiles: profiles.len(),
            role_holders: role_holders.len(),
            delegations: 1,
            acting_appointments: 1,
        })
    }

    pub async fn verify(pool: &DbPool) -> Result<SeedVerification, StoreError> {
        let checks = vec![
            ("staff_profiles", count(pool, "staff_profile").await? >= 7),
            ("role_holders", count(pool, "role_holder").await? >= 5),
            ("delegations", count(pool, "approval_delegation").await? >= 1),
            ("acting_appointments", count(pool, "acting_appointment").await? >= 1),
        ];
        let all_present = checks.iter().all(|(_, passed)| *passed);
        Ok(SeedVerification { all_present, checks })
    }
}

async fn count(pool: &DbPool, table: &str) -> Result<i64, StoreError> {
    let (count,): (i64,) = sqlx::query_as(&format!("SELECT COUNT(*) FROM {table}"))
        .fetch_one(pool)
        .await
        .map_err(|error| StoreError::Backend(error.to_string()))?;
    Ok(count)
}
