use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::domain::staff::{StaffId, StaffOrgProfile};

/// Routing attributes for one organizational unit.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitRouting {
    pub unit: String,
    pub directorate: Option<String>,
    /// Units reporting directly to the top authority skip the directorate
    /// tier entirely.
    #[serde(default)]
    pub reports_to_top: bool,
}

/// Injected organizational routing tables. One instance per deployment;
/// nothing here is a module-level constant so tenants can differ.
#[derive(Clone, Debug, Default)]
pub struct OrgDirectory {
    units: HashMap<String, UnitRouting>,
    hr_unit: Option<String>,
    audit_unit: Option<String>,
}

impl OrgDirectory {
    pub fn new(
        units: Vec<UnitRouting>,
        hr_unit: Option<String>,
        audit_unit: Option<String>,
    ) -> Self {
        let units =
            units.into_iter().map(|routing| (normalize_key(&routing.unit), routing)).collect();
        Self {
            units,
            hr_unit: hr_unit.map(|unit| normalize_key(&unit)),
            audit_unit: audit_unit.map(|unit| normalize_key(&unit)),
        }
    }

    /// The directorate a unit rolls up to, when the routing table knows it.
    pub fn directorate_of(&self, unit: &str) -> Option<&str> {
        self.units.get(&normalize_key(unit)).and_then(|routing| routing.directorate.as_deref())
    }

    /// Whether the unit reports directly to the top authority.
    pub fn reports_to_top(&self, unit: &str) -> bool {
        self.units.get(&normalize_key(unit)).map(|routing| routing.reports_to_top).unwrap_or(false)
    }

    /// The designated HR-managing unit always gets an HR-Director level.
    pub fn is_hr_unit(&self, unit: &str) -> bool {
        self.hr_unit.as_deref() == Some(normalize_key(unit).as_str())
    }

    /// The designated audit unit substitutes an Auditor for its unit head.
    pub fn is_audit_unit(&self, unit: &str) -> bool {
        self.audit_unit.as_deref() == Some(normalize_key(unit).as_str())
    }

    /// Who supervises this staff member: the immediate supervisor on record,
    /// falling back to the line manager. `None` marks the top of the
    /// hierarchy.
    pub fn supervisor_of<'a>(&self, profile: &'a StaffOrgProfile) -> Option<&'a StaffId> {
        profile.immediate_supervisor_id.as_ref().or(profile.manager_id.as_ref())
    }
}

pub(crate) fn normalize_key(raw: &str) -> String {
    raw.trim().to_ascii_lowercase()
}
