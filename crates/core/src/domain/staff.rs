use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StaffId(pub String);

impl std::fmt::Display for StaffId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Read model owned by the staff directory. Consumed, never mutated, by the
/// workflow engine.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaffOrgProfile {
    pub staff_id: StaffId,
    pub display_name: String,
    pub duty_station: Option<String>,
    pub directorate: Option<String>,
    pub division: Option<String>,
    pub unit: Option<String>,
    pub grade: Option<u8>,
    pub manager_id: Option<StaffId>,
    pub immediate_supervisor_id: Option<StaffId>,
}

impl StaffOrgProfile {
    pub fn person(&self) -> Person {
        Person { staff_id: self.staff_id.clone(), display_name: self.display_name.clone() }
    }
}

/// A concrete, resolved person.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Person {
    pub staff_id: StaffId,
    pub display_name: String,
}

/// Organizational scope a role holder is looked up within. An empty scope
/// matches organization-wide holders (HR director, final authority).
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrgScope {
    pub unit: Option<String>,
    pub directorate: Option<String>,
}

impl OrgScope {
    pub fn organization_wide() -> Self {
        Self::default()
    }

    pub fn unit(unit: impl Into<String>) -> Self {
        Self { unit: Some(unit.into()), directorate: None }
    }

    pub fn directorate(directorate: impl Into<String>) -> Self {
        Self { unit: None, directorate: Some(directorate.into()) }
    }
}
