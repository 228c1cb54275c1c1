use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::staff::StaffId;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LeaveRequestId(pub String);

impl std::fmt::Display for LeaveRequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeaveType {
    Annual,
    Sick,
    Unpaid,
    SpecialService,
    Training,
    Study,
    Maternity,
    Paternity,
    Compassionate,
}

impl LeaveType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Annual => "annual",
            Self::Sick => "sick",
            Self::Unpaid => "unpaid",
            Self::SpecialService => "special_service",
            Self::Training => "training",
            Self::Study => "study",
            Self::Maternity => "maternity",
            Self::Paternity => "paternity",
            Self::Compassionate => "compassionate",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "annual" => Some(Self::Annual),
            "sick" => Some(Self::Sick),
            "unpaid" => Some(Self::Unpaid),
            "special_service" => Some(Self::SpecialService),
            "training" => Some(Self::Training),
            "study" => Some(Self::Study),
            "maternity" => Some(Self::Maternity),
            "paternity" => Some(Self::Paternity),
            "compassionate" => Some(Self::Compassionate),
            _ => None,
        }
    }
}

impl std::fmt::Display for LeaveType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    Pending,
    Approved,
    Rejected,
    Cancelled,
}

impl RequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClearanceStatus {
    Pending,
    Cleared,
    Rejected,
}

impl ClearanceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Cleared => "cleared",
            Self::Rejected => "rejected",
        }
    }
}

/// A leave request. Created at submission, mutated only by state-machine
/// transitions, never deleted.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaveRequest {
    pub id: LeaveRequestId,
    pub staff_id: StaffId,
    pub staff_name: String,
    pub leave_type: LeaveType,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub day_count: u32,
    pub reason: String,
    pub officer_taking_over: Option<StaffId>,
    pub handover_notes: Option<String>,
    pub status: RequestStatus,
    pub resubmitted_from: Option<LeaveRequestId>,
    pub resubmission_count: u32,
    pub requires_external_clearance: bool,
    pub external_clearance_status: Option<ClearanceStatus>,
    pub hr_validated: Option<bool>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl LeaveRequest {
    /// Whether the external gate still withholds final approval. The full
    /// "awaiting clearance" sub-state also requires every internal step to
    /// have approved; see `flows::awaiting_external_clearance`.
    pub fn clearance_outstanding(&self) -> bool {
        self.requires_external_clearance
            && !matches!(self.external_clearance_status, Some(ClearanceStatus::Cleared))
    }
}

#[cfg(test)]
mod tests {
    use super::LeaveType;

    #[test]
    fn leave_type_round_trips_through_str() {
        for leave_type in [
            LeaveType::Annual,
            LeaveType::Sick,
            LeaveType::Unpaid,
            LeaveType::SpecialService,
            LeaveType::Training,
            LeaveType::Study,
            LeaveType::Maternity,
            LeaveType::Paternity,
            LeaveType::Compassionate,
        ] {
            assert_eq!(LeaveType::parse(leave_type.as_str()), Some(leave_type));
        }
    }

    #[test]
    fn leave_type_parse_is_case_insensitive_and_trims() {
        assert_eq!(LeaveType::parse("  Annual "), Some(LeaveType::Annual));
        assert_eq!(LeaveType::parse("SPECIAL_SERVICE"), Some(LeaveType::SpecialService));
        assert_eq!(LeaveType::parse("sabbatical"), None);
    }
}
