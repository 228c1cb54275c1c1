use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::domain::request::LeaveType;
use crate::domain::staff::StaffId;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DelegationId(pub String);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DelegationStatus {
    Active,
    Expired,
    Revoked,
}

impl DelegationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Expired => "expired",
            Self::Revoked => "revoked",
        }
    }
}

/// A voluntary, time-bounded transfer of one person's approval authority to
/// another. An empty `leave_types` scope covers all leave types.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalDelegation {
    pub id: DelegationId,
    pub delegator: StaffId,
    pub delegatee: StaffId,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub leave_types: Vec<LeaveType>,
    pub status: DelegationStatus,
}

impl ApprovalDelegation {
    /// Whether this delegation applies to a decision on `leave_type` made on
    /// `on`.
    pub fn covers(&self, leave_type: LeaveType, on: NaiveDate) -> bool {
        self.status == DelegationStatus::Active
            && self.start_date <= on
            && on <= self.end_date
            && (self.leave_types.is_empty() || self.leave_types.contains(&leave_type))
    }

    /// Two active delegations for the same delegator may not have
    /// overlapping date ranges.
    pub fn conflicts_with(&self, other: &ApprovalDelegation) -> bool {
        self.delegator == other.delegator
            && self.status == DelegationStatus::Active
            && other.status == DelegationStatus::Active
            && self.start_date <= other.end_date
            && other.start_date <= self.end_date
    }
}
