use serde::{Deserialize, Serialize};

use crate::domain::request::LeaveType;
use crate::domain::staff::StaffId;
use crate::store::StoreError;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Eligibility {
    pub eligible: bool,
    pub reasons: Vec<String>,
}

impl Eligibility {
    pub fn eligible() -> Self {
        Self { eligible: true, reasons: Vec::new() }
    }

    pub fn blocked(reasons: Vec<String>) -> Self {
        Self { eligible: false, reasons }
    }
}

/// Balance/eligibility arithmetic lives in a separate subsystem; the engine
/// only consults the verdict, once, before workflow determination.
pub trait ComplianceCheck: Send + Sync {
    fn is_eligible(
        &self,
        staff_id: &StaffId,
        leave_type: LeaveType,
        day_count: u32,
    ) -> Result<Eligibility, StoreError>;
}

/// Fixed-verdict check for tests and tooling.
#[derive(Clone, Debug)]
pub struct StaticComplianceCheck {
    verdict: Eligibility,
}

impl StaticComplianceCheck {
    pub fn allowing() -> Self {
        Self { verdict: Eligibility::eligible() }
    }

    pub fn blocking(reasons: Vec<String>) -> Self {
        Self { verdict: Eligibility::blocked(reasons) }
    }
}

impl Default for StaticComplianceCheck {
    fn default() -> Self {
        Self::allowing()
    }
}

impl ComplianceCheck for StaticComplianceCheck {
    fn is_eligible(
        &self,
        _staff_id: &StaffId,
        _leave_type: LeaveType,
        _day_count: u32,
    ) -> Result<Eligibility, StoreError> {
        Ok(self.verdict.clone())
    }
}
