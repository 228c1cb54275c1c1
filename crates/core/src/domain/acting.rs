use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::domain::staff::StaffId;
use crate::domain::step::ApproverRole;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ActingAppointmentId(pub String);

/// A time-bounded formal substitution of one person into a role normally
/// held by another. Created and deleted by administrative action; the
/// workflow engine only reads these.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActingAppointment {
    pub id: ActingAppointmentId,
    pub role: ApproverRole,
    pub staff_id: StaffId,
    pub effective_date: NaiveDate,
    pub end_date: NaiveDate,
    /// Reference to the formal instrument authorizing the appointment.
    pub authority_source: String,
}

impl ActingAppointment {
    pub fn in_effect(&self, on: NaiveDate) -> bool {
        self.effective_date <= on && on <= self.end_date
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::{ActingAppointment, ActingAppointmentId};
    use crate::domain::staff::StaffId;
    use crate::domain::step::ApproverRole;

    #[test]
    fn appointment_is_effective_only_inside_its_window() {
        let appointment = ActingAppointment {
            id: ActingAppointmentId("ACT-1".to_string()),
            role: ApproverRole::Director,
            staff_id: StaffId("u-acting".to_string()),
            effective_date: NaiveDate::from_ymd_opt(2026, 5, 1).expect("valid date"),
            end_date: NaiveDate::from_ymd_opt(2026, 5, 31).expect("valid date"),
            authority_source: "HR/2026/114".to_string(),
        };

        assert!(appointment.in_effect(NaiveDate::from_ymd_opt(2026, 5, 1).expect("valid date")));
        assert!(appointment.in_effect(NaiveDate::from_ymd_opt(2026, 5, 31).expect("valid date")));
        assert!(!appointment.in_effect(NaiveDate::from_ymd_opt(2026, 6, 1).expect("valid date")));
    }
}
