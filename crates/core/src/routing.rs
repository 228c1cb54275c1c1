use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::domain::request::LeaveType;
use crate::domain::staff::StaffOrgProfile;
use crate::domain::step::ApproverRole;
use crate::hierarchy::OrgDirectory;

/// Policy knobs for workflow determination, injected from configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowRules {
    /// Leave types that cannot finalize without external-authority sign-off.
    pub external_clearance_types: Vec<LeaveType>,
    /// Grades at or above this always get an HR validation level.
    pub hr_review_min_grade: u8,
    /// Requests at or above this many days get an HR validation level
    /// regardless of grade.
    pub hr_review_min_days: u32,
    /// Bounded retries for rejected requests.
    pub resubmission_limit: u32,
}

impl Default for WorkflowRules {
    fn default() -> Self {
        Self {
            external_clearance_types: vec![LeaveType::Unpaid, LeaveType::Study],
            hr_review_min_grade: 7,
            hr_review_min_days: 30,
            resubmission_limit: 3,
        }
    }
}

impl WorkflowRules {
    pub fn requires_external_clearance(&self, leave_type: LeaveType) -> bool {
        self.external_clearance_types.contains(&leave_type)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlannedLevel {
    pub level: u32,
    pub approver_role: ApproverRole,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutePlan {
    pub levels: Vec<PlannedLevel>,
    pub requires_external_clearance: bool,
}

/// Determines the ordered approval chain for one request by walking the
/// organizational tiers upward from the immediate supervisor.
#[derive(Clone, Debug)]
pub struct RoutePlanner {
    directory: OrgDirectory,
    rules: WorkflowRules,
}

impl RoutePlanner {
    pub fn new(directory: OrgDirectory, rules: WorkflowRules) -> Self {
        Self { directory, rules }
    }

    pub fn rules(&self) -> &WorkflowRules {
        &self.rules
    }

    pub fn directory(&self) -> &OrgDirectory {
        &self.directory
    }

    /// Missing profile attributes omit the corresponding tier instead of
    /// failing the determination. Every omission is logged so deployments
    /// can alert on the fail-open path.
    pub fn plan(
        &self,
        profile: &StaffOrgProfile,
        leave_type: LeaveType,
        day_count: u32,
    ) -> RoutePlan {
        let requires_external_clearance = self.rules.requires_external_clearance(leave_type);
        let mut roles: Vec<ApproverRole> = Vec::new();

        if self.directory.supervisor_of(profile).is_some() {
            roles.push(ApproverRole::ImmediateSupervisor);
            self.push_unit_tiers(profile, &mut roles);

            let grade_requires_review = match profile.grade {
                Some(grade) => grade >= self.rules.hr_review_min_grade,
                None => {
                    warn!(
                        event_name = "routing.tier_omitted",
                        staff_id = %profile.staff_id,
                        tier = "hr_validation",
                        "no grade on file; omitting grade-based HR validation"
                    );
                    false
                }
            };
            if grade_requires_review || day_count >= self.rules.hr_review_min_days {
                roles.push(ApproverRole::HrOfficer);
            }
        }
        // Top of the hierarchy: the chain is the final authority alone,
        // still subject to the mandatory HR validation for clearance-gated
        // leave types below.

        if requires_external_clearance && !roles.contains(&ApproverRole::HrOfficer) {
            roles.push(ApproverRole::HrOfficer);
        }
        roles.push(ApproverRole::FinalAuthority);

        let levels = roles
            .into_iter()
            .enumerate()
            .map(|(index, approver_role)| PlannedLevel {
                level: index as u32 + 1,
                approver_role,
            })
            .collect();

        RoutePlan { levels, requires_external_clearance }
    }

    fn push_unit_tiers(&self, profile: &StaffOrgProfile, roles: &mut Vec<ApproverRole>) {
        let Some(unit) = profile.unit.as_deref() else {
            warn!(
                event_name = "routing.tier_omitted",
                staff_id = %profile.staff_id,
                tier = "unit",
                "no unit on file; omitting unit and directorate tiers"
            );
            return;
        };

        if self.directory.is_audit_unit(unit) {
            roles.push(ApproverRole::Auditor);
        } else {
            roles.push(ApproverRole::UnitHead);
        }

        if self.directory.reports_to_top(unit) {
            // Unit is configured to bypass the directorate tier.
        } else {
            let directorate = profile
                .directorate
                .clone()
                .or_else(|| self.directory.directorate_of(unit).map(str::to_string));
            if directorate.is_some() {
                roles.push(ApproverRole::Director);
            } else {
                warn!(
                    event_name = "routing.tier_omitted",
                    staff_id = %profile.staff_id,
                    tier = "directorate",
                    "no directorate on file or in routing table; omitting director tier"
                );
            }
        }

        if self.directory.is_hr_unit(unit) {
            roles.push(ApproverRole::HrDirector);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{RoutePlanner, WorkflowRules};
    use crate::domain::request::LeaveType;
    use crate::domain::staff::{StaffId, StaffOrgProfile};
    use crate::domain::step::ApproverRole;
    use crate::hierarchy::{OrgDirectory, UnitRouting};

    fn directory() -> OrgDirectory {
        OrgDirectory::new(
            vec![
                UnitRouting {
                    unit: "field-ops".to_string(),
                    directorate: Some("operations".to_string()),
                    reports_to_top: false,
                },
                UnitRouting {
                    unit: "registry".to_string(),
                    directorate: None,
                    reports_to_top: true,
                },
                UnitRouting {
                    unit: "internal-audit".to_string(),
                    directorate: None,
                    reports_to_top: true,
                },
                UnitRouting {
                    unit: "people-services".to_string(),
                    directorate: Some("corporate".to_string()),
                    reports_to_top: false,
                },
            ],
            Some("people-services".to_string()),
            Some("internal-audit".to_string()),
        )
    }

    fn planner() -> RoutePlanner {
        RoutePlanner::new(directory(), WorkflowRules::default())
    }

    fn profile(unit: Option<&str>, grade: Option<u8>) -> StaffOrgProfile {
        StaffOrgProfile {
            staff_id: StaffId("u-staff".to_string()),
            display_name: "Asha Verma".to_string(),
            duty_station: Some("HQ".to_string()),
            directorate: None,
            division: None,
            unit: unit.map(str::to_string),
            grade,
            manager_id: None,
            immediate_supervisor_id: Some(StaffId("u-sup".to_string())),
        }
    }

    fn roles(planner: &RoutePlanner, profile: &StaffOrgProfile, leave_type: LeaveType) -> Vec<ApproverRole> {
        planner.plan(profile, leave_type, 5).levels.into_iter().map(|l| l.approver_role).collect()
    }

    #[test]
    fn standard_unit_walks_supervisor_unit_director_final() {
        let got = roles(&planner(), &profile(Some("field-ops"), Some(5)), LeaveType::Annual);
        assert_eq!(
            got,
            vec![
                ApproverRole::ImmediateSupervisor,
                ApproverRole::UnitHead,
                ApproverRole::Director,
                ApproverRole::FinalAuthority,
            ]
        );
    }

    #[test]
    fn levels_are_contiguous_from_one() {
        let plan = planner().plan(&profile(Some("field-ops"), Some(9)), LeaveType::Annual, 5);
        let levels: Vec<u32> = plan.levels.iter().map(|l| l.level).collect();
        assert_eq!(levels, (1..=plan.levels.len() as u32).collect::<Vec<_>>());
    }

    #[test]
    fn direct_reporting_unit_skips_directorate_tier() {
        let got = roles(&planner(), &profile(Some("registry"), Some(5)), LeaveType::Annual);
        assert_eq!(
            got,
            vec![
                ApproverRole::ImmediateSupervisor,
                ApproverRole::UnitHead,
                ApproverRole::FinalAuthority,
            ]
        );
    }

    #[test]
    fn audit_unit_substitutes_auditor_for_unit_head() {
        let got = roles(&planner(), &profile(Some("internal-audit"), Some(5)), LeaveType::Annual);
        assert!(got.contains(&ApproverRole::Auditor));
        assert!(!got.contains(&ApproverRole::UnitHead));
    }

    #[test]
    fn hr_unit_always_inserts_hr_director_level() {
        let got = roles(&planner(), &profile(Some("people-services"), Some(5)), LeaveType::Annual);
        assert!(got.contains(&ApproverRole::HrDirector));
    }

    #[test]
    fn senior_grade_adds_hr_validation() {
        let got = roles(&planner(), &profile(Some("field-ops"), Some(8)), LeaveType::Annual);
        assert!(got.contains(&ApproverRole::HrOfficer));

        let junior = roles(&planner(), &profile(Some("field-ops"), Some(4)), LeaveType::Annual);
        assert!(!junior.contains(&ApproverRole::HrOfficer));
    }

    #[test]
    fn long_leave_adds_hr_validation_regardless_of_grade() {
        let plan = planner().plan(&profile(Some("field-ops"), Some(4)), LeaveType::Annual, 45);
        let got: Vec<ApproverRole> =
            plan.levels.into_iter().map(|l| l.approver_role).collect();
        assert!(got.contains(&ApproverRole::HrOfficer));
    }

    #[test]
    fn clearance_gated_leave_type_always_gets_hr_validation_before_final() {
        let plan = planner().plan(&profile(Some("field-ops"), Some(4)), LeaveType::Unpaid, 5);
        assert!(plan.requires_external_clearance);
        let got: Vec<ApproverRole> =
            plan.levels.iter().map(|l| l.approver_role).collect();
        let hr = got.iter().position(|r| *r == ApproverRole::HrOfficer).expect("hr level");
        let last = got.len() - 1;
        assert_eq!(got[last], ApproverRole::FinalAuthority);
        assert_eq!(hr, last - 1);
    }

    #[test]
    fn top_of_hierarchy_gets_final_authority_only() {
        let mut top = profile(Some("field-ops"), Some(12));
        top.immediate_supervisor_id = None;
        top.manager_id = None;

        let got = roles(&planner(), &top, LeaveType::Annual);
        assert_eq!(got, vec![ApproverRole::FinalAuthority]);
    }

    #[test]
    fn missing_unit_fails_open_and_omits_middle_tiers() {
        let got = roles(&planner(), &profile(None, Some(5)), LeaveType::Annual);
        assert_eq!(
            got,
            vec![ApproverRole::ImmediateSupervisor, ApproverRole::FinalAuthority]
        );
    }
}
