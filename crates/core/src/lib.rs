pub mod audit;
pub mod compliance;
pub mod config;
pub mod domain;
pub mod engine;
pub mod errors;
pub mod escalation;
pub mod flows;
pub mod hierarchy;
pub mod notify;
pub mod resolve;
pub mod resubmit;
pub mod routing;
pub mod store;

pub use audit::{AuditError, AuditRecord, AuditSink, InMemoryAuditSink, LoggingAuditSink};
pub use compliance::{ComplianceCheck, Eligibility, StaticComplianceCheck};
pub use domain::acting::{ActingAppointment, ActingAppointmentId};
pub use domain::delegation::{ApprovalDelegation, DelegationId, DelegationStatus};
pub use domain::request::{
    ClearanceStatus, LeaveRequest, LeaveRequestId, LeaveType, RequestStatus,
};
pub use domain::staff::{OrgScope, Person, StaffId, StaffOrgProfile};
pub use domain::step::{ApprovalStep, ApproverRole, StepStatus};
pub use engine::{
    DecisionOutcome, NewLeaveRequest, StatusReport, StepBrief, SubmissionReceipt, SweepOutcome,
    WorkflowEngine,
};
pub use errors::WorkflowError;
pub use escalation::{EscalationPolicy, LevelSla, SweepAction};
pub use flows::{Decision, ForcedStatus};
pub use hierarchy::{OrgDirectory, UnitRouting};
pub use notify::{InMemoryNotifier, LoggingNotifier, Notification, Notifier, NotifyError};
pub use resolve::{resolve_approver, ResolutionContext, ResolutionPath, ResolvedApprover};
pub use routing::{PlannedLevel, RoutePlan, RoutePlanner, WorkflowRules};
pub use store::{
    InMemoryRecordStore, RecordStore, RequestFilter, RequestRecord, StepGuard, StoreError,
};
