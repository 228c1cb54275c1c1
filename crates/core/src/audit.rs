use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::domain::request::LeaveRequestId;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("audit sink error: {0}")]
pub struct AuditError(pub String);

/// One audit record per state transition. Failure to record is surfaced as a
/// warning by the caller and never rolls the transition back.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub record_id: String,
    pub action: String,
    pub actor: String,
    pub subject: LeaveRequestId,
    pub details: BTreeMap<String, String>,
    pub occurred_at: DateTime<Utc>,
}

impl AuditRecord {
    pub fn new(
        action: impl Into<String>,
        actor: impl Into<String>,
        subject: LeaveRequestId,
    ) -> Self {
        Self {
            record_id: Uuid::new_v4().to_string(),
            action: action.into(),
            actor: actor.into(),
            subject,
            details: BTreeMap::new(),
            occurred_at: Utc::now(),
        }
    }

    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.details.insert(key.into(), value.into());
        self
    }
}

pub trait AuditSink: Send + Sync {
    fn record(&self, record: AuditRecord) -> Result<(), AuditError>;
}

#[derive(Clone, Default)]
pub struct InMemoryAuditSink {
    records: Arc<Mutex<Vec<AuditRecord>>>,
}

impl InMemoryAuditSink {
    pub fn records(&self) -> Vec<AuditRecord> {
        match self.records.lock() {
            Ok(records) => records.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl AuditSink for InMemoryAuditSink {
    fn record(&self, record: AuditRecord) -> Result<(), AuditError> {
        match self.records.lock() {
            Ok(mut records) => records.push(record),
            Err(poisoned) => poisoned.into_inner().push(record),
        }
        Ok(())
    }
}

/// Sink that only logs; useful for tooling where no audit store is wired up.
#[derive(Clone, Copy, Debug, Default)]
pub struct LoggingAuditSink;

impl AuditSink for LoggingAuditSink {
    fn record(&self, record: AuditRecord) -> Result<(), AuditError> {
        tracing::info!(
            event_name = "audit.recorded",
            action = %record.action,
            actor = %record.actor,
            subject = %record.subject,
            "audit record"
        );
        Ok(())
    }
}
