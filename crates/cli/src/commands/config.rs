use serde::Serialize;

use leavewell_core::config::{AppConfig, LoadOptions, LogFormat};

#[derive(Debug, Serialize)]
struct ConfigReport {
    database_url: String,
    database_max_connections: u32,
    unit_routings: usize,
    hr_unit: Option<String>,
    audit_unit: Option<String>,
    external_clearance_types: Vec<&'static str>,
    hr_review_min_grade: u8,
    hr_review_min_days: u32,
    resubmission_limit: u32,
    escalation_default_threshold_hours: i64,
    escalation_level_overrides: usize,
    logging_level: String,
    logging_format: &'static str,
}

pub fn run() -> String {
    match AppConfig::load(LoadOptions::default()) {
        Ok(config) => {
            let report = ConfigReport {
                database_url: config.database.url.clone(),
                database_max_connections: config.database.max_connections,
                unit_routings: config.workflow.units.len(),
                hr_unit: config.workflow.hr_unit.clone(),
                audit_unit: config.workflow.audit_unit.clone(),
                external_clearance_types: config
                    .workflow
                    .external_clearance_types
                    .iter()
                    .map(|leave_type| leave_type.as_str())
                    .collect(),
                hr_review_min_grade: config.workflow.hr_review_min_grade,
                hr_review_min_days: config.workflow.hr_review_min_days,
                resubmission_limit: config.workflow.resubmission_limit,
                escalation_default_threshold_hours: config.escalation.default.threshold_hours,
                escalation_level_overrides: config.escalation.levels.len(),
                logging_level: config.logging.level.clone(),
                logging_format: match config.logging.format {
                    LogFormat::Compact => "compact",
                    LogFormat::Pretty => "pretty",
                    LogFormat::Json => "json",
                },
            };
            serde_json::to_string_pretty(&report)
                .unwrap_or_else(|error| format!("{{\"error\":\"{error}\"}}"))
        }
        Err(error) => format!("{{\"error\":\"{error}\"}}"),
    }
}
