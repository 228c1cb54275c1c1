use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::request::LeaveType;
use crate::domain::step::ApproverRole;
use crate::escalation::{EscalationPolicy, LevelSla};
use crate::hierarchy::{OrgDirectory, UnitRouting};
use crate::routing::WorkflowRules;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub workflow: WorkflowConfig,
    pub escalation: EscalationConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

/// Organizational routing tables plus determination policy. Everything the
/// route planner consults arrives through here.
#[derive(Clone, Debug)]
pub struct WorkflowConfig {
    pub units: Vec<UnitRouting>,
    pub hr_unit: Option<String>,
    pub audit_unit: Option<String>,
    pub external_clearance_types: Vec<LeaveType>,
    pub hr_review_min_grade: u8,
    pub hr_review_min_days: u32,
    pub resubmission_limit: u32,
}

impl WorkflowConfig {
    pub fn directory(&self) -> OrgDirectory {
        OrgDirectory::new(self.units.clone(), self.hr_unit.clone(), self.audit_unit.clone())
    }

    pub fn rules(&self) -> WorkflowRules {
        WorkflowRules {
            external_clearance_types: self.external_clearance_types.clone(),
            hr_review_min_grade: self.hr_review_min_grade,
            hr_review_min_days: self.hr_review_min_days,
            resubmission_limit: self.resubmission_limit,
        }
    }
}

#[derive(Clone, Debug)]
pub struct EscalationConfig {
    pub default: SlaEntry,
    pub levels: Vec<RoleSlaEntry>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SlaEntry {
    pub threshold_hours: i64,
    pub auto_approve: bool,
    pub escalate_to: Option<ApproverRole>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RoleSlaEntry {
    pub role: ApproverRole,
    pub threshold_hours: i64,
    pub auto_approve: bool,
    pub escalate_to: Option<ApproverRole>,
}

impl EscalationConfig {
    pub fn policy(&self) -> EscalationPolicy {
        let default = LevelSla {
            threshold_hours: self.default.threshold_hours,
            auto_approve: self.default.auto_approve,
            escalate_to: self.default.escalate_to,
        };
        let overrides: HashMap<ApproverRole, LevelSla> = self
            .levels
            .iter()
            .map(|entry| {
                (
                    entry.role,
                    LevelSla {
                        threshold_hours: entry.threshold_hours,
                        auto_approve: entry.auto_approve,
                        escalate_to: entry.escalate_to,
                    },
                )
            })
            .collect();
        EscalationPolicy::new(default, overrides)
    }
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub database_url: Option<String>,
    pub log_level: Option<String>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "sqlite://leavewell.db".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
            workflow: WorkflowConfig {
                units: Vec::new(),
                hr_unit: None,
                audit_unit: None,
                external_clearance_types: vec![LeaveType::Unpaid, LeaveType::Study],
                hr_review_min_grade: 7,
                hr_review_min_days: 30,
                resubmission_limit: 3,
            },
            escalation: EscalationConfig {
                default: SlaEntry {
                    threshold_hours: 72,
                    auto_approve: false,
                    escalate_to: Some(ApproverRole::FinalAuthority),
                },
                levels: Vec::new(),
            },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch)?;
        } else if options.require_file {
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("leavewell.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) -> Result<(), ConfigError> {
        if let Some(database) = patch.database {
            if let Some(url) = database.url {
                self.database.url = url;
            }
            if let Some(max_connections) = database.max_connections {
                self.database.max_connections = max_connections;
            }
            if let Some(timeout_secs) = database.timeout_secs {
                self.database.timeout_secs = timeout_secs;
            }
        }

        if let Some(workflow) = patch.workflow {
            if let Some(units) = workflow.units {
                self.workflow.units = units;
            }
            if let Some(hr_unit) = workflow.hr_unit {
                self.workflow.hr_unit = Some(hr_unit);
            }
            if let Some(audit_unit) = workflow.audit_unit {
                self.workflow.audit_unit = Some(audit_unit);
            }
            if let Some(raw_types) = workflow.external_clearance_types {
                let mut parsed = Vec::with_capacity(raw_types.len());
                for raw in raw_types {
                    let leave_type = LeaveType::parse(&raw).ok_or_else(|| {
                        ConfigError::Validation(format!(
                            "unknown leave type `{raw}` in workflow.external_clearance_types"
                        ))
                    })?;
                    parsed.push(leave_type);
                }
                self.workflow.external_clearance_types = parsed;
            }
            if let Some(grade) = workflow.hr_review_min_grade {
                self.workflow.hr_review_min_grade = grade;
            }
            if let Some(days) = workflow.hr_review_min_days {
                self.workflow.hr_review_min_days = days;
            }
            if let Some(limit) = workflow.resubmission_limit {
                self.workflow.resubmission_limit = limit;
            }
        }

        if let Some(escalation) = patch.escalation {
            if let Some(default) = escalation.default {
                if let Some(threshold_hours) = default.threshold_hours {
                    self.escalation.default.threshold_hours = threshold_hours;
                }
                if let Some(auto_approve) = default.auto_approve {
                    self.escalation.default.auto_approve = auto_approve;
                }
                if let Some(escalate_to) = default.escalate_to {
                    self.escalation.default.escalate_to = parse_role(&escalate_to)?;
                }
            }
            if let Some(levels) = escalation.levels {
                let mut parsed = Vec::with_capacity(levels.len());
                for level in levels {
                    let role = parse_role(&level.role)?.ok_or_else(|| {
                        ConfigError::Validation(
                            "escalation.levels entries require a role".to_string(),
                        )
                    })?;
                    let escalate_to = match level.escalate_to {
                        Some(raw) => parse_role(&raw)?,
                        None => self.escalation.default.escalate_to,
                    };
                    parsed.push(RoleSlaEntry {
                        role,
                        threshold_hours: level
                            .threshold_hours
                            .unwrap_or(self.escalation.default.threshold_hours),
                        auto_approve: level
                            .auto_approve
                            .unwrap_or(self.escalation.default.auto_approve),
                        escalate_to,
                    });
                }
                self.escalation.levels = parsed;
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }

        Ok(())
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("LEAVEWELL_DATABASE_URL") {
            self.database.url = value;
        }
        if let Some(value) = read_env("LEAVEWELL_DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections =
                parse_u32("LEAVEWELL_DATABASE_MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = read_env("LEAVEWELL_DATABASE_TIMEOUT_SECS") {
            self.database.timeout_secs = parse_u64("LEAVEWELL_DATABASE_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("LEAVEWELL_HR_REVIEW_MIN_GRADE") {
            self.workflow.hr_review_min_grade =
                parse_u8("LEAVEWELL_HR_REVIEW_MIN_GRADE", &value)?;
        }
        if let Some(value) = read_env("LEAVEWELL_RESUBMISSION_LIMIT") {
            self.workflow.resubmission_limit = parse_u32("LEAVEWELL_RESUBMISSION_LIMIT", &value)?;
        }

        let log_level =
            read_env("LEAVEWELL_LOGGING_LEVEL").or_else(|| read_env("LEAVEWELL_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("LEAVEWELL_LOGGING_FORMAT").or_else(|| read_env("LEAVEWELL_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(database_url) = overrides.database_url {
            self.database.url = database_url;
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_database(&self.database)?;
        validate_workflow(&self.workflow)?;
        validate_escalation(&self.escalation)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("leavewell.toml"), PathBuf::from("config/leavewell.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn parse_role(raw: &str) -> Result<Option<ApproverRole>, ConfigError> {
    if raw.trim().is_empty() {
        return Ok(None);
    }
    ApproverRole::parse(raw)
        .map(Some)
        .ok_or_else(|| ConfigError::Validation(format!("unknown approver role `{raw}`")))
}

fn validate_database(database: &DatabaseConfig) -> Result<(), ConfigError> {
    let url = database.url.trim();
    let sqlite_url =
        url.starts_with("sqlite://") || url.starts_with("sqlite::") || url == ":memory:";
    if !sqlite_url {
        return Err(ConfigError::Validation(
            "database.url must be a sqlite URL (`sqlite://...`, `sqlite::...`, or `:memory:`)"
                .to_string(),
        ));
    }

    if database.max_connections == 0 {
        return Err(ConfigError::Validation(
            "database.max_connections must be greater than zero".to_string(),
        ));
    }

    if database.timeout_secs == 0 || database.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "database.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    Ok(())
}

fn validate_workflow(workflow: &WorkflowConfig) -> Result<(), ConfigError> {
    if workflow.resubmission_limit == 0 || workflow.resubmission_limit > 10 {
        return Err(ConfigError::Validation(
            "workflow.resubmission_limit must be in range 1..=10".to_string(),
        ));
    }
    if workflow.hr_review_min_days == 0 {
        return Err(ConfigError::Validation(
            "workflow.hr_review_min_days must be greater than zero".to_string(),
        ));
    }
    let mut seen = std::collections::HashSet::new();
    for routing in &workflow.units {
        let key = routing.unit.trim().to_ascii_lowercase();
        if key.is_empty() {
            return Err(ConfigError::Validation(
                "workflow.units entries require a unit name".to_string(),
            ));
        }
        if !seen.insert(key) {
            return Err(ConfigError::Validation(format!(
                "workflow.units lists unit `{}` more than once",
                routing.unit
            )));
        }
    }
    Ok(())
}

fn validate_escalation(escalation: &EscalationConfig) -> Result<(), ConfigError> {
    if escalation.default.threshold_hours <= 0 {
        return Err(ConfigError::Validation(
            "escalation.default.threshold_hours must be greater than zero".to_string(),
        ));
    }
    for level in &escalation.levels {
        if level.threshold_hours <= 0 {
            return Err(ConfigError::Validation(format!(
                "escalation threshold for role `{}` must be greater than zero",
                level.role
            )));
        }
    }
    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_u8(key: &str, value: &str) -> Result<u8, ConfigError> {
    value.parse::<u8>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u32(key: &str, value: &str) -> Result<u32, ConfigError> {
    value.parse::<u32>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.parse::<u64>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    database: Option<DatabasePatch>,
    workflow: Option<WorkflowPatch>,
    escalation: Option<EscalationPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabasePatch {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct WorkflowPatch {
    units: Option<Vec<UnitRouting>>,
    hr_unit: Option<String>,
    audit_unit: Option<String>,
    external_clearance_types: Option<Vec<String>>,
    hr_review_min_grade: Option<u8>,
    hr_review_min_days: Option<u32>,
    resubmission_limit: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct EscalationPatch {
    default: Option<SlaPatch>,
    levels: Option<Vec<RoleSlaPatch>>,
}

#[derive(Debug, Default, Deserialize)]
struct SlaPatch {
    threshold_hours: Option<i64>,
    auto_approve: Option<bool>,
    escalate_to: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct RoleSlaPatch {
    role: String,
    threshold_hours: Option<i64>,
    auto_approve: Option<bool>,
    escalate_to: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}
