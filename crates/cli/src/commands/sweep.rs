use chrono::Utc;
use leavewell_core::audit::LoggingAuditSink;
use leavewell_core::compliance::StaticComplianceCheck;
use leavewell_core::config::{AppConfig, LoadOptions};
use leavewell_core::engine::WorkflowEngine;
use leavewell_core::notify::LoggingNotifier;
use leavewell_core::routing::RoutePlanner;
use leavewell_db::{connect_with_settings, migrations, SqlRecordStore};

use crate::commands::{runtime, CommandResult};

/// Runs the escalation evaluator once over every pending step. Intended to
/// be invoked from cron or a scheduler.
pub fn run() -> CommandResult {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => {
            return CommandResult::failure(
                "sweep",
                "config_validation",
                format!("configuration issue: {error}"),
                2,
            );
        }
    };

    let runtime = match runtime() {
        Ok(runtime) => runtime,
        Err(error) => {
            return CommandResult::failure(
                "sweep",
                "runtime_init",
                format!("failed to initialize async runtime: {error}"),
                3,
            );
        }
    };

    let result = runtime.block_on(async {
        let pool = connect_with_settings(
            &config.database.url,
            config.database.max_connections,
            config.database.timeout_secs,
        )
        .await
        .map_err(|error| ("db_connectivity", error.to_string(), 4u8))?;
        migrations::run_pending(&pool)
            .await
            .map_err(|error| ("migration", error.to_string(), 5u8))?;

        let engine = WorkflowEngine::new(
            SqlRecordStore::new(pool.clone()),
            LoggingNotifier,
            LoggingAuditSink,
            StaticComplianceCheck::allowing(),
            RoutePlanner::new(config.workflow.directory(), config.workflow.rules()),
            config.escalation.policy(),
        );
        let outcome = engine
            .sweep(Utc::now())
            .await
            .map_err(|error| ("sweep_execution", error.to_string(), 5u8))?;

        pool.close().await;
        Ok::<_, (&'static str, String, u8)>(outcome)
    });

    match result {
        Ok(outcome) => CommandResult::success(
            "sweep",
            format!(
                "evaluated {} step(s): {} auto-approved, {} escalated",
                outcome.evaluated,
                outcome.auto_approved.len(),
                outcome.escalated.len()
            ),
        ),
        Err((error_class, message, exit_code)) => {
            CommandResult::failure("sweep", error_class, message, exit_code)
        }
    }
}
