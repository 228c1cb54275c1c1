use serde::Serialize;

use leavewell_core::config::{AppConfig, LoadOptions};
use leavewell_db::{connect_with_settings, migrations};

use crate::commands::runtime;

#[derive(Debug, Serialize)]
struct DoctorCheck {
    name: &'static str,
    passed: bool,
    detail: String,
}

#[derive(Debug, Serialize)]
struct DoctorReport {
    healthy: bool,
    checks: Vec<DoctorCheck>,
}

pub fn run(json: bool) -> String {
    let mut checks = Vec::new();

    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => {
            checks.push(DoctorCheck {
                name: "config",
                passed: true,
                detail: "configuration loads and validates".to_string(),
            });
            Some(config)
        }
        Err(error) => {
            checks.push(DoctorCheck {
                name: "config",
                passed: false,
                detail: error.to_string(),
            });
            None
        }
    };

    if let Some(config) = config {
        match runtime() {
            Ok(runtime) => {
                let db_check: Result<(), String> = runtime.block_on(async {
                    let pool = connect_with_settings(
                        &config.database.url,
                        config.database.max_connections,
                        config.database.timeout_secs,
                    )
                    .await
                    .map_err(|error| error.to_string())?;
                    migrations::run_pending(&pool)
                        .await
                        .map_err(|error| error.to_string())?;
                    pool.close().await;
                    Ok(())
                });
                checks.push(match db_check {
                    Ok(()) => DoctorCheck {
                        name: "database",
                        passed: true,
                        detail: "connected and migrations apply".to_string(),
                    },
                    Err(error) => DoctorCheck {
                        name: "database",
                        passed: false,
                        detail: error,
                    },
                });
            }
            Err(error) => {
                checks.push(DoctorCheck {
                    name: "database",
                    passed: false,
                    detail: format!("async runtime unavailable: {error}"),
                });
            }
        }
    }

    let report = DoctorReport { healthy: checks.iter().all(|check| check.passed), checks };

    if json {
        serde_json::to_string_pretty(&report)
            .unwrap_or_else(|error| format!("{{\"error\":\"{error}\"}}"))
    } else {
        let mut lines = Vec::with_capacity(report.checks.len() + 1);
        for check in &report.checks {
            let marker = if check.passed { "ok" } else { "FAIL" };
            lines.push(format!("[{marker}] {}: {}", check.name, check.detail));
        }
        lines.push(if report.healthy {
            "doctor: healthy".to_string()
        } else {
            "doctor: unhealthy".to_string()
        });
        lines.join("\n")
    }
}
