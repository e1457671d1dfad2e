use rollwise_core::config::{AppConfig, CalendarProvider, LlmProvider, LoadOptions};
use rollwise_db::{connect_with_config, migrations};
use secrecy::ExposeSecret;
use serde::Serialize;

use crate::commands::{CommandResult, EXIT_VERIFICATION};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum CheckStatus {
    Pass,
    Fail,
    Skipped,
}

#[derive(Debug, Serialize)]
struct DoctorCheck {
    name: &'static str,
    status: CheckStatus,
    details: String,
}

impl DoctorCheck {
    fn pass(name: &'static str, details: impl Into<String>) -> Self {
        Self { name, status: CheckStatus::Pass, details: details.into() }
    }

    fn fail(name: &'static str, details: impl Into<String>) -> Self {
        Self { name, status: CheckStatus::Fail, details: details.into() }
    }

    fn skipped(name: &'static str, details: impl Into<String>) -> Self {
        Self { name, status: CheckStatus::Skipped, details: details.into() }
    }
}

#[derive(Debug, Serialize)]
struct DoctorReport {
    overall_status: CheckStatus,
    summary: String,
    checks: Vec<DoctorCheck>,
}

const CHECKS_AFTER_CONFIG: [&str; 4] =
    ["auth_secret", "llm_readiness", "calendar_readiness", "database_connectivity"];

pub fn run(json_output: bool) -> CommandResult {
    let report = build_report();
    let exit_code = if report.overall_status == CheckStatus::Fail { EXIT_VERIFICATION } else { 0 };

    let output = if json_output {
        serde_json::to_string_pretty(&report).unwrap_or_else(|error| {
            format!(
                "{{\"overall_status\":\"fail\",\"summary\":\"doctor serialization failed\",\"error\":\"{}\"}}",
                escape_json(&error.to_string())
            )
        })
    } else {
        render_human(&report)
    };
    CommandResult { exit_code, output }
}

fn build_report() -> DoctorReport {
    let mut checks = Vec::new();

    match AppConfig::load(LoadOptions::default()) {
        Ok(config) => {
            checks.push(DoctorCheck::pass("config_validation", "configuration loaded and validated"));
            checks.push(check_auth_secret(&config));
            checks.push(check_llm(&config));
            checks.push(check_calendar(&config));
            checks.push(check_database(&config));
        }
        Err(error) => {
            checks.push(DoctorCheck::fail("config_validation", error.to_string()));
            for name in CHECKS_AFTER_CONFIG {
                checks.push(DoctorCheck::skipped(name, "skipped because configuration did not load"));
            }
        }
    }

    let failed = checks.iter().any(|check| check.status == CheckStatus::Fail);
    let overall_status = if failed { CheckStatus::Fail } else { CheckStatus::Pass };
    let summary = if failed {
        "doctor: one or more readiness checks failed".to_string()
    } else {
        "doctor: all readiness checks passed".to_string()
    };

    DoctorReport { overall_status, summary, checks }
}

fn check_auth_secret(config: &AppConfig) -> DoctorCheck {
    let length = config.auth.jwt_secret.expose_secret().len();
    DoctorCheck::pass(
        "auth_secret",
        format!("{length} byte signing secret, tokens live {} minutes", config.auth.token_ttl_minutes),
    )
}

fn check_llm(config: &AppConfig) -> DoctorCheck {
    let llm = &config.llm;
    match llm.provider {
        LlmProvider::OpenAi if llm.api_key.is_none() => {
            DoctorCheck::fail("llm_readiness", "openai provider has no api key")
        }
        LlmProvider::OpenAi => DoctorCheck::pass(
            "llm_readiness",
            format!("openai model `{}`, up to {} tool rounds", llm.model, llm.max_tool_rounds),
        ),
        LlmProvider::Ollama => DoctorCheck::pass(
            "llm_readiness",
            format!(
                "ollama model `{}` at {}",
                llm.model,
                llm.base_url.as_deref().unwrap_or("<unset>")
            ),
        ),
    }
}

fn check_calendar(config: &AppConfig) -> DoctorCheck {
    let calendar = &config.calendar;
    match calendar.provider {
        CalendarProvider::Disabled => DoctorCheck::skipped(
            "calendar_readiness",
            "calendar provider disabled; bookings are kept in process memory",
        ),
        CalendarProvider::Google => match calendar.service_account_email.as_deref() {
            Some(account) if calendar.private_key.is_some() => DoctorCheck::pass(
                "calendar_readiness",
                format!("google service account `{account}` via {}", calendar.api_base_url),
            ),
            _ => DoctorCheck::fail(
                "calendar_readiness",
                "google provider needs a service account email and private key",
            ),
        },
    }
}

fn check_database(config: &AppConfig) -> DoctorCheck {
    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            return DoctorCheck::fail(
                "database_connectivity",
                format!("failed to initialize async runtime: {error}"),
            );
        }
    };

    let result = runtime.block_on(async {
        let pool = connect_with_config(&config.database)
            .await
            .map_err(|error| format!("failed to connect to database: {error}"))?;
        let pending = migrations::pending_count(&pool).await;
        pool.close().await;
        pending.map_err(|error| format!("could not inspect migrations: {error}"))
    });

    match result {
        Ok(0) => DoctorCheck::pass(
            "database_connectivity",
            format!("connected using `{}`, schema up to date", config.database.url),
        ),
        Ok(pending) => DoctorCheck::pass(
            "database_connectivity",
            format!(
                "connected using `{}`, {pending} migration(s) pending (run `rollwise migrate`)",
                config.database.url
            ),
        ),
        Err(error) => DoctorCheck::fail("database_connectivity", error),
    }
}

fn render_human(report: &DoctorReport) -> String {
    let mut lines = Vec::new();
    lines.push(report.summary.clone());

    for check in &report.checks {
        let marker = match check.status {
            CheckStatus::Pass => "ok",
            CheckStatus::Fail => "fail",
            CheckStatus::Skipped => "skip",
        };
        lines.push(format!("- [{marker}] {}: {}", check.name, check.details));
    }

    lines.join("\n")
}

fn escape_json(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}
