use std::env;
use std::sync::{Mutex, OnceLock};

use rollwise_cli::commands::{config, doctor, migrate, seed, start, token};
use rollwise_core::auth::TokenIssuer;
use serde_json::Value;

const SECRET: &str = "cli-test-secret-0123456789";

fn valid_env() -> Vec<(&'static str, String)> {
    vec![
        ("ROLLWISE_AUTH_JWT_SECRET", SECRET.to_string()),
        ("ROLLWISE_DATABASE_URL", "sqlite::memory:".to_string()),
    ]
}

#[test]
fn start_returns_success_with_valid_env() {
    with_env(&valid_env(), || {
        let result = start::run();
        assert_eq!(result.exit_code, 0, "expected successful start preflight");

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "start");
        assert_eq!(payload["status"], "ok");
    });
}

#[test]
fn start_returns_config_failure_without_signing_secret() {
    with_env(&[], || {
        let result = start::run();
        assert_eq!(result.exit_code, 2, "expected config validation failure code");

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "start");
        assert_eq!(payload["status"], "error");
        assert_eq!(payload["error_class"], "config_validation");
    });
}

#[test]
fn migrate_returns_success_with_valid_env() {
    with_env(&valid_env(), || {
        let result = migrate::run();
        assert_eq!(result.exit_code, 0, "expected successful migrate run");

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "migrate");
        assert_eq!(payload["status"], "ok");
    });
}

#[test]
fn seed_reports_the_demo_tenant_and_is_repeatable() {
    with_env(&valid_env(), || {
        let first = seed::run();
        assert_eq!(first.exit_code, 0, "expected seed success");
        let first_payload = parse_payload(&first.output);
        assert_eq!(first_payload["status"], "ok");
        let message = first_payload["message"].as_str().unwrap_or_default();
        assert!(message.contains("agent-demo-pizzeria"));
        assert!(message.contains("+15550001000"));

        let second = seed::run();
        assert_eq!(second.exit_code, 0, "expected second seed success");
        assert_eq!(parse_payload(&second.output)["message"], first_payload["message"]);
    });
}

#[test]
fn config_attributes_sources_and_redacts_secrets() {
    with_env(&valid_env(), || {
        let result = config::run();
        assert_eq!(result.exit_code, 0);

        let payload = parse_payload(&result.output);
        let message = payload["message"].as_str().unwrap_or_default();
        assert!(!message.contains(SECRET));
        assert!(message
            .contains("- auth.jwt_secret = <redacted> (source: env (ROLLWISE_AUTH_JWT_SECRET))"));
        assert!(message.contains("- server.port = 8000 (source: default)"));
    });
}

#[test]
fn doctor_passes_with_valid_env_and_fails_without_config() {
    with_env(&valid_env(), || {
        let result = doctor::run(true);
        assert_eq!(result.exit_code, 0);

        let report: Value = serde_json::from_str(&result.output).expect("doctor json");
        assert_eq!(report["overall_status"], "pass");
        let names = report["checks"]
            .as_array()
            .expect("checks")
            .iter()
            .map(|check| check["name"].as_str().unwrap_or_default().to_string())
            .collect::<Vec<_>>();
        assert_eq!(
            names,
            [
                "config_validation",
                "auth_secret",
                "llm_readiness",
                "calendar_readiness",
                "database_connectivity"
            ]
        );
    });

    with_env(&[], || {
        let result = doctor::run(false);
        assert_eq!(result.exit_code, 6);
        assert!(result.output.starts_with("doctor: one or more readiness checks failed"));
        assert!(result.output.contains("- [skip] database_connectivity"));
    });
}

#[test]
fn token_is_issued_for_a_seeded_user_only() {
    let directory = tempfile::tempdir().expect("tempdir");
    let database_url = format!("sqlite://{}", directory.path().join("rollwise.db").display());
    let vars = vec![
        ("ROLLWISE_AUTH_JWT_SECRET", SECRET.to_string()),
        ("ROLLWISE_DATABASE_URL", database_url),
    ];

    with_env(&vars, || {
        assert_eq!(seed::run().exit_code, 0, "seed the demo owner");

        let result = token::run("Owner@Demo.Rollwise.dev");
        assert_eq!(result.exit_code, 0, "expected token for the demo owner");
        let payload = parse_payload(&result.output);
        let access_token = payload["message"].as_str().expect("token");
        let claims = TokenIssuer::new(SECRET.as_bytes(), 300).verify(access_token).expect("verify");
        assert_eq!(claims.sub, "user-demo-owner");

        let missing = token::run("nobody@example.com");
        assert_eq!(missing.exit_code, 6);
        assert_eq!(parse_payload(&missing.output)["error_class"], "not_found");
    });
}

fn parse_payload(output: &str) -> Value {
    serde_json::from_str(output).expect("command output should be valid JSON")
}

fn with_env(vars: &[(&str, String)], test_fn: impl FnOnce()) {
    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    let _guard =
        ENV_LOCK.get_or_init(|| Mutex::new(())).lock().expect("env mutex should not be poisoned");

    let keys = [
        "ROLLWISE_DATABASE_URL",
        "ROLLWISE_DATABASE_MAX_CONNECTIONS",
        "ROLLWISE_DATABASE_TIMEOUT_SECS",
        "ROLLWISE_AUTH_JWT_SECRET",
        "ROLLWISE_AUTH_TOKEN_TTL_MINUTES",
        "ROLLWISE_LLM_PROVIDER",
        "ROLLWISE_LLM_API_KEY",
        "ROLLWISE_LLM_BASE_URL",
        "ROLLWISE_LLM_MODEL",
        "ROLLWISE_LLM_TIMEOUT_SECS",
        "ROLLWISE_LLM_MAX_RETRIES",
        "ROLLWISE_LLM_MAX_TOOL_ROUNDS",
        "ROLLWISE_CALENDAR_PROVIDER",
        "ROLLWISE_CALENDAR_SERVICE_ACCOUNT_EMAIL",
        "ROLLWISE_CALENDAR_PRIVATE_KEY",
        "ROLLWISE_TWILIO_AUTH_TOKEN",
        "ROLLWISE_TWILIO_VALIDATE_SIGNATURES",
        "ROLLWISE_PUBLIC_BASE_URL",
        "ROLLWISE_SERVER_BIND_ADDRESS",
        "ROLLWISE_SERVER_PORT",
        "ROLLWISE_SERVER_HEALTH_CHECK_PORT",
        "ROLLWISE_SERVER_GRACEFUL_SHUTDOWN_SECS",
        "ROLLWISE_LOGGING_LEVEL",
        "ROLLWISE_LOGGING_FORMAT",
        "ROLLWISE_LOG_LEVEL",
        "ROLLWISE_LOG_FORMAT",
    ];

    let previous_values: Vec<(&str, Option<String>)> =
        keys.iter().map(|key| (*key, env::var(key).ok())).collect();

    for key in &keys {
        env::remove_var(key);
    }
    for (key, value) in vars {
        env::set_var(key, value);
    }

    test_fn();

    for (key, value) in previous_values {
        if let Some(value) = value {
            env::set_var(key, value);
        } else {
            env::remove_var(key);
        }
    }
}
