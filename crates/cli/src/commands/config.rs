use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use rollwise_core::config::{default_config_paths, AppConfig};
use secrecy::{ExposeSecret, SecretString};
use toml::Value;

use crate::commands::{load_config, CommandResult};

/// One reported setting: dotted key, rendered value and the environment
/// variables that can override it.
struct Field {
    key: &'static str,
    value: String,
    env_keys: &'static [&'static str],
}

impl Field {
    fn new(key: &'static str, value: impl Into<String>, env_keys: &'static [&'static str]) -> Self {
        Self { key, value: value.into(), env_keys }
    }
}

pub fn run() -> CommandResult {
    let config = match load_config("config") {
        Ok(config) => config,
        Err(failure) => return failure,
    };

    let config_file_path = detect_config_path();
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];
    for field in fields(&config) {
        let source = field_source(
            field.key,
            field.env_keys,
            config_file_doc.as_ref(),
            config_file_path.as_deref(),
        );
        lines.push(render_line(field.key, &field.value, source));
    }

    CommandResult::success("config", lines.join("\n"))
}

fn fields(config: &AppConfig) -> Vec<Field> {
    vec![
        Field::new("database.url", &config.database.url, &["ROLLWISE_DATABASE_URL"]),
        Field::new(
            "database.max_connections",
            config.database.max_connections.to_string(),
            &["ROLLWISE_DATABASE_MAX_CONNECTIONS"],
        ),
        Field::new(
            "database.timeout_secs",
            config.database.timeout_secs.to_string(),
            &["ROLLWISE_DATABASE_TIMEOUT_SECS"],
        ),
        Field::new("llm.provider", format!("{:?}", config.llm.provider), &["ROLLWISE_LLM_PROVIDER"]),
        Field::new("llm.model", &config.llm.model, &["ROLLWISE_LLM_MODEL"]),
        Field::new(
            "llm.base_url",
            config.llm.base_url.as_deref().unwrap_or("<unset>"),
            &["ROLLWISE_LLM_BASE_URL"],
        ),
        Field::new("llm.api_key", redact_optional(config.llm.api_key.as_ref()), &["ROLLWISE_LLM_API_KEY"]),
        Field::new(
            "llm.max_tool_rounds",
            config.llm.max_tool_rounds.to_string(),
            &["ROLLWISE_LLM_MAX_TOOL_ROUNDS"],
        ),
        Field::new(
            "telephony.account_sid",
            config.telephony.account_sid.as_deref().unwrap_or("<unset>"),
            &["ROLLWISE_TWILIO_ACCOUNT_SID"],
        ),
        Field::new(
            "telephony.auth_token",
            redact_optional(config.telephony.auth_token.as_ref()),
            &["ROLLWISE_TWILIO_AUTH_TOKEN"],
        ),
        Field::new(
            "telephony.public_base_url",
            config.telephony.public_base_url.as_deref().unwrap_or("<unset>"),
            &["ROLLWISE_PUBLIC_BASE_URL"],
        ),
        Field::new(
            "telephony.validate_signatures",
            config.telephony.validate_signatures.to_string(),
            &["ROLLWISE_TWILIO_VALIDATE_SIGNATURES"],
        ),
        Field::new(
            "calendar.provider",
            format!("{:?}", config.calendar.provider),
            &["ROLLWISE_CALENDAR_PROVIDER"],
        ),
        Field::new(
            "calendar.service_account_email",
            config.calendar.service_account_email.as_deref().unwrap_or("<unset>"),
            &["ROLLWISE_CALENDAR_SERVICE_ACCOUNT_EMAIL"],
        ),
        Field::new(
            "calendar.private_key",
            redact_optional(config.calendar.private_key.as_ref()),
            &["ROLLWISE_CALENDAR_PRIVATE_KEY"],
        ),
        Field::new("auth.jwt_secret", redact(&config.auth.jwt_secret), &["ROLLWISE_AUTH_JWT_SECRET"]),
        Field::new(
            "auth.token_ttl_minutes",
            config.auth.token_ttl_minutes.to_string(),
            &["ROLLWISE_AUTH_TOKEN_TTL_MINUTES"],
        ),
        Field::new(
            "server.bind_address",
            &config.server.bind_address,
            &["ROLLWISE_SERVER_BIND_ADDRESS"],
        ),
        Field::new("server.port", config.server.port.to_string(), &["ROLLWISE_SERVER_PORT"]),
        Field::new(
            "server.health_check_port",
            config.server.health_check_port.to_string(),
            &["ROLLWISE_SERVER_HEALTH_CHECK_PORT"],
        ),
        Field::new(
            "logging.level",
            &config.logging.level,
            &["ROLLWISE_LOGGING_LEVEL", "ROLLWISE_LOG_LEVEL"],
        ),
        Field::new(
            "logging.format",
            format!("{:?}", config.logging.format),
            &["ROLLWISE_LOGGING_FORMAT", "ROLLWISE_LOG_FORMAT"],
        ),
    ]
}

fn detect_config_path() -> Option<PathBuf> {
    default_config_paths().into_iter().find(|path| path.exists())
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_keys: &[&str],
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if let Some(env_key) = env_keys.iter().find(|key| env::var_os(key).is_some()) {
        return format!("env ({env_key})");
    }

    if let Some(doc) = config_file_doc {
        if contains_path(doc, key_path) {
            let file_path = config_file_path
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "config file".to_string());
            return format!("file ({file_path})");
        }
    }

    "default".to_string()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

fn render_line(key: &str, value: &str, source: String) -> String {
    format!("- {key} = {value} (source: {source})")
}

fn redact(secret: &SecretString) -> String {
    if secret.expose_secret().trim().is_empty() {
        "<empty>".to_string()
    } else {
        "<redacted>".to_string()
    }
}

fn redact_optional(secret: Option<&SecretString>) -> String {
    secret.map(redact).unwrap_or_else(|| "<unset>".to_string())
}
