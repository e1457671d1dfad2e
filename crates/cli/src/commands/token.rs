use chrono::Utc;
use rollwise_core::auth::TokenIssuer;
use rollwise_core::domain::user::{normalize_email, User};
use rollwise_db::connect_with_config;
use rollwise_db::repositories::{SqlUserRepository, UserRepository};

use crate::commands::{
    load_config, runtime, CommandResult, StepError, EXIT_CONFIG, EXIT_DATABASE, EXIT_VERIFICATION,
};

/// Signs a bearer token for an existing, active user. The message carries
/// the token itself.
pub fn run(email: &str) -> CommandResult {
    let email = match normalize_email(email) {
        Ok(email) => email,
        Err(error) => {
            return CommandResult::failure("token", "invalid_input", error.to_string(), EXIT_CONFIG)
        }
    };
    let config = match load_config("token") {
        Ok(config) => config,
        Err(failure) => return failure,
    };
    let runtime = match runtime("token") {
        Ok(runtime) => runtime,
        Err(failure) => return failure,
    };

    let result: Result<User, StepError> = runtime.block_on(async {
        let pool = connect_with_config(&config.database)
            .await
            .map_err(|error| ("db_connectivity", error.to_string(), EXIT_DATABASE))?;
        let users = SqlUserRepository::new(pool.clone());
        let user = users
            .find_by_email(&email)
            .await
            .map_err(|error| ("db_query", error.to_string(), EXIT_DATABASE));
        pool.close().await;

        match user? {
            Some(user) if user.active => Ok(user),
            Some(_) => Err(("user_inactive", format!("user `{email}` is inactive"), EXIT_VERIFICATION)),
            None => Err(("not_found", format!("no user with email `{email}`"), EXIT_VERIFICATION)),
        }
    });

    let user = match result {
        Ok(user) => user,
        Err((error_class, message, exit_code)) => {
            return CommandResult::failure("token", error_class, message, exit_code);
        }
    };

    match TokenIssuer::from_config(&config.auth).issue(&user, Utc::now()) {
        Ok(issued) => CommandResult::success("token", issued.access_token),
        Err(error) => CommandResult::failure("token", "signing", error.to_string(), EXIT_CONFIG),
    }
}
