//! Dashboard authentication.
//!
//! Routes:
//! - `POST /auth/login`  - sign in (user is created on first login), returns a bearer token
//! - `GET  /auth/me`     - current user
//! - `PUT  /auth/me`     - update name / phone number

use axum::{
    extract::{FromRequestParts, State},
    http::{header, request::Parts, HeaderMap},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use rollwise_core::domain::user::{User, UserLogin};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::ApiError;
use crate::state::AppState;

/// The signed-in, active user making the request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CurrentUser(pub User);

impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let token = bearer_token(&parts.headers)
            .ok_or_else(|| ApiError::unauthorized("Missing bearer token"))?;
        let claims = state.tokens.verify(token).map_err(|error| {
            warn!(event_name = "auth.token_rejected", error = %error, "bearer token rejected");
            ApiError::unauthorized("Invalid or expired token")
        })?;

        let user = state
            .users
            .find_by_id(&claims.user_id())
            .await?
            .ok_or_else(|| ApiError::unauthorized("Invalid or expired token"))?;
        if !user.active {
            return Err(ApiError::forbidden("User account is inactive"));
        }
        Ok(Self(user))
    }
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then_some(token)
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub access_token: String,
    pub token_type: &'static str,
    pub expires_in: i64,
    pub user: User,
}

#[derive(Debug, Default, Deserialize)]
pub struct ProfileUpdate {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub phone_number: Option<String>,
}

pub fn router() -> Router<AppState> {
    Router::new().route("/auth/login", post(login)).route("/auth/me", get(me).put(update_me))
}

pub async fn login(
    State(state): State<AppState>,
    Json(body): Json<UserLogin>,
) -> Result<Json<LoginResponse>, ApiError> {
    let email = body.normalized_email()?;
    let user = state
        .users
        .upsert_by_email(&email, &body.display_name(), body.auth_subject.as_deref())
        .await?;
    if !user.active {
        return Err(ApiError::forbidden("User account is inactive"));
    }

    let token = state.tokens.issue(&user, Utc::now()).map_err(|error| {
        warn!(event_name = "auth.token_failed", error = %error, "token signing failed");
        ApiError::internal("could not issue token")
    })?;
    info!(event_name = "auth.login", user_id = %user.id.0, "user signed in");

    Ok(Json(LoginResponse {
        access_token: token.access_token,
        token_type: "bearer",
        expires_in: token.expires_in,
        user,
    }))
}

pub async fn me(CurrentUser(user): CurrentUser) -> Json<User> {
    Json(user)
}

pub async fn update_me(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Json(body): Json<ProfileUpdate>,
) -> Result<Json<User>, ApiError> {
    let name = body.name.as_deref().map(str::trim);
    if name.is_some_and(str::is_empty) {
        return Err(ApiError::bad_request("name must not be empty"));
    }
    let phone_number = body.phone_number.as_deref().map(str::trim);

    let updated = state
        .users
        .update_profile(&user.id, name, phone_number)
        .await?
        .ok_or_else(|| ApiError::not_found("User not found"))?;
    Ok(Json(updated))
}

#[cfg(test)]
mod tests {
    use axum::{
        extract::{FromRequestParts, State},
        http::{Request, StatusCode},
        Json,
    };
    use chrono::Utc;
    use rollwise_core::domain::user::UserLogin;

    use super::{login, update_me, CurrentUser, ProfileUpdate};
    use crate::state::testing::harness;

    fn parts(authorization: Option<&str>) -> axum::http::request::Parts {
        let mut builder = Request::builder().uri("/auth/me");
        if let Some(value) = authorization {
            builder = builder.header("authorization", value);
        }
        builder.body(()).expect("request").into_parts().0
    }

    #[tokio::test]
    async fn login_creates_user_and_token_authenticates() {
        let harness = harness(Vec::new()).await;

        let Json(response) = login(
            State(harness.state.clone()),
            Json(UserLogin {
                email: " Dana@Example.com ".into(),
                name: None,
                auth_subject: Some("auth0|42".into()),
            }),
        )
        .await
        .expect("login");

        assert_eq!(response.token_type, "bearer");
        assert_eq!(response.expires_in, 300 * 60);
        assert_eq!(response.user.email, "dana@example.com");
        assert_eq!(response.user.name, "Dana");

        let header = format!("Bearer {}", response.access_token);
        let CurrentUser(user) =
            CurrentUser::from_request_parts(&mut parts(Some(&header)), &harness.state)
                .await
                .expect("authenticated");
        assert_eq!(user.id, response.user.id);
    }

    #[tokio::test]
    async fn missing_or_bad_tokens_are_unauthorized() {
        let harness = harness(Vec::new()).await;

        let missing = CurrentUser::from_request_parts(&mut parts(None), &harness.state)
            .await
            .expect_err("missing");
        assert_eq!(missing.status, StatusCode::UNAUTHORIZED);

        let garbage =
            CurrentUser::from_request_parts(&mut parts(Some("Bearer nope")), &harness.state)
                .await
                .expect_err("garbage");
        assert_eq!(garbage.status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn inactive_users_are_forbidden() {
        let harness = harness(Vec::new()).await;
        let CurrentUser(user) = harness.user("gone@example.com").await;
        sqlx::query("UPDATE users SET active = 0 WHERE id = ?")
            .bind(&user.id.0)
            .execute(&harness.pool)
            .await
            .expect("deactivate");

        let token = harness.state.tokens.issue(&user, Utc::now()).expect("token");
        let header = format!("Bearer {}", token.access_token);
        let error = CurrentUser::from_request_parts(&mut parts(Some(&header)), &harness.state)
            .await
            .expect_err("inactive");
        assert_eq!(error.status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn profile_update_changes_phone_and_rejects_blank_name() {
        let harness = harness(Vec::new()).await;
        let user = harness.user("dana@example.com").await;

        let Json(updated) = update_me(
            State(harness.state.clone()),
            user.clone(),
            Json(ProfileUpdate { name: None, phone_number: Some("+15550111".into()) }),
        )
        .await
        .expect("update");
        assert_eq!(updated.phone_number.as_deref(), Some("+15550111"));
        assert_eq!(updated.name, "dana");

        let error = update_me(
            State(harness.state.clone()),
            user,
            Json(ProfileUpdate { name: Some("  ".into()), phone_number: None }),
        )
        .await
        .expect_err("blank name");
        assert_eq!(error.status, StatusCode::BAD_REQUEST);
    }
}
