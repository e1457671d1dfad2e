use chrono::Utc;
use sqlx::sqlite::SqliteRow;

use rollwise_core::domain::new_id;
use rollwise_core::domain::user::{User, UserId};

use super::{column, decode_timestamp, encode_timestamp, parse_column, RepositoryError, UserRepository};
use crate::DbPool;

const USER_COLUMNS: &str = "id, name, email, auth_subject, email_verified, phone_number,
                            global_role, active, created_at, updated_at";

pub struct SqlUserRepository {
    pool: DbPool,
}

impl SqlUserRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

pub(crate) fn row_to_user(row: &SqliteRow) -> Result<User, RepositoryError> {
    let created_at: String = column(row, "created_at")?;
    let updated_at: String = column(row, "updated_at")?;
    Ok(User {
        id: UserId(column(row, "id")?),
        name: column(row, "name")?,
        email: column(row, "email")?,
        auth_subject: column(row, "auth_subject")?,
        email_verified: column(row, "email_verified")?,
        phone_number: column(row, "phone_number")?,
        global_role: parse_column(row, "global_role")?,
        active: column(row, "active")?,
        created_at: decode_timestamp(&created_at)?,
        updated_at: decode_timestamp(&updated_at)?,
    })
}

#[async_trait::async_trait]
impl UserRepository for SqlUserRepository {
    async fn find_by_id(&self, id: &UserId) -> Result<Option<User>, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?"))
            .bind(&id.0)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_user).transpose()
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {USER_COLUMNS} FROM users WHERE email = ?"))
            .bind(email)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_user).transpose()
    }

    async fn upsert_by_email(
        &self,
        email: &str,
        name: &str,
        auth_subject: Option<&str>,
    ) -> Result<User, RepositoryError> {
        let now = encode_timestamp(&Utc::now());
        sqlx::query(
            "INSERT INTO users (id, name, email, auth_subject, email_verified, global_role,
                                active, created_at, updated_at)
             VALUES (?, ?, ?, ?, 1, 'user', 1, ?, ?)
             ON CONFLICT(email) DO UPDATE SET
                 name = excluded.name,
                 auth_subject = COALESCE(excluded.auth_subject, users.auth_subject),
                 email_verified = 1,
                 updated_at = excluded.updated_at",
        )
        .bind(new_id())
        .bind(name)
        .bind(email)
        .bind(auth_subject)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await?;

        self.find_by_email(email).await?.ok_or_else(|| {
            RepositoryError::Decode(format!("user `{email}` missing after upsert"))
        })
    }

    async fn update_profile(
        &self,
        id: &UserId,
        name: Option<&str>,
        phone_number: Option<&str>,
    ) -> Result<Option<User>, RepositoryError> {
        sqlx::query(
            "UPDATE users SET
                 name = COALESCE(?, name),
                 phone_number = COALESCE(?, phone_number),
                 updated_at = ?
             WHERE id = ?",
        )
        .bind(name)
        .bind(phone_number)
        .bind(encode_timestamp(&Utc::now()))
        .bind(&id.0)
        .execute(&self.pool)
        .await?;

        self.find_by_id(id).await
    }
}

#[cfg(test)]
mod tests {
    use rollwise_core::domain::user::GlobalRole;

    use super::SqlUserRepository;
    use crate::repositories::UserRepository;
    use crate::{connect_with_settings, migrations};

    async fn setup() -> SqlUserRepository {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        SqlUserRepository::new(pool)
    }

    #[tokio::test]
    async fn first_login_creates_user_and_second_refreshes_it() {
        let repo = setup().await;

        let created = repo.upsert_by_email("dana@example.com", "Dana", None).await.expect("create");
        assert_eq!(created.global_role, GlobalRole::User);
        assert!(created.email_verified);
        assert!(created.active);

        let refreshed = repo
            .upsert_by_email("dana@example.com", "Dana Scully", Some("google|123"))
            .await
            .expect("refresh");
        assert_eq!(refreshed.id, created.id);
        assert_eq!(refreshed.name, "Dana Scully");
        assert_eq!(refreshed.auth_subject.as_deref(), Some("google|123"));
    }

    #[tokio::test]
    async fn profile_update_keeps_missing_fields() {
        let repo = setup().await;
        let user = repo.upsert_by_email("sam@example.com", "Sam", None).await.expect("create");

        let updated = repo
            .update_profile(&user.id, None, Some("+15550111"))
            .await
            .expect("update")
            .expect("user exists");

        assert_eq!(updated.name, "Sam");
        assert_eq!(updated.phone_number.as_deref(), Some("+15550111"));
        assert!(repo.find_by_email("nobody@example.com").await.expect("lookup").is_none());
    }
}
