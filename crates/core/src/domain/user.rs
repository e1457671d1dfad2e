use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::DomainError;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub String);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GlobalRole {
    User,
    PlatformAdmin,
}

impl GlobalRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::PlatformAdmin => "platform_admin",
        }
    }
}

impl std::str::FromStr for GlobalRole {
    type Err = DomainError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "user" => Ok(Self::User),
            "platform_admin" => Ok(Self::PlatformAdmin),
            other => {
                Err(DomainError::UnknownVariant { kind: "global role", value: other.to_string() })
            }
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub name: String,
    pub email: String,
    pub auth_subject: Option<String>,
    pub email_verified: bool,
    pub phone_number: Option<String>,
    pub global_role: GlobalRole,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields accepted when a user signs in for the first time or refreshes their profile.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct UserLogin {
    pub email: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub auth_subject: Option<String>,
}

impl UserLogin {
    pub fn normalized_email(&self) -> Result<String, DomainError> {
        normalize_email(&self.email)
    }

    /// Display name, falling back to the local part of the email.
    pub fn display_name(&self) -> String {
        match self.name.as_deref().map(str::trim).filter(|name| !name.is_empty()) {
            Some(name) => name.to_string(),
            None => self.email.split('@').next().unwrap_or_default().trim().to_string(),
        }
    }
}

pub fn normalize_email(raw: &str) -> Result<String, DomainError> {
    let email = raw.trim().to_ascii_lowercase();
    let valid = email
        .split_once('@')
        .is_some_and(|(local, domain)| !local.is_empty() && domain.contains('.'));
    if !valid {
        return Err(DomainError::invalid("email", format!("`{raw}` is not an email address")));
    }
    Ok(email)
}

#[cfg(test)]
mod tests {
    use super::{normalize_email, GlobalRole, UserLogin};

    #[test]
    fn email_is_trimmed_and_lowercased() {
        assert_eq!(normalize_email("  Owner@Example.COM ").expect("valid"), "owner@example.com");
        assert!(normalize_email("not-an-email").is_err());
        assert!(normalize_email("@example.com").is_err());
    }

    #[test]
    fn display_name_falls_back_to_local_part() {
        let login = UserLogin {
            email: "dana@example.com".to_string(),
            name: Some("   ".to_string()),
            auth_subject: None,
        };
        assert_eq!(login.display_name(), "dana");
    }

    #[test]
    fn global_role_parses_storage_values() {
        assert_eq!("platform_admin".parse::<GlobalRole>().expect("role"), GlobalRole::PlatformAdmin);
        assert!("root".parse::<GlobalRole>().is_err());
    }
}
