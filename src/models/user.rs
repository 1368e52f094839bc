use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Stored user row
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct User {
    pub id: i32,
    pub username: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub profile_image_url: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl User {
    /// Usernames: 3-64 chars of ASCII letters, digits, `_`, `.` or `-`
    pub fn validate_username(username: &str) -> bool {
        (3..=64).contains(&username.len())
            && username
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
    }

    /// Minimal shape check; deliverability is not our concern
    pub fn validate_email(email: &str) -> bool {
        let Some((local, domain)) = email.split_once('@') else {
            return false;
        };
        email.len() <= 255
            && !local.is_empty()
            && domain.contains('.')
            && !domain.starts_with('.')
            && !domain.ends_with('.')
            && !email.chars().any(char::is_whitespace)
    }

    pub fn identity(&self) -> Identity {
        Identity {
            user_id: self.id,
            username: self.username.clone(),
            email: self.email.clone(),
        }
    }
}

/// A verified caller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub user_id: i32,
    pub username: String,
    pub email: String,
}
