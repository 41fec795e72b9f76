use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

/// User record in the database.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub email_verified: bool,
    #[serde(skip_serializing)]
    pub hashed_password: Option<String>, // Argon2 hash, not exposed in JSON
    pub username: Option<String>,
    pub avatar_url: Option<String>,
    pub created_at: OffsetDateTime,
}

/// Values needed to insert a user; `id` and `created_at` come from the caller.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub email: String,
    pub email_verified: bool,
    pub hashed_password: Option<String>,
}

/// Server-side session. `id` is the hash of the cookie value.
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct Session {
    pub id: String,
    pub user_id: Uuid,
    pub expires_at: OffsetDateTime,
}

/// Single-use password reset token. `id` is the hash of the emailed value.
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct PasswordResetToken {
    pub id: String,
    pub user_id: Uuid,
    pub expires_at: OffsetDateTime,
}

impl PasswordResetToken {
    pub fn is_expired(&self, now: OffsetDateTime) -> bool {
        self.expires_at <= now
    }
}

/// Rows removed by a purge pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PurgeStats {
    pub sessions: u64,
    pub reset_tokens: u64,
}
