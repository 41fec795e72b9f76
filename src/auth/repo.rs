use anyhow::Context;
use async_trait::async_trait;
use sqlx::PgPool;
use time::OffsetDateTime;
use tracing::debug;
use uuid::Uuid;

use crate::auth::repo_types::{NewUser, PasswordResetToken, PurgeStats, Session, User};

/// Persistence used by the auth flows.
#[async_trait]
pub trait AuthRepo: Send + Sync {
    async fn find_user_by_email(&self, email: &str) -> anyhow::Result<Option<User>>;
    async fn find_user_by_id(&self, id: Uuid) -> anyhow::Result<Option<User>>;
    /// Returns `false` when a user with the same email already exists.
    async fn insert_user_if_absent(&self, user: NewUser) -> anyhow::Result<bool>;

    async fn insert_session(&self, session: &Session) -> anyhow::Result<()>;
    async fn find_session(&self, id: &str) -> anyhow::Result<Option<Session>>;
    async fn update_session_expiry(&self, id: &str, expires_at: OffsetDateTime)
        -> anyhow::Result<()>;
    async fn delete_session(&self, id: &str) -> anyhow::Result<()>;

    /// Drops any outstanding token of the same user, then stores `token`.
    async fn replace_reset_token(&self, token: &PasswordResetToken) -> anyhow::Result<()>;
    async fn find_reset_token(&self, id: &str) -> anyhow::Result<Option<PasswordResetToken>>;
    async fn delete_reset_token(&self, id: &str) -> anyhow::Result<()>;
    /// Atomically deletes the token, drops every session of the user and
    /// stores the new password hash. Returns `false` (and changes nothing)
    /// when the token no longer exists.
    async fn consume_reset_token(
        &self,
        id: &str,
        user_id: Uuid,
        hashed_password: &str,
    ) -> anyhow::Result<bool>;

    async fn purge_expired(&self, now: OffsetDateTime) -> anyhow::Result<PurgeStats>;
}

const USER_COLUMNS: &str =
    "id, email, email_verified, hashed_password, username, avatar_url, created_at";

#[derive(Clone)]
pub struct PgAuthRepo {
    pool: PgPool,
}

impl PgAuthRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl AuthRepo for PgAuthRepo {
    async fn find_user_by_email(&self, email: &str) -> anyhow::Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE email = $1"
        ))
        .bind(email)
        .fetch_optional(&self.pool)
        .await
        .context("find user by email")?;
        Ok(user)
    }

    async fn find_user_by_id(&self, id: Uuid) -> anyhow::Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .context("find user by id")?;
        Ok(user)
    }

    async fn insert_user_if_absent(&self, user: NewUser) -> anyhow::Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO users (id, email, email_verified, hashed_password)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (email) DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&user.email)
        .bind(user.email_verified)
        .bind(&user.hashed_password)
        .execute(&self.pool)
        .await
        .context("insert user")?;
        Ok(result.rows_affected() == 1)
    }

    async fn insert_session(&self, session: &Session) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO sessions (id, user_id, expires_at)
            VALUES ($1, $2, $3)
            "#,
        )
        .bind(&session.id)
        .bind(session.user_id)
        .bind(session.expires_at)
        .execute(&self.pool)
        .await
        .context("insert session")?;
        Ok(())
    }

    async fn find_session(&self, id: &str) -> anyhow::Result<Option<Session>> {
        let session = sqlx::query_as::<_, Session>(
            "SELECT id, user_id, expires_at FROM sessions WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .context("find session")?;
        Ok(session)
    }

    async fn update_session_expiry(
        &self,
        id: &str,
        expires_at: OffsetDateTime,
    ) -> anyhow::Result<()> {
        sqlx::query("UPDATE sessions SET expires_at = $2 WHERE id = $1")
            .bind(id)
            .bind(expires_at)
            .execute(&self.pool)
            .await
            .context("extend session")?;
        Ok(())
    }

    async fn delete_session(&self, id: &str) -> anyhow::Result<()> {
        sqlx::query("DELETE FROM sessions WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .context("delete session")?;
        Ok(())
    }

    async fn replace_reset_token(&self, token: &PasswordResetToken) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO password_reset_tokens (id, user_id, expires_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (user_id)
            DO UPDATE SET id = EXCLUDED.id, expires_at = EXCLUDED.expires_at
            "#,
        )
        .bind(&token.id)
        .bind(token.user_id)
        .bind(token.expires_at)
        .execute(&self.pool)
        .await
        .context("upsert reset token")?;
        Ok(())
    }

    async fn find_reset_token(&self, id: &str) -> anyhow::Result<Option<PasswordResetToken>> {
        let token = sqlx::query_as::<_, PasswordResetToken>(
            "SELECT id, user_id, expires_at FROM password_reset_tokens WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .context("find reset token")?;
        Ok(token)
    }

    async fn delete_reset_token(&self, id: &str) -> anyhow::Result<()> {
        sqlx::query("DELETE FROM password_reset_tokens WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .context("delete reset token")?;
        Ok(())
    }

    async fn consume_reset_token(
        &self,
        id: &str,
        user_id: Uuid,
        hashed_password: &str,
    ) -> anyhow::Result<bool> {
        let mut tx = self.pool.begin().await.context("begin tx")?;

        // Deleting first makes a concurrent second use see zero rows.
        let deleted = sqlx::query(
            "DELETE FROM password_reset_tokens WHERE id = $1 AND user_id = $2",
        )
        .bind(id)
        .bind(user_id)
        .execute(&mut *tx)
        .await
        .context("delete consumed reset token")?;
        if deleted.rows_affected() != 1 {
            tx.rollback().await.context("rollback tx")?;
            return Ok(false);
        }

        let sessions = sqlx::query("DELETE FROM sessions WHERE user_id = $1")
            .bind(user_id)
            .execute(&mut *tx)
            .await
            .context("delete user sessions")?;
        debug!(%user_id, removed = sessions.rows_affected(), "user sessions invalidated");

        sqlx::query("UPDATE users SET hashed_password = $2 WHERE id = $1")
            .bind(user_id)
            .bind(hashed_password)
            .execute(&mut *tx)
            .await
            .context("update password")?;

        tx.commit().await.context("commit tx")?;
        Ok(true)
    }

    async fn purge_expired(&self, now: OffsetDateTime) -> anyhow::Result<PurgeStats> {
        let sessions = sqlx::query("DELETE FROM sessions WHERE expires_at <= $1")
            .bind(now)
            .execute(&self.pool)
            .await
            .context("purge sessions")?
            .rows_affected();
        let reset_tokens = sqlx::query("DELETE FROM password_reset_tokens WHERE expires_at <= $1")
            .bind(now)
            .execute(&self.pool)
            .await
            .context("purge reset tokens")?
            .rows_affected();
        Ok(PurgeStats {
            sessions,
            reset_tokens,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::postgres::PgPoolOptions;
    use time::Duration;

    /// Connects to `TEST_DATABASE_URL` and migrates it; `None` skips the test.
    async fn test_repo() -> anyhow::Result<Option<PgAuthRepo>> {
        let Ok(url) = std::env::var("TEST_DATABASE_URL") else {
            eprintln!("Skipping Postgres test: TEST_DATABASE_URL not set");
            return Ok(None);
        };
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(&url)
            .await
            .context("connect to test database")?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Some(PgAuthRepo::new(pool)))
    }

    async fn insert_user(repo: &PgAuthRepo) -> anyhow::Result<User> {
        let email = format!("{}@example.com", Uuid::new_v4());
        repo.insert_user_if_absent(NewUser {
            email: email.clone(),
            email_verified: true,
            hashed_password: Some("old-hash".into()),
        })
        .await?;
        repo.find_user_by_email(&email)
            .await?
            .context("user just inserted")
    }

    fn reset_token(user_id: Uuid) -> PasswordResetToken {
        PasswordResetToken {
            id: Uuid::new_v4().to_string(),
            user_id,
            expires_at: OffsetDateTime::now_utc() + Duration::hours(1),
        }
    }

    #[tokio::test]
    async fn concurrent_token_requests_leave_one_token() -> anyhow::Result<()> {
        let Some(repo) = test_repo().await? else {
            return Ok(());
        };
        let user = insert_user(&repo).await?;
        let first = reset_token(user.id);
        let second = reset_token(user.id);

        let (a, b) = tokio::join!(
            repo.replace_reset_token(&first),
            repo.replace_reset_token(&second)
        );
        a?;
        b?;

        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM password_reset_tokens WHERE user_id = $1")
                .bind(user.id)
                .fetch_one(repo.pool())
                .await?;
        assert_eq!(count, 1);
        Ok(())
    }

    #[tokio::test]
    async fn consume_is_single_use_and_drops_sessions() -> anyhow::Result<()> {
        let Some(repo) = test_repo().await? else {
            return Ok(());
        };
        let user = insert_user(&repo).await?;
        let token = reset_token(user.id);
        repo.replace_reset_token(&token).await?;
        repo.insert_session(&Session {
            id: Uuid::new_v4().to_string(),
            user_id: user.id,
            expires_at: OffsetDateTime::now_utc() + Duration::days(1),
        })
        .await?;

        let (a, b) = tokio::join!(
            repo.consume_reset_token(&token.id, user.id, "hash-a"),
            repo.consume_reset_token(&token.id, user.id, "hash-b")
        );
        let (a, b) = (a?, b?);
        assert!(a ^ b, "exactly one consumption must win");

        let stored = repo.find_user_by_id(user.id).await?.context("user")?;
        let expected = if a { "hash-a" } else { "hash-b" };
        assert_eq!(stored.hashed_password.as_deref(), Some(expected));
        assert!(repo.find_reset_token(&token.id).await?.is_none());

        let sessions: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM sessions WHERE user_id = $1")
            .bind(user.id)
            .fetch_one(repo.pool())
            .await?;
        assert_eq!(sessions, 0);
        Ok(())
    }
}
