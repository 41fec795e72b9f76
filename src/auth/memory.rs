//! In-memory `AuthRepo` used by tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use time::OffsetDateTime;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::auth::repo::AuthRepo;
use crate::auth::repo_types::{NewUser, PasswordResetToken, PurgeStats, Session, User};

#[derive(Default)]
struct Tables {
    users: HashMap<Uuid, User>,
    sessions: HashMap<String, Session>,
    reset_tokens: HashMap<String, PasswordResetToken>,
}

#[derive(Default)]
pub struct MemoryAuthRepo {
    tables: RwLock<Tables>,
    fail_session_deletes: AtomicBool,
}

impl MemoryAuthRepo {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_user(
        &self,
        email: &str,
        verified: bool,
        hashed_password: Option<String>,
    ) -> User {
        let user = User {
            id: Uuid::new_v4(),
            email: email.to_string(),
            email_verified: verified,
            hashed_password,
            username: None,
            avatar_url: None,
            created_at: OffsetDateTime::now_utc(),
        };
        self.tables.write().await.users.insert(user.id, user.clone());
        user
    }

    /// Makes every later `delete_session` call fail.
    pub fn fail_session_deletes(&self) {
        self.fail_session_deletes.store(true, Ordering::SeqCst);
    }

    pub async fn sessions_of(&self, user_id: Uuid) -> Vec<Session> {
        self.tables
            .read()
            .await
            .sessions
            .values()
            .filter(|s| s.user_id == user_id)
            .cloned()
            .collect()
    }

    pub async fn reset_tokens_of(&self, user_id: Uuid) -> Vec<PasswordResetToken> {
        self.tables
            .read()
            .await
            .reset_tokens
            .values()
            .filter(|t| t.user_id == user_id)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl AuthRepo for MemoryAuthRepo {
    async fn find_user_by_email(&self, email: &str) -> anyhow::Result<Option<User>> {
        let tables = self.tables.read().await;
        Ok(tables.users.values().find(|u| u.email == email).cloned())
    }

    async fn find_user_by_id(&self, id: Uuid) -> anyhow::Result<Option<User>> {
        Ok(self.tables.read().await.users.get(&id).cloned())
    }

    async fn insert_user_if_absent(&self, user: NewUser) -> anyhow::Result<bool> {
        let mut tables = self.tables.write().await;
        if tables.users.values().any(|u| u.email == user.email) {
            return Ok(false);
        }
        let row = User {
            id: Uuid::new_v4(),
            email: user.email,
            email_verified: user.email_verified,
            hashed_password: user.hashed_password,
            username: None,
            avatar_url: None,
            created_at: OffsetDateTime::now_utc(),
        };
        tables.users.insert(row.id, row);
        Ok(true)
    }

    async fn insert_session(&self, session: &Session) -> anyhow::Result<()> {
        let mut tables = self.tables.write().await;
        anyhow::ensure!(
            tables.users.contains_key(&session.user_id),
            "session references unknown user"
        );
        anyhow::ensure!(
            !tables.sessions.contains_key(&session.id),
            "duplicate session id"
        );
        tables.sessions.insert(session.id.clone(), session.clone());
        Ok(())
    }

    async fn find_session(&self, id: &str) -> anyhow::Result<Option<Session>> {
        Ok(self.tables.read().await.sessions.get(id).cloned())
    }

    async fn update_session_expiry(
        &self,
        id: &str,
        expires_at: OffsetDateTime,
    ) -> anyhow::Result<()> {
        if let Some(session) = self.tables.write().await.sessions.get_mut(id) {
            session.expires_at = expires_at;
        }
        Ok(())
    }

    async fn delete_session(&self, id: &str) -> anyhow::Result<()> {
        anyhow::ensure!(
            !self.fail_session_deletes.load(Ordering::SeqCst),
            "session store unavailable"
        );
        self.tables.write().await.sessions.remove(id);
        Ok(())
    }

    async fn replace_reset_token(&self, token: &PasswordResetToken) -> anyhow::Result<()> {
        let mut tables = self.tables.write().await;
        anyhow::ensure!(
            tables.users.contains_key(&token.user_id),
            "reset token references unknown user"
        );
        tables.reset_tokens.retain(|_, t| t.user_id != token.user_id);
        tables.reset_tokens.insert(token.id.clone(), token.clone());
        Ok(())
    }

    async fn find_reset_token(&self, id: &str) -> anyhow::Result<Option<PasswordResetToken>> {
        Ok(self.tables.read().await.reset_tokens.get(id).cloned())
    }

    async fn delete_reset_token(&self, id: &str) -> anyhow::Result<()> {
        self.tables.write().await.reset_tokens.remove(id);
        Ok(())
    }

    async fn consume_reset_token(
        &self,
        id: &str,
        user_id: Uuid,
        hashed_password: &str,
    ) -> anyhow::Result<bool> {
        let mut tables = self.tables.write().await;
        match tables.reset_tokens.get(id) {
            Some(token) if token.user_id == user_id => {}
            _ => return Ok(false),
        }
        let Some(user) = tables.users.get_mut(&user_id) else {
            return Ok(false);
        };
        user.hashed_password = Some(hashed_password.to_string());
        tables.reset_tokens.remove(id);
        tables.sessions.retain(|_, s| s.user_id != user_id);
        Ok(true)
    }

    async fn purge_expired(&self, now: OffsetDateTime) -> anyhow::Result<PurgeStats> {
        let mut tables = self.tables.write().await;
        let sessions_before = tables.sessions.len();
        let tokens_before = tables.reset_tokens.len();
        tables.sessions.retain(|_, s| s.expires_at > now);
        tables.reset_tokens.retain(|_, t| t.expires_at > now);
        Ok(PurgeStats {
            sessions: (sessions_before - tables.sessions.len()) as u64,
            reset_tokens: (tokens_before - tables.reset_tokens.len()) as u64,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::Duration;

    #[tokio::test]
    async fn consume_is_single_use() {
        let repo = MemoryAuthRepo::new();
        let user = repo.add_user("a@example.com", true, None).await;
        let token = PasswordResetToken {
            id: "t1".into(),
            user_id: user.id,
            expires_at: OffsetDateTime::now_utc() + Duration::hours(1),
        };
        repo.replace_reset_token(&token).await.unwrap();

        let session = Session {
            id: "s1".into(),
            user_id: user.id,
            expires_at: OffsetDateTime::now_utc() + Duration::days(1),
        };
        repo.insert_session(&session).await.unwrap();

        assert!(repo.consume_reset_token("t1", user.id, "h1").await.unwrap());
        assert!(repo.sessions_of(user.id).await.is_empty());
        assert!(!repo.consume_reset_token("t1", user.id, "h2").await.unwrap());

        let stored = repo.find_user_by_id(user.id).await.unwrap().unwrap();
        assert_eq!(stored.hashed_password.as_deref(), Some("h1"));
    }

    #[tokio::test]
    async fn replace_keeps_one_token_per_user() {
        let repo = MemoryAuthRepo::new();
        let user = repo.add_user("a@example.com", true, None).await;
        for id in ["first", "second"] {
            let token = PasswordResetToken {
                id: id.into(),
                user_id: user.id,
                expires_at: OffsetDateTime::now_utc() + Duration::hours(1),
            };
            repo.replace_reset_token(&token).await.unwrap();
        }
        let tokens = repo.reset_tokens_of(user.id).await;
        assert_eq!(tokens.len(), 1);
        assert_eq!(tokens[0].id, "second");
    }

    #[tokio::test]
    async fn reset_token_requires_existing_user() {
        let repo = MemoryAuthRepo::new();
        let token = PasswordResetToken {
            id: "orphan".into(),
            user_id: Uuid::new_v4(),
            expires_at: OffsetDateTime::now_utc() + Duration::hours(1),
        };
        assert!(repo.replace_reset_token(&token).await.is_err());
    }
}
