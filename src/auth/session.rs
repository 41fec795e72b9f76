//! Database-backed sessions keyed by a cookie.
//!
//! The cookie carries a random token; the `sessions` table stores only its
//! hash. Sessions slide: once less than half the lifetime remains, a
//! successful validation pushes the expiry back to a full lifetime.

use axum::http::{header::InvalidHeaderValue, HeaderMap, HeaderValue};
use time::{Duration, OffsetDateTime};
use tracing::debug;
use uuid::Uuid;

use crate::auth::repo_types::{Session, User};
use crate::auth::tokens::{generate_token, hash_token};
use crate::config::SessionConfig;
use crate::state::AppState;

/// A freshly created session with the raw token destined for the cookie.
#[derive(Debug, Clone)]
pub struct NewSession {
    pub token: String,
    pub session: Session,
}

fn lifetime(config: &SessionConfig) -> Duration {
    Duration::days(config.ttl_days)
}

pub async fn create_session(state: &AppState, user_id: Uuid) -> anyhow::Result<NewSession> {
    let token = generate_token()?;
    let session = Session {
        id: hash_token(&token),
        user_id,
        expires_at: OffsetDateTime::now_utc() + lifetime(&state.config.session),
    };
    state.repo.insert_session(&session).await?;
    debug!(%user_id, "session created");
    Ok(NewSession { token, session })
}

pub async fn validate_session(
    state: &AppState,
    token: &str,
) -> anyhow::Result<Option<(Session, User)>> {
    let id = hash_token(token);
    let Some(mut session) = state.repo.find_session(&id).await? else {
        return Ok(None);
    };

    let now = OffsetDateTime::now_utc();
    if session.expires_at <= now {
        state.repo.delete_session(&id).await?;
        debug!(user_id = %session.user_id, "expired session removed");
        return Ok(None);
    }

    let Some(user) = state.repo.find_user_by_id(session.user_id).await? else {
        state.repo.delete_session(&id).await?;
        return Ok(None);
    };

    let full = lifetime(&state.config.session);
    if session.expires_at - now < full / 2 {
        session.expires_at = now + full;
        state
            .repo
            .update_session_expiry(&id, session.expires_at)
            .await?;
        debug!(user_id = %session.user_id, "session extended");
    }

    Ok(Some((session, user)))
}

pub async fn invalidate_session(state: &AppState, token: &str) -> anyhow::Result<()> {
    state.repo.delete_session(&hash_token(token)).await
}

/// Browser-session cookie (no `Max-Age`); expiry is enforced server-side.
pub fn session_cookie(
    config: &SessionConfig,
    token: &str,
) -> Result<HeaderValue, InvalidHeaderValue> {
    let mut cookie = format!(
        "{}={token}; Path=/; HttpOnly; SameSite=Strict",
        config.cookie_name
    );
    if config.secure_cookie {
        cookie.push_str("; Secure");
    }
    HeaderValue::from_str(&cookie)
}

pub fn blank_session_cookie(config: &SessionConfig) -> Result<HeaderValue, InvalidHeaderValue> {
    let mut cookie = format!(
        "{}=; Path=/; HttpOnly; SameSite=Strict; Max-Age=0",
        config.cookie_name
    );
    if config.secure_cookie {
        cookie.push_str("; Secure");
    }
    HeaderValue::from_str(&cookie)
}

/// Pull the session token out of the `Cookie` header(s).
pub fn read_session_token(headers: &HeaderMap, cookie_name: &str) -> Option<String> {
    headers
        .get_all(axum::http::header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| key.trim() == cookie_name)
        .map(|(_, value)| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
