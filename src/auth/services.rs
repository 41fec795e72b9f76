use std::time::Duration as StdDuration;

use lazy_static::lazy_static;
use regex::Regex;
use time::{Duration, OffsetDateTime};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::auth::error::AuthError;
use crate::auth::password::{hash_password_blocking, verify_password_blocking};
use crate::auth::repo_types::{PasswordResetToken, PurgeStats};
use crate::auth::session::{create_session, invalidate_session, NewSession};
use crate::auth::tokens::{generate_token, hash_token};
use crate::email::reset_password_email;
use crate::state::AppState;

pub(crate) const MIN_PASSWORD_LEN: usize = 8;

pub(crate) fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

/// Issue a reset token for a verified account and email the link.
///
/// Unknown, unverified and malformed addresses all yield
/// [`AuthError::InvalidEmail`]. If the email cannot be sent the token is
/// deleted again so nothing usable is left behind.
pub async fn request_password_reset(
    state: &AppState,
    email: &str,
    link_base: &str,
) -> Result<String, AuthError> {
    let email = normalize_email(email);
    if !is_valid_email(&email) {
        return Err(AuthError::InvalidEmail);
    }

    let user = match state.repo.find_user_by_email(&email).await? {
        Some(user) if user.email_verified => user,
        _ => {
            info!("password reset requested for unknown or unverified email");
            return Err(AuthError::InvalidEmail);
        }
    };

    let token = generate_token()?;
    let record = PasswordResetToken {
        id: hash_token(&token),
        user_id: user.id,
        expires_at: OffsetDateTime::now_utc()
            + Duration::minutes(state.config.reset_token_ttl_minutes),
    };
    state.repo.replace_reset_token(&record).await?;

    let reset_url = format!(
        "{}/reset-password/{}",
        link_base.trim_end_matches('/'),
        token
    );
    let message = reset_password_email(&user.email, &reset_url);
    if let Err(e) = state.email.send_email(&message).await {
        if let Err(cleanup) = state.repo.delete_reset_token(&record.id).await {
            error!(error = ?cleanup, user_id = %user.id, "cannot delete unsent reset token");
        }
        return Err(AuthError::EmailDelivery(e));
    }

    info!(user_id = %user.id, "password reset link sent");
    Ok(format!("An email has been sent to '{}'", user.email))
}

/// Consume a reset token: set the new password, drop every session of the
/// user and open a fresh one.
pub async fn reset_password(
    state: &AppState,
    token: Option<&str>,
    password: &str,
    password_confirm: &str,
) -> Result<NewSession, AuthError> {
    let token = token
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or(AuthError::MissingToken)?;
    if password != password_confirm {
        return Err(AuthError::PasswordMismatch);
    }
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(AuthError::PasswordTooShort);
    }

    let id = hash_token(token);
    let record = state
        .repo
        .find_reset_token(&id)
        .await?
        .ok_or(AuthError::TokenNotFound)?;

    if record.is_expired(OffsetDateTime::now_utc()) {
        state.repo.delete_reset_token(&id).await?;
        return Err(AuthError::TokenExpired);
    }

    let hashed = hash_password_blocking(password.to_string()).await?;
    if !state
        .repo
        .consume_reset_token(&id, record.user_id, &hashed)
        .await?
    {
        warn!(user_id = %record.user_id, "reset token consumed concurrently");
        return Err(AuthError::TokenNotFound);
    }

    let session = create_session(state, record.user_id).await?;
    info!(user_id = %record.user_id, "password reset");
    Ok(session)
}

pub async fn sign_in(
    state: &AppState,
    email: &str,
    password: &str,
) -> Result<NewSession, AuthError> {
    let email = normalize_email(email);
    if !is_valid_email(&email) {
        return Err(AuthError::InvalidCredentials);
    }

    let user = state
        .repo
        .find_user_by_email(&email)
        .await?
        .ok_or(AuthError::InvalidCredentials)?;
    let Some(hash) = user.hashed_password.clone() else {
        return Err(AuthError::InvalidCredentials);
    };
    if !verify_password_blocking(password.to_string(), hash).await? {
        warn!(user_id = %user.id, "sign in with wrong password");
        return Err(AuthError::InvalidCredentials);
    }

    let session = create_session(state, user.id).await?;
    info!(user_id = %user.id, "user signed in");
    Ok(session)
}

pub async fn sign_out(state: &AppState, token: &str, user_id: Uuid) -> anyhow::Result<()> {
    invalidate_session(state, token).await?;
    info!(%user_id, "user signed out");
    Ok(())
}

pub async fn purge_expired(state: &AppState) -> anyhow::Result<PurgeStats> {
    let stats = state.repo.purge_expired(OffsetDateTime::now_utc()).await?;
    if stats != PurgeStats::default() {
        info!(
            sessions = stats.sessions,
            reset_tokens = stats.reset_tokens,
            "expired rows purged"
        );
    }
    Ok(stats)
}

/// Runs [`purge_expired`] every `every`, forever. Failures are logged and the
/// loop keeps going.
pub fn spawn_purge_task(state: AppState, every: StdDuration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if let Err(e) = purge_expired(&state).await {
                error!(error = ?e, "purge of expired rows failed");
            }
        }
    })
}
