use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{request::Parts, StatusCode},
};
use tracing::error;

use super::repo_types::{Session, User};
use super::session::{read_session_token, validate_session};
use crate::state::AppState;

/// Session resolved from the cookie, if any.
pub struct MaybeAuthSession(pub Option<AuthSession>);

/// Valid session together with its user and the raw cookie token.
#[derive(Debug, Clone)]
pub struct AuthSession {
    pub token: String,
    pub session: Session,
    pub user: User,
}

#[async_trait]
impl FromRequestParts<AppState> for MaybeAuthSession {
    type Rejection = (StatusCode, String);

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let Some(token) = read_session_token(&parts.headers, &state.config.session.cookie_name)
        else {
            return Ok(MaybeAuthSession(None));
        };

        match validate_session(state, &token).await {
            Ok(Some((session, user))) => Ok(MaybeAuthSession(Some(AuthSession {
                token,
                session,
                user,
            }))),
            Ok(None) => Ok(MaybeAuthSession(None)),
            Err(e) => {
                error!(error = ?e, "session lookup failed");
                Err((
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "session lookup failed".into(),
                ))
            }
        }
    }
}

#[async_trait]
impl FromRequestParts<AppState> for AuthSession {
    type Rejection = (StatusCode, String);

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let MaybeAuthSession(session) = MaybeAuthSession::from_request_parts(parts, state).await?;
        session.ok_or((StatusCode::UNAUTHORIZED, "not signed in".into()))
    }
}
