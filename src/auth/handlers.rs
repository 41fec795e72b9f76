use anyhow::Context;
use axum::{
    extract::{Path, State},
    http::{
        header::{HOST, LOCATION, SET_COOKIE},
        HeaderMap, HeaderValue, StatusCode,
    },
    response::{IntoResponse, Redirect, Response},
    routing::{get, post},
    Form, Json, Router,
};
use tracing::instrument;

use crate::{
    auth::{
        dto::{ForgotPasswordForm, MessageResponse, PublicUser, ResetPasswordForm, SignInForm},
        error::AuthError,
        extractors::{AuthSession, MaybeAuthSession},
        services,
        session::{blank_session_cookie, session_cookie, NewSession},
    },
    config::AppConfig,
    state::AppState,
};

const SIGNIN_PATH: &str = "/signin";

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route(SIGNIN_PATH, get(signin_page).post(signin))
        .route("/signout", post(signout))
        .route(
            "/forgot-password",
            get(forgot_password_page).post(forgot_password),
        )
        .route("/reset-password", post(reset_password_without_token))
        .route(
            "/reset-password/:token",
            get(reset_password_page).post(reset_password),
        )
}

pub fn me_routes() -> Router<AppState> {
    Router::new().route("/me", get(get_me))
}

/// Signed-in visitors are sent away from the auth pages.
fn page(state: &AppState, session: MaybeAuthSession) -> Response {
    match session.0 {
        Some(_) => Redirect::temporary(&state.config.default_redirect_url).into_response(),
        None => StatusCode::NO_CONTENT.into_response(),
    }
}

/// Scheme and authority for links in outgoing emails.
fn link_base(config: &AppConfig, headers: &HeaderMap) -> String {
    if let Some(base) = &config.public_base_url {
        return base.trim_end_matches('/').to_string();
    }
    let host = headers
        .get(HOST)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("localhost");
    let scheme = if config.is_production() { "https" } else { "http" };
    format!("{scheme}://{host}")
}

fn found_with_cookie(location: &str, cookie: HeaderValue) -> Result<Response, AuthError> {
    let location = HeaderValue::from_str(location).context("redirect location header")?;
    let mut headers = HeaderMap::new();
    headers.insert(LOCATION, location);
    headers.insert(SET_COOKIE, cookie);
    Ok((StatusCode::FOUND, headers).into_response())
}

fn signed_in(state: &AppState, new: &NewSession) -> Result<Response, AuthError> {
    let cookie = session_cookie(&state.config.session, &new.token).context("session cookie")?;
    found_with_cookie(&state.config.default_redirect_url, cookie)
}

#[instrument(skip_all)]
pub async fn signin_page(State(state): State<AppState>, session: MaybeAuthSession) -> Response {
    page(&state, session)
}

#[instrument(skip_all)]
pub async fn forgot_password_page(
    State(state): State<AppState>,
    session: MaybeAuthSession,
) -> Response {
    page(&state, session)
}

#[instrument(skip_all)]
pub async fn reset_password_page(
    State(state): State<AppState>,
    session: MaybeAuthSession,
) -> Response {
    page(&state, session)
}

#[instrument(skip(state, form))]
pub async fn signin(
    State(state): State<AppState>,
    Form(form): Form<SignInForm>,
) -> Result<Response, AuthError> {
    let new = services::sign_in(&state, &form.email, &form.password).await?;
    signed_in(&state, &new)
}

#[instrument(skip_all)]
pub async fn signout(
    State(state): State<AppState>,
    MaybeAuthSession(session): MaybeAuthSession,
) -> Result<Response, AuthError> {
    if let Some(current) = session {
        services::sign_out(&state, &current.token, current.user.id).await?;
    }
    let cookie = blank_session_cookie(&state.config.session).context("blank session cookie")?;
    found_with_cookie(SIGNIN_PATH, cookie)
}

#[instrument(skip(state, headers, form))]
pub async fn forgot_password(
    State(state): State<AppState>,
    headers: HeaderMap,
    Form(form): Form<ForgotPasswordForm>,
) -> Result<Json<MessageResponse>, AuthError> {
    let base = link_base(&state.config, &headers);
    let message = services::request_password_reset(&state, &form.email, &base).await?;
    Ok(Json(MessageResponse { message }))
}

#[instrument(skip_all)]
pub async fn reset_password(
    State(state): State<AppState>,
    Path(token): Path<String>,
    Form(form): Form<ResetPasswordForm>,
) -> Result<Response, AuthError> {
    let new = services::reset_password(
        &state,
        Some(&token),
        &form.password,
        &form.password_confirm,
    )
    .await?;
    signed_in(&state, &new)
}

#[instrument(skip_all)]
pub async fn reset_password_without_token(
    State(state): State<AppState>,
    Form(form): Form<ResetPasswordForm>,
) -> Result<Response, AuthError> {
    let new =
        services::reset_password(&state, None, &form.password, &form.password_confirm).await?;
    signed_in(&state, &new)
}

#[instrument(skip_all)]
pub async fn get_me(auth: AuthSession) -> Json<PublicUser> {
    Json(PublicUser::from(auth.user))
}
