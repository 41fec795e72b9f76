use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use tracing::error;

use crate::auth::dto::{FormErrorResponse, FormErrors};

/// User-facing failures of the auth forms.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("Invalid email")]
    InvalidEmail,
    #[error("Invalid email or password")]
    InvalidCredentials,
    #[error("Missing token, please double check the link url sent by email.")]
    MissingToken,
    #[error("Confirmation password mismatch.")]
    PasswordMismatch,
    #[error("Password must be at least 8 characters.")]
    PasswordTooShort,
    #[error("Token not found, please double check the link url sent by email.")]
    TokenNotFound,
    #[error("Token expired, please submit a new request.")]
    TokenExpired,
    #[error("unexpected error, please retry in a few moment")]
    EmailDelivery(#[source] anyhow::Error),
    #[error("unexpected error, please retry in a few moment")]
    Internal(#[from] anyhow::Error),
}

impl AuthError {
    pub fn status(&self) -> StatusCode {
        match self {
            AuthError::InvalidEmail
            | AuthError::InvalidCredentials
            | AuthError::PasswordMismatch
            | AuthError::PasswordTooShort => StatusCode::UNPROCESSABLE_ENTITY,
            AuthError::MissingToken => StatusCode::BAD_REQUEST,
            AuthError::TokenNotFound => StatusCode::NOT_FOUND,
            AuthError::TokenExpired => StatusCode::GONE,
            AuthError::EmailDelivery(_) => StatusCode::SERVICE_UNAVAILABLE,
            AuthError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn form_errors(&self) -> FormErrors {
        let text = self.to_string();
        match self {
            // The forgot-password form reports everything on its email field.
            AuthError::InvalidEmail | AuthError::EmailDelivery(_) => FormErrors {
                email: Some(text),
                ..FormErrors::default()
            },
            AuthError::TokenExpired => FormErrors {
                message: Some(text),
                expired: Some(true),
                ..FormErrors::default()
            },
            _ => FormErrors {
                message: Some(text),
                ..FormErrors::default()
            },
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        match &self {
            AuthError::EmailDelivery(e) => error!(error = ?e, "cannot send email"),
            AuthError::Internal(e) => error!(error = ?e, "internal error"),
            _ => {}
        }
        let body = FormErrorResponse {
            errors: self.form_errors(),
        };
        (self.status(), Json(body)).into_response()
    }
}
