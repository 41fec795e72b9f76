use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::auth::repo_types::User;

/// Form body of `POST /forgot-password`.
#[derive(Debug, Deserialize)]
pub struct ForgotPasswordForm {
    #[serde(default)]
    pub email: String,
}

/// Form body of `POST /reset-password/:token`.
#[derive(Deserialize)]
pub struct ResetPasswordForm {
    #[serde(default)]
    pub password: String,
    #[serde(rename = "password-confirm", default)]
    pub password_confirm: String,
}

/// Form body of `POST /signin`.
#[derive(Deserialize)]
pub struct SignInForm {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

/// Per-field errors shown next to the form inputs.
#[derive(Debug, Default, Serialize)]
pub struct FormErrors {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expired: Option<bool>,
}

#[derive(Debug, Serialize)]
pub struct FormErrorResponse {
    pub errors: FormErrors,
}

/// Public part of the user returned to the client.
#[derive(Debug, Serialize)]
pub struct PublicUser {
    pub id: Uuid,
    pub email: String,
    pub email_verified: bool,
    pub username: Option<String>,
    pub avatar_url: Option<String>,
}

impl From<User> for PublicUser {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            email: user.email,
            email_verified: user.email_verified,
            username: user.username,
            avatar_url: user.avatar_url,
        }
    }
}
