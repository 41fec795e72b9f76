use tracing::{debug, info};

use crate::auth::repo::AuthRepo;
use crate::auth::repo_types::NewUser;
use crate::auth::services::{is_valid_email, normalize_email};

/// Admin account created at startup from the environment.
#[derive(Debug, Clone)]
pub struct AdminSeed {
    pub email: String,
    pub hashed_password: String,
}

impl AdminSeed {
    /// Reads `SEED_ADMIN_EMAIL` and `SEED_ADMIN_PASSWORD_HASH`; `None` unless both are set.
    pub fn from_env() -> anyhow::Result<Option<Self>> {
        let email = std::env::var("SEED_ADMIN_EMAIL").ok();
        let hash = std::env::var("SEED_ADMIN_PASSWORD_HASH").ok();
        let (Some(email), Some(hashed_password)) = (email, hash) else {
            return Ok(None);
        };
        Self::new(&email, &hashed_password).map(Some)
    }

    fn new(email: &str, hashed_password: &str) -> anyhow::Result<Self> {
        let email = normalize_email(email);
        anyhow::ensure!(is_valid_email(&email), "SEED_ADMIN_EMAIL is not an email address");
        argon2::password_hash::PasswordHash::new(hashed_password)
            .map_err(|e| anyhow::anyhow!("SEED_ADMIN_PASSWORD_HASH is not a PHC hash: {e}"))?;
        Ok(Self {
            email,
            hashed_password: hashed_password.to_string(),
        })
    }
}

/// Inserts the verified admin user unless the email is already taken.
pub async fn seed_admin(repo: &dyn AuthRepo, seed: &AdminSeed) -> anyhow::Result<bool> {
    let created = repo
        .insert_user_if_absent(NewUser {
            email: seed.email.clone(),
            email_verified: true,
            hashed_password: Some(seed.hashed_password.clone()),
        })
        .await?;
    if created {
        info!(email = %seed.email, "admin user seeded");
    } else {
        debug!(email = %seed.email, "admin user already present");
    }
    Ok(created)
}
