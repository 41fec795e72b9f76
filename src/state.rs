use std::sync::Arc;

use anyhow::Context;
use sqlx::postgres::PgPoolOptions;
use tracing::warn;

use crate::auth::repo::{AuthRepo, PgAuthRepo};
use crate::config::AppConfig;
use crate::email::{EmailClient, LogEmailClient, PostmarkEmailClient};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub repo: Arc<dyn AuthRepo>,
    pub email: Arc<dyn EmailClient>,
}

impl AppState {
    /// Connects to Postgres and builds the email client. Returns the concrete
    /// repo too so startup can run migrations on its pool.
    pub async fn init() -> anyhow::Result<(Self, PgAuthRepo)> {
        let config = Arc::new(AppConfig::from_env()?);

        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(&config.database_url)
            .await
            .context("connect to database")?;
        let repo = PgAuthRepo::new(pool);

        let email: Arc<dyn EmailClient> = match (
            &config.email.postmark_api_token,
            &config.email.default_from,
        ) {
            (Some(token), Some(from)) => Arc::new(PostmarkEmailClient::new(
                &config.email.api_url,
                token,
                from,
            )?),
            _ => {
                warn!("POSTMARK_API_TOKEN not set; emails will only be logged");
                Arc::new(LogEmailClient)
            }
        };

        let state = Self::from_parts(config, Arc::new(repo.clone()), email);
        Ok((state, repo))
    }

    pub fn from_parts(
        config: Arc<AppConfig>,
        repo: Arc<dyn AuthRepo>,
        email: Arc<dyn EmailClient>,
    ) -> Self {
        Self {
            config,
            repo,
            email,
        }
    }
}

#[cfg(test)]
pub mod fake {
    use super::*;
    use crate::auth::memory::MemoryAuthRepo;
    use crate::email::fake::RecordingEmailClient;

    /// State wired to in-memory collaborators; the handles stay with the test.
    pub struct FakeState {
        pub state: AppState,
        pub repo: Arc<MemoryAuthRepo>,
        pub email: Arc<RecordingEmailClient>,
    }

    impl FakeState {
        pub fn new() -> Self {
            Self::with_email(RecordingEmailClient::default())
        }

        pub fn with_email(email: RecordingEmailClient) -> Self {
            Self::with_config(AppConfig::for_tests(), email)
        }

        pub fn with_config(config: AppConfig, email: RecordingEmailClient) -> Self {
            let repo = Arc::new(MemoryAuthRepo::new());
            let email = Arc::new(email);
            let state = AppState::from_parts(Arc::new(config), repo.clone(), email.clone());
            Self { state, repo, email }
        }
    }
}
