use std::time::Duration;

mod app;
mod auth;
mod config;
mod email;
mod seed;
mod state;

use crate::{app::build_app, seed::AdminSeed, state::AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let env_filter = std::env::var("RUST_LOG")
        .unwrap_or_else(|_| "keyhole=debug,axum=info,tower_http=info".to_string());
    let json_logs = std::env::var("LOG_FORMAT")
        .map(|v| v == "json")
        .unwrap_or(false);

    if json_logs {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    }

    let (app_state, pg) = AppState::init().await?;

    sqlx::migrate!("./migrations")
        .run(pg.pool())
        .await
        .map_err(|e| anyhow::anyhow!("migrations failed: {e}"))?;

    if let Some(admin) = AdminSeed::from_env()? {
        seed::seed_admin(&pg, &admin).await?;
    }

    let purge_every = app_state.config.purge_interval_secs;
    if purge_every > 0 {
        auth::services::spawn_purge_task(app_state.clone(), Duration::from_secs(purge_every));
    } else {
        tracing::info!("expired row purge disabled");
    }

    app::serve(build_app(app_state)).await
}
