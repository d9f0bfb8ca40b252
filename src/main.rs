use std::sync::Arc;

use anyhow::Context;
use sqlx::postgres::PgPoolOptions;

mod app;
mod auth;
mod config;
mod error;
mod notify;
mod state;
mod store;

use crate::config::AppConfig;
use crate::notify::{NotificationSender, SmtpMailer};
use crate::state::AppState;
use crate::store::{PgUserStore, UserStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let env_filter = std::env::var("RUST_LOG")
        .unwrap_or_else(|_| "limitless_backend=debug,axum=info,tower_http=info".to_string());
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

    let config = Arc::new(AppConfig::from_env()?);

    let db = PgPoolOptions::new()
        .max_connections(10)
        .connect(&config.database_url)
        .await
        .context("connect to database")?;

    if let Err(e) = sqlx::migrate!("./migrations").run(&db).await {
        tracing::warn!(error = %e, "migrations folder not found or migration failed; continuing");
    }

    let store = Arc::new(PgUserStore::new(db.clone())) as Arc<dyn UserStore>;
    let mailer = Arc::new(SmtpMailer::new(&config.smtp)?) as Arc<dyn NotificationSender>;
    let state = AppState::from_parts(store, mailer, config);

    let app = app::build_app(state);
    app::serve(app).await?;

    // serve returns after the listener stops and in-flight requests drain.
    db.close().await;
    tracing::info!("database pool closed, exiting");
    Ok(())
}
