//! ExamVault - university exam question archive

use anyhow::Result;
use std::path::Path;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use examvault::{
    api::{self, AppState},
    cache::create_cache,
    config::Config,
    db,
    services::{LocalObjectStore, SmtpMailer},
};

const CLEANUP_INTERVAL: Duration = Duration::from_secs(300);

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "examvault=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting ExamVault...");

    let config_path =
        std::env::var("EXAMVAULT_CONFIG").unwrap_or_else(|_| "config.yml".to_string());
    let config = Config::load_with_env(Path::new(&config_path))?;
    tracing::info!("Configuration loaded from {}", config_path);

    let pool = db::create_pool(&config.database).await?;
    tracing::info!("Database connected: {:?}", config.database.driver);

    let applied = db::migrations::run_migrations(&pool).await?;
    tracing::info!("Database migrations completed ({} applied)", applied);

    let cache = create_cache(&config.cache).await?;
    tracing::info!("Cache initialized");

    tokio::fs::create_dir_all(&config.storage.path).await?;
    let store = LocalObjectStore::from_config(&config.storage).boxed();
    tracing::info!("Object store at {}", config.storage.path.display());

    if !config.email.is_configured() {
        tracing::warn!("Email is not configured; feedback is disabled and reset tokens are only logged");
    }
    let mailer = SmtpMailer::boxed(config.email.clone());

    let state = AppState::new(pool, cache, store, mailer, &config);

    // Periodic cleanup of rate limiter windows, expired sessions and reset tokens
    {
        let limiter = state.rate_limiter.clone();
        let users = state.user_service.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(CLEANUP_INTERVAL);
            loop {
                interval.tick().await;
                limiter.cleanup().await;
                match users.cleanup_expired().await {
                    Ok((sessions, resets)) if sessions + resets > 0 => tracing::debug!(
                        "Removed {} expired sessions and {} reset tokens",
                        sessions,
                        resets
                    ),
                    Ok(_) => {}
                    Err(e) => tracing::warn!("Cleanup of expired sessions failed: {}", e),
                }
            }
        });
    }

    let app = api::build_router(state, &config.server.cors_origin);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on http://{}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}
