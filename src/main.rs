use tracing::info;

use user_service::db;
use user_service::state::AppState;
use user_service::tokens::repo::EmailTokenRepository;

/// Maintenance entry point: opens the pool, applies migrations and runs
/// the verification-token expiry sweep, then releases every connection.
/// The HTTP surface lives elsewhere; this binary owns the scheduled
/// housekeeping.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let env_filter =
        std::env::var("RUST_LOG").unwrap_or_else(|_| "user_service=debug,sqlx=warn".to_string());
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

    let state = AppState::init().await?;
    db::migrate(&state.db).await?;

    let tokens = EmailTokenRepository::new(state.db.clone());
    let swept = tokens
        .sweep_expired(state.config.token_max_age_hours)
        .await?;
    info!(
        removed = swept.tokens.len(),
        max_age_hours = state.config.token_max_age_hours,
        "expired verification tokens swept"
    );

    db::close(&state.db).await;
    Ok(())
}
