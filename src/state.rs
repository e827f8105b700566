use std::sync::Arc;

use sqlx::SqlitePool;

use crate::config::AppConfig;
use crate::db;
use crate::mail::{Mailer, SmtpMailer};

/// Shared handles every operation works against. Construction is
/// explicit and caller-owned; there is no process-wide singleton.
#[derive(Clone)]
pub struct AppState {
    pub db: SqlitePool,
    pub config: Arc<AppConfig>,
    pub mailer: Arc<dyn Mailer>,
}

impl AppState {
    pub async fn init() -> anyhow::Result<Self> {
        let config = Arc::new(AppConfig::from_env()?);
        let db = db::connect(&config.database).await?;
        let mailer = Arc::new(SmtpMailer::new(&config.smtp)?) as Arc<dyn Mailer>;
        Ok(Self { db, config, mailer })
    }

    pub fn from_parts(db: SqlitePool, config: Arc<AppConfig>, mailer: Arc<dyn Mailer>) -> Self {
        Self { db, config, mailer }
    }
}

#[cfg(test)]
impl AppState {
    /// State over a private in-memory database plus a recording mailer.
    ///
    /// The pool is pinned to a single connection that is never reclaimed,
    /// so the in-memory database lives as long as the pool.
    pub(crate) async fn ephemeral() -> anyhow::Result<(Self, Arc<crate::mail::mock::RecordingMailer>)>
    {
        use sqlx::sqlite::SqlitePoolOptions;

        let db = SqlitePoolOptions::new()
            .min_connections(1)
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;
        db::migrate(&db).await?;

        let config = Arc::new(AppConfig::for_tests());
        let mailer = Arc::new(crate::mail::mock::RecordingMailer::default());
        let state = Self::from_parts(db, config, mailer.clone());
        Ok((state, mailer))
    }
}
