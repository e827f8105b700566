use anyhow::Context;
use sqlx::{QueryBuilder, Sqlite, SqlitePool};
use tracing::debug;
use uuid::Uuid;

use crate::db::unix_millis;
use crate::query::apply_conditions;
use crate::status::ResultStatus;

use super::dto::{EmailVerificationToken, TokenFilter, TokenResult};

const TOKEN_COLUMNS: &str = "token_id, user_id, token, created";

/// Data access for the `email_verification_tokens` table.
///
/// Issuing a token never invalidates earlier ones: multiple live tokens
/// per user may coexist, and expiry happens only through the explicit
/// sweep.
#[derive(Clone)]
pub struct EmailTokenRepository {
    db: SqlitePool,
}

impl EmailTokenRepository {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    pub async fn create(&self, user_id: Uuid, token: &str) -> anyhow::Result<TokenResult> {
        if user_id.is_nil() || token.is_empty() {
            return Ok(TokenResult::invalid());
        }
        let record = sqlx::query_as::<_, EmailVerificationToken>(
            r#"
            INSERT INTO email_verification_tokens (token_id, user_id, token, created)
            VALUES ($1, $2, $3, $4)
            RETURNING token_id, user_id, token, created
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(user_id)
        .bind(token)
        .bind(unix_millis())
        .fetch_one(&self.db)
        .await
        .context("insert email verification token")?;
        debug!(user_id = %user_id, token_id = %record.token_id, "verification token issued");
        Ok(TokenResult::new(ResultStatus::Created, vec![record]))
    }

    /// Matching records, newest first. Zero matches is a normal
    /// `SUCCESS` with an empty list.
    pub async fn get(&self, filter: &TokenFilter) -> anyhow::Result<TokenResult> {
        let conditions = filter.conditions();
        if conditions.is_empty() {
            return Ok(TokenResult::invalid());
        }
        let mut qb = QueryBuilder::<Sqlite>::new(format!(
            "SELECT {TOKEN_COLUMNS} FROM email_verification_tokens WHERE "
        ));
        apply_conditions(&mut qb, &conditions);
        qb.push(" ORDER BY created DESC");
        let tokens = qb
            .build_query_as::<EmailVerificationToken>()
            .fetch_all(&self.db)
            .await
            .context("select email verification tokens")?;
        Ok(TokenResult::new(ResultStatus::Success, tokens))
    }

    pub async fn delete(&self, filter: &TokenFilter) -> anyhow::Result<TokenResult> {
        let conditions = filter.conditions();
        if conditions.is_empty() {
            return Ok(TokenResult::invalid());
        }
        let mut qb = QueryBuilder::<Sqlite>::new("DELETE FROM email_verification_tokens WHERE ");
        apply_conditions(&mut qb, &conditions);
        qb.push(" RETURNING ").push(TOKEN_COLUMNS);
        let tokens = qb
            .build_query_as::<EmailVerificationToken>()
            .fetch_all(&self.db)
            .await
            .context("delete email verification tokens")?;
        debug!(removed = tokens.len(), "verification tokens deleted");
        Ok(TokenResult::new(ResultStatus::Deleted, tokens))
    }

    /// Removes every record older than the cutoff and returns it.
    ///
    /// A maintenance operation, not a per-entity lookup: it always
    /// reports `DELETED`, possibly with an empty list.
    pub async fn sweep_expired(&self, max_age_hours: i64) -> anyhow::Result<TokenResult> {
        let cutoff = unix_millis() - max_age_hours * 3_600_000;
        let tokens = sqlx::query_as::<_, EmailVerificationToken>(
            r#"
            DELETE FROM email_verification_tokens
            WHERE created < $1
            RETURNING token_id, user_id, token, created
            "#,
        )
        .bind(cutoff)
        .fetch_all(&self.db)
        .await
        .context("sweep expired email verification tokens")?;
        debug!(removed = tokens.len(), max_age_hours, "expired verification tokens swept");
        Ok(TokenResult::new(ResultStatus::Deleted, tokens))
    }
}
