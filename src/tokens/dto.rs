use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::query::{push_filter, Condition, FilterValue};
use crate::status::ResultStatus;

/// One issued email-verification token. Records are never mutated:
/// they are created, consumed (deleted) or swept.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct EmailVerificationToken {
    pub token_id: Uuid,
    pub user_id: Uuid,
    pub token: String,
    pub created: i64, // epoch milliseconds
}

/// Lookup criteria; present fields are OR-joined.
#[derive(Debug, Clone, Default)]
pub struct TokenFilter {
    pub token_id: Option<FilterValue<Uuid>>,
    pub user_id: Option<FilterValue<Uuid>>,
    pub token: Option<FilterValue<String>>,
}

impl TokenFilter {
    pub fn by_id(token_id: Uuid) -> Self {
        Self {
            token_id: Some(FilterValue::One(token_id)),
            ..Self::default()
        }
    }

    pub fn by_user(user_id: Uuid) -> Self {
        Self {
            user_id: Some(FilterValue::One(user_id)),
            ..Self::default()
        }
    }

    pub fn by_value(token: &str) -> Self {
        Self {
            token: Some(FilterValue::One(token.to_owned())),
            ..Self::default()
        }
    }

    pub fn conditions(&self) -> Vec<Condition> {
        let mut conditions = Vec::new();
        push_filter(&mut conditions, "token_id", self.token_id.as_ref());
        push_filter(&mut conditions, "user_id", self.user_id.as_ref());
        push_filter(&mut conditions, "token", self.token.as_ref());
        conditions
    }
}

/// Uniform result shape for token operations.
#[derive(Debug, Serialize)]
pub struct TokenResult {
    pub status: ResultStatus,
    pub tokens: Vec<EmailVerificationToken>,
}

impl TokenResult {
    pub(crate) fn new(status: ResultStatus, tokens: Vec<EmailVerificationToken>) -> Self {
        Self { status, tokens }
    }

    pub(crate) fn invalid() -> Self {
        Self::new(ResultStatus::Invalid, Vec::new())
    }
}
