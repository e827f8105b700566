use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::query::{push_filter, Condition, FilterValue};
use crate::status::ResultStatus;

/// User record in the database.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub user_id: Uuid,
    pub username: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String, // Argon2 PHC string, not exposed in JSON
    pub email_validated: bool,
    pub created: i64, // epoch milliseconds
    pub updated: i64, // epoch milliseconds
}

/// Partial update. Each field is independently optional: `Some("")` and
/// `Some(false)` are real updates, distinct from "not supplied".
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UserChanges {
    pub username: Option<String>,
    pub email: Option<String>,
    pub password_hash: Option<String>,
    pub email_validated: Option<bool>,
}

impl UserChanges {
    pub fn is_empty(&self) -> bool {
        self.username.is_none()
            && self.email.is_none()
            && self.password_hash.is_none()
            && self.email_validated.is_none()
    }
}

/// Write shape accepted by `put`: updates when `user_id` is present,
/// creates otherwise.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UserWrite {
    pub user_id: Option<Uuid>,
    pub username: Option<String>,
    pub email: Option<String>,
    pub password_hash: Option<String>,
    pub email_validated: Option<bool>,
}

/// Lookup criteria; present fields are OR-joined.
#[derive(Debug, Clone, Default)]
pub struct UserFilter {
    pub user_id: Option<FilterValue<Uuid>>,
    pub username: Option<FilterValue<String>>,
    pub email: Option<FilterValue<String>>,
}

impl UserFilter {
    pub fn by_id(user_id: Uuid) -> Self {
        Self {
            user_id: Some(FilterValue::One(user_id)),
            ..Self::default()
        }
    }

    pub fn by_ids(user_ids: Vec<Uuid>) -> Self {
        Self {
            user_id: Some(FilterValue::Many(user_ids)),
            ..Self::default()
        }
    }

    pub fn by_username(username: &str) -> Self {
        Self {
            username: Some(FilterValue::One(username.to_owned())),
            ..Self::default()
        }
    }

    /// Matches rows under either identifying attribute. Used by the
    /// registration duplicate check.
    pub fn by_identity(username: Option<&str>, email: Option<&str>) -> Self {
        Self {
            user_id: None,
            username: username.map(|v| FilterValue::One(v.to_owned())),
            email: email.map(|v| FilterValue::One(v.to_owned())),
        }
    }

    pub fn conditions(&self) -> Vec<Condition> {
        let mut conditions = Vec::new();
        push_filter(&mut conditions, "user_id", self.user_id.as_ref());
        push_filter(&mut conditions, "username", self.username.as_ref());
        push_filter(&mut conditions, "email", self.email.as_ref());
        conditions
    }
}

/// Uniform result shape for user operations.
#[derive(Debug, Serialize)]
pub struct UserResult {
    pub status: ResultStatus,
    pub users: Vec<User>,
}

impl UserResult {
    pub(crate) fn new(status: ResultStatus, users: Vec<User>) -> Self {
        Self { status, users }
    }

    pub(crate) fn invalid() -> Self {
        Self::new(ResultStatus::Invalid, Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serialized_user_omits_password_hash() {
        let user = User {
            user_id: Uuid::new_v4(),
            username: "alice".into(),
            email: "a@example.com".into(),
            password_hash: "$argon2id$v=19$secret".into(),
            email_validated: false,
            created: 0,
            updated: 0,
        };
        let value = serde_json::to_value(&user).unwrap();
        assert!(value.get("password_hash").is_none());
        assert_eq!(value["username"], "alice");
    }

    #[test]
    fn identity_filter_skips_absent_fields() {
        let filter = UserFilter::by_identity(Some("alice"), None);
        assert_eq!(filter.conditions().len(), 1);
        let filter = UserFilter::by_identity(None, None);
        assert!(filter.conditions().is_empty());
    }

    #[test]
    fn empty_changes_detected() {
        assert!(UserChanges::default().is_empty());
        let changes = UserChanges {
            email_validated: Some(false),
            ..UserChanges::default()
        };
        assert!(!changes.is_empty());
    }
}
