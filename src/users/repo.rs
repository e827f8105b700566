use anyhow::Context;
use sqlx::{QueryBuilder, Sqlite, SqlitePool};
use tracing::debug;
use uuid::Uuid;

use crate::db::unix_millis;
use crate::query::apply_conditions;
use crate::status::ResultStatus;

use super::dto::{User, UserChanges, UserFilter, UserResult, UserWrite};

const USER_COLUMNS: &str =
    "user_id, username, email, password_hash, email_validated, created, updated";

/// Data access for the `users` table.
///
/// The pool handle is passed in by the caller; each operation holds one
/// short-lived connection borrow for the duration of one query. Expected
/// business outcomes come back as statuses; only infrastructure failures
/// (pool timeouts, connection loss, uniqueness violations) are errors.
#[derive(Clone)]
pub struct UserRepository {
    db: SqlitePool,
}

impl UserRepository {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    /// Inserts a new user with a fresh id and timestamps.
    ///
    /// No uniqueness pre-check happens here: a duplicate username or
    /// email fails on the constraint and surfaces as an error, so there
    /// is no get-then-insert race window at this layer.
    pub async fn create(
        &self,
        username: &str,
        email: &str,
        password_hash: &str,
    ) -> anyhow::Result<UserResult> {
        if username.is_empty() || email.is_empty() || password_hash.is_empty() {
            return Ok(UserResult::invalid());
        }
        let now = unix_millis();
        let user = sqlx::query_as::<_, User>(
            r#"
            INSERT INTO users (user_id, username, email, password_hash, email_validated, created, updated)
            VALUES ($1, $2, $3, $4, FALSE, $5, $5)
            RETURNING user_id, username, email, password_hash, email_validated, created, updated
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(username)
        .bind(email)
        .bind(password_hash)
        .bind(now)
        .fetch_one(&self.db)
        .await
        .context("insert user")?;
        debug!(user_id = %user.user_id, "user created");
        Ok(UserResult::new(ResultStatus::Created, vec![user]))
    }

    /// Applies the supplied fields only; `updated` is always refreshed.
    ///
    /// A `user_id` matching no row is reported as `INVALID`: silently
    /// succeeding on a no-op would be indistinguishable from an update.
    pub async fn update(&self, user_id: Uuid, changes: &UserChanges) -> anyhow::Result<UserResult> {
        if changes.is_empty() {
            return Ok(UserResult::invalid());
        }

        let mut qb = QueryBuilder::<Sqlite>::new("UPDATE users SET ");
        let mut set = qb.separated(", ");
        if let Some(username) = &changes.username {
            set.push("username = ").push_bind_unseparated(username.clone());
        }
        if let Some(email) = &changes.email {
            set.push("email = ").push_bind_unseparated(email.clone());
        }
        if let Some(password_hash) = &changes.password_hash {
            set.push("password_hash = ")
                .push_bind_unseparated(password_hash.clone());
        }
        if let Some(email_validated) = changes.email_validated {
            set.push("email_validated = ")
                .push_bind_unseparated(email_validated);
        }
        set.push("updated = ").push_bind_unseparated(unix_millis());
        qb.push(" WHERE user_id = ").push_bind(user_id);
        qb.push(" RETURNING ").push(USER_COLUMNS);

        let users = qb
            .build_query_as::<User>()
            .fetch_all(&self.db)
            .await
            .context("update user")?;
        if users.is_empty() {
            return Ok(UserResult::invalid());
        }
        debug!(user_id = %user_id, "user updated");
        Ok(UserResult::new(ResultStatus::Success, users))
    }

    /// Looks up users by OR-joined criteria. Zero matches is a normal
    /// `SUCCESS` with an empty list.
    pub async fn get(&self, filter: &UserFilter) -> anyhow::Result<UserResult> {
        let conditions = filter.conditions();
        if conditions.is_empty() {
            return Ok(UserResult::invalid());
        }
        let mut qb =
            QueryBuilder::<Sqlite>::new(format!("SELECT {USER_COLUMNS} FROM users WHERE "));
        apply_conditions(&mut qb, &conditions);
        let users = qb
            .build_query_as::<User>()
            .fetch_all(&self.db)
            .await
            .context("select users")?;
        Ok(UserResult::new(ResultStatus::Success, users))
    }

    /// Removes matching users and returns them. Zero matches is a normal
    /// `DELETED` with an empty list.
    pub async fn delete(&self, filter: &UserFilter) -> anyhow::Result<UserResult> {
        let conditions = filter.conditions();
        if conditions.is_empty() {
            return Ok(UserResult::invalid());
        }
        let mut qb = QueryBuilder::<Sqlite>::new("DELETE FROM users WHERE ");
        apply_conditions(&mut qb, &conditions);
        qb.push(" RETURNING ").push(USER_COLUMNS);
        let users = qb
            .build_query_as::<User>()
            .fetch_all(&self.db)
            .await
            .context("delete users")?;
        debug!(removed = users.len(), "users deleted");
        Ok(UserResult::new(ResultStatus::Deleted, users))
    }

    /// Dispatch: update when `user_id` is present, create otherwise.
    pub async fn put(&self, write: UserWrite) -> anyhow::Result<UserResult> {
        match write.user_id {
            Some(user_id) => {
                let changes = UserChanges {
                    username: write.username,
                    email: write.email,
                    password_hash: write.password_hash,
                    email_validated: write.email_validated,
                };
                self.update(user_id, &changes).await
            }
            None => {
                self.create(
                    write.username.as_deref().unwrap_or(""),
                    write.email.as_deref().unwrap_or(""),
                    write.password_hash.as_deref().unwrap_or(""),
                )
                .await
            }
        }
    }
}
