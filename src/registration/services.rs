//! Registration workflow.
//!
//! Persisting the user and delivering the verification email are not
//! atomic: the user row is never rolled back when the email step fails.
//! Callers get the failing sub-step's status plus the created user, and
//! can re-invoke [`send_email_verification`] on its own.

use anyhow::Context;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use lazy_static::lazy_static;
use rand::RngCore;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use crate::mail::MailMessage;
use crate::state::AppState;
use crate::status::ResultStatus;
use crate::tokens::dto::{EmailVerificationToken, TokenFilter};
use crate::tokens::repo::EmailTokenRepository;
use crate::users::dto::{User, UserChanges, UserFilter};
use crate::users::repo::UserRepository;

use super::password::hash_password;

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

/// Registration payload as it arrives from the transport layer; fields
/// missing from the request body are `None`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RegistrationRequest {
    pub username: Option<String>,
    pub email: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct FieldError {
    pub field: &'static str,
    pub message: &'static str,
}

#[derive(Debug, Serialize)]
pub struct RegistrationOutcome {
    pub status: ResultStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<User>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conflicting_user: Option<User>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub validation_errors: Vec<FieldError>,
}

impl RegistrationOutcome {
    fn with_status(status: ResultStatus) -> Self {
        Self {
            status,
            user: None,
            conflicting_user: None,
            message: None,
            validation_errors: Vec::new(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct VerificationOutcome {
    pub status: ResultStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<EmailVerificationToken>,
}

#[derive(Debug, Serialize)]
pub struct ConfirmationOutcome {
    pub status: ResultStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<User>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

fn validate(request: &RegistrationRequest) -> Vec<FieldError> {
    let mut errors = Vec::new();
    if request.username.as_deref().unwrap_or("").is_empty() {
        errors.push(FieldError {
            field: "username",
            message: "username is required",
        });
    }
    match request.password.as_deref() {
        None | Some("") => errors.push(FieldError {
            field: "password",
            message: "password is required",
        }),
        Some(password) if password.len() < 2 => errors.push(FieldError {
            field: "password",
            message: "password must be more than 1 character long",
        }),
        Some(_) => {}
    }
    match request.email.as_deref() {
        None | Some("") => errors.push(FieldError {
            field: "email",
            message: "email is required",
        }),
        Some(email) if !is_valid_email(email) => errors.push(FieldError {
            field: "email",
            message: "email address is not well-formed",
        }),
        Some(_) => {}
    }
    errors
}

/// Registers a new user and dispatches the verification email.
///
/// Duplicate check, validation, persist, then issue + deliver; the first
/// failing step terminates the flow, except the email step, whose
/// failure is reported alongside the user that was already created.
#[instrument(skip(state, request))]
pub async fn register(
    state: &AppState,
    request: RegistrationRequest,
) -> anyhow::Result<RegistrationOutcome> {
    let users = UserRepository::new(state.db.clone());

    // A row matching either identifying attribute terminates the flow
    // before any credential work. Concurrent registrations can both pass
    // this check; the UNIQUE constraints are the final arbiter and a
    // violation surfaces from `create` as an error.
    let duplicate_filter = UserFilter::by_identity(
        request.username.as_deref().filter(|v| !v.is_empty()),
        request.email.as_deref().filter(|v| !v.is_empty()),
    );
    if !duplicate_filter.conditions().is_empty() {
        let existing = users.get(&duplicate_filter).await?;
        if let Some(conflicting) = existing.users.into_iter().next() {
            warn!(username = %conflicting.username, "registration conflicts with existing user");
            return Ok(RegistrationOutcome {
                conflicting_user: Some(conflicting),
                ..RegistrationOutcome::with_status(ResultStatus::Conflict)
            });
        }
    }

    let validation_errors = validate(&request);
    if !validation_errors.is_empty() {
        return Ok(RegistrationOutcome {
            message: Some("Validation failed".to_string()),
            validation_errors,
            ..RegistrationOutcome::with_status(ResultStatus::Invalid)
        });
    }
    let username = request.username.unwrap_or_default();
    let email = request.email.unwrap_or_default();
    let password_hash = hash_password(&request.password.unwrap_or_default())?;

    let created = users.create(&username, &email, &password_hash).await?;
    let created_status = created.status;
    if !created_status.is_successful() {
        return Ok(RegistrationOutcome::with_status(created_status));
    }
    let user = created
        .users
        .into_iter()
        .next()
        .context("created user row missing from result")?;

    let verification = send_email_verification(state, &user).await?;
    if !verification.status.is_successful() {
        return Ok(RegistrationOutcome {
            user: Some(user),
            message: Some("Failed to send verification email.".to_string()),
            ..RegistrationOutcome::with_status(verification.status)
        });
    }

    info!(user_id = %user.user_id, username = %user.username, "user registered");
    Ok(RegistrationOutcome {
        user: Some(user),
        ..RegistrationOutcome::with_status(created_status)
    })
}

/// Issues a fresh verification token and emails its link to the user.
///
/// Safe to call again for a user who already holds tokens: earlier
/// tokens stay valid until consumed or swept.
#[instrument(skip(state, user), fields(user_id = %user.user_id))]
pub async fn send_email_verification(
    state: &AppState,
    user: &User,
) -> anyhow::Result<VerificationOutcome> {
    let tokens = EmailTokenRepository::new(state.db.clone());

    let token_value = generate_token();
    let issued = tokens.create(user.user_id, &token_value).await?;
    let issued_status = issued.status;
    if !issued_status.is_successful() {
        return Ok(VerificationOutcome {
            status: issued_status,
            token: None,
        });
    }
    let record = issued
        .tokens
        .into_iter()
        .next()
        .context("issued token row missing from result")?;

    let link = format!(
        "{}/verify/{}",
        state.config.verify_base_url.trim_end_matches('/'),
        token_value
    );
    let message = MailMessage {
        to: user.email.clone(),
        subject: "Please verify your email address".to_string(),
        text: verification_body(&user.username, &link),
        html: None,
    };
    let delivery = state.mailer.send(&message).await;
    if !delivery.status.is_successful() {
        warn!(user_id = %user.user_id, "verification email dispatch failed");
        return Ok(VerificationOutcome {
            status: delivery.status,
            token: Some(record),
        });
    }

    Ok(VerificationOutcome {
        status: issued_status,
        token: Some(record),
    })
}

/// Completes verification for a presented token value.
///
/// Marks the owning user validated, then consumes only the presented
/// token; other live tokens for the user stay valid. The two steps
/// report independently: a failure after the update leaves the user
/// validated and the token live, and a re-run converges.
#[instrument(skip(state, token_value))]
pub async fn confirm_email(
    state: &AppState,
    token_value: &str,
) -> anyhow::Result<ConfirmationOutcome> {
    if token_value.is_empty() {
        return Ok(ConfirmationOutcome {
            status: ResultStatus::Invalid,
            user: None,
            message: Some("a verification token is required".to_string()),
        });
    }
    let tokens = EmailTokenRepository::new(state.db.clone());
    let users = UserRepository::new(state.db.clone());

    let found = tokens.get(&TokenFilter::by_value(token_value)).await?;
    let Some(record) = found.tokens.into_iter().next() else {
        return Ok(ConfirmationOutcome {
            status: ResultStatus::Invalid,
            user: None,
            message: Some("unknown verification token".to_string()),
        });
    };

    let changes = UserChanges {
        email_validated: Some(true),
        ..UserChanges::default()
    };
    let updated = users.update(record.user_id, &changes).await?;
    if !updated.status.is_successful() {
        // The owning user is gone; the orphaned token is left for the
        // expiry sweep.
        return Ok(ConfirmationOutcome {
            status: updated.status,
            user: None,
            message: Some("token does not belong to a live user".to_string()),
        });
    }
    let user = updated
        .users
        .into_iter()
        .next()
        .context("updated user row missing from result")?;

    tokens.delete(&TokenFilter::by_id(record.token_id)).await?;

    info!(user_id = %user.user_id, "email address verified");
    Ok(ConfirmationOutcome {
        status: ResultStatus::Success,
        user: Some(user),
        message: None,
    })
}

fn verification_body(username: &str, link: &str) -> String {
    format!(
        "Dear {username},\n\n\
         We are delighted to have you register. Please follow the link below to verify your email address.\n\n\
         {link}\n\n\
         Have a great day.\n\
         The Service Team"
    )
}

/// 48 random bytes, base64url-encoded: opaque and URL-safe.
fn generate_token() -> String {
    let mut bytes = [0u8; 48];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mail::mock::RecordingMailer;
    use crate::registration::password::verify_password;
    use std::sync::Arc;

    fn request(username: &str, email: &str, password: Option<&str>) -> RegistrationRequest {
        RegistrationRequest {
            username: Some(username.to_string()),
            email: Some(email.to_string()),
            password: password.map(str::to_string),
        }
    }

    async fn fixture() -> (AppState, Arc<RecordingMailer>) {
        AppState::ephemeral().await.expect("ephemeral state")
    }

    #[tokio::test]
    async fn happy_path_creates_user_token_and_email() {
        let (state, mailer) = fixture().await;

        let outcome = register(&state, request("alice", "a@example.com", Some("secret1")))
            .await
            .unwrap();
        assert_eq!(outcome.status, ResultStatus::Created);
        assert!(outcome.conflicting_user.is_none());
        assert!(outcome.message.is_none());
        let user = outcome.user.expect("created user");
        assert_eq!(user.username, "alice");
        assert!(!user.email_validated);

        // The password is stored only as a verifiable hash and never
        // serialized outward.
        assert!(verify_password("secret1", &user.password_hash).unwrap());
        let serialized = serde_json::to_value(&user).unwrap();
        assert!(serialized.get("password_hash").is_none());
        assert!(serialized.get("password").is_none());

        // Exactly one token exists and the email body carries its link.
        let tokens = EmailTokenRepository::new(state.db.clone());
        let stored = tokens.get(&TokenFilter::by_user(user.user_id)).await.unwrap();
        assert_eq!(stored.tokens.len(), 1);
        let messages = mailer.messages().await;
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].to, "a@example.com");
        assert!(messages[0]
            .text
            .contains(&format!("/verify/{}", stored.tokens[0].token)));
    }

    #[tokio::test]
    async fn duplicate_username_conflicts_and_creates_nothing() {
        let (state, mailer) = fixture().await;
        let first = register(&state, request("alice", "a@example.com", Some("secret1")))
            .await
            .unwrap();
        assert_eq!(first.status, ResultStatus::Created);

        let second = register(&state, request("alice", "other@example.com", Some("secret2")))
            .await
            .unwrap();
        assert_eq!(second.status, ResultStatus::Conflict);
        assert!(second.user.is_none());
        let conflicting = second.conflicting_user.expect("conflicting user");
        assert_eq!(conflicting.username, "alice");

        let users = UserRepository::new(state.db.clone());
        let rows = users.get(&UserFilter::by_username("alice")).await.unwrap();
        assert_eq!(rows.users.len(), 1);
        // Only the first registration sent mail.
        assert_eq!(mailer.messages().await.len(), 1);
    }

    #[tokio::test]
    async fn missing_password_is_invalid_with_no_side_effects() {
        let (state, mailer) = fixture().await;

        let outcome = register(&state, request("alice", "a@example.com", None))
            .await
            .unwrap();
        assert_eq!(outcome.status, ResultStatus::Invalid);
        assert!(outcome.user.is_none());
        assert!(outcome
            .validation_errors
            .iter()
            .any(|e| e.field == "password"));

        let users = UserRepository::new(state.db.clone());
        let rows = users.get(&UserFilter::by_username("alice")).await.unwrap();
        assert!(rows.users.is_empty());
        assert!(mailer.messages().await.is_empty());
    }

    #[tokio::test]
    async fn empty_request_is_invalid() {
        let (state, _mailer) = fixture().await;
        let outcome = register(&state, RegistrationRequest::default())
            .await
            .unwrap();
        assert_eq!(outcome.status, ResultStatus::Invalid);
        assert_eq!(outcome.validation_errors.len(), 3);
    }

    #[tokio::test]
    async fn malformed_email_is_invalid() {
        let (state, _mailer) = fixture().await;
        let outcome = register(&state, request("alice", "not-an-email", Some("secret1")))
            .await
            .unwrap();
        assert_eq!(outcome.status, ResultStatus::Invalid);
        assert!(outcome.validation_errors.iter().any(|e| e.field == "email"));
    }

    #[tokio::test]
    async fn mail_failure_keeps_the_user_and_reports_it() {
        let (state, mailer) = fixture().await;
        mailer.set_refuse(true).await;

        let outcome = register(&state, request("alice", "a@example.com", Some("secret1")))
            .await
            .unwrap();
        assert_eq!(outcome.status, ResultStatus::Failed);
        assert_eq!(
            outcome.message.as_deref(),
            Some("Failed to send verification email.")
        );
        let user = outcome.user.expect("user row was kept");

        // The row exists, so the email step can be retried on its own.
        let users = UserRepository::new(state.db.clone());
        let rows = users.get(&UserFilter::by_id(user.user_id)).await.unwrap();
        assert_eq!(rows.users.len(), 1);

        mailer.set_refuse(false).await;
        let retried = send_email_verification(&state, &user).await.unwrap();
        assert_eq!(retried.status, ResultStatus::Created);
        assert_eq!(mailer.messages().await.len(), 1);
    }

    #[tokio::test]
    async fn reissuing_keeps_earlier_tokens_valid() {
        let (state, _mailer) = fixture().await;
        let outcome = register(&state, request("alice", "a@example.com", Some("secret1")))
            .await
            .unwrap();
        let user = outcome.user.unwrap();

        send_email_verification(&state, &user).await.unwrap();

        let tokens = EmailTokenRepository::new(state.db.clone());
        let stored = tokens.get(&TokenFilter::by_user(user.user_id)).await.unwrap();
        assert_eq!(stored.tokens.len(), 2);
    }

    #[tokio::test]
    async fn confirm_email_validates_user_and_consumes_only_that_token() {
        let (state, _mailer) = fixture().await;
        let outcome = register(&state, request("alice", "a@example.com", Some("secret1")))
            .await
            .unwrap();
        let user = outcome.user.unwrap();
        send_email_verification(&state, &user).await.unwrap();

        let tokens = EmailTokenRepository::new(state.db.clone());
        let stored = tokens.get(&TokenFilter::by_user(user.user_id)).await.unwrap();
        assert_eq!(stored.tokens.len(), 2);
        let consumed = stored.tokens[0].token.clone();
        let kept = stored.tokens[1].token.clone();

        let confirmed = confirm_email(&state, &consumed).await.unwrap();
        assert_eq!(confirmed.status, ResultStatus::Success);
        assert!(confirmed.user.unwrap().email_validated);

        let remaining = tokens.get(&TokenFilter::by_user(user.user_id)).await.unwrap();
        assert_eq!(remaining.tokens.len(), 1);
        assert_eq!(remaining.tokens[0].token, kept);

        // Status-level idempotence: a second confirmation through the
        // remaining token still succeeds.
        let again = confirm_email(&state, &kept).await.unwrap();
        assert_eq!(again.status, ResultStatus::Success);
        assert!(again.user.unwrap().email_validated);
    }

    #[tokio::test]
    async fn confirm_email_rejects_unknown_or_empty_tokens() {
        let (state, _mailer) = fixture().await;
        let outcome = confirm_email(&state, "no-such-token").await.unwrap();
        assert_eq!(outcome.status, ResultStatus::Invalid);
        let outcome = confirm_email(&state, "").await.unwrap();
        assert_eq!(outcome.status, ResultStatus::Invalid);
    }

    #[tokio::test]
    async fn confirm_email_for_deleted_user_is_invalid() {
        let (state, _mailer) = fixture().await;
        let outcome = register(&state, request("alice", "a@example.com", Some("secret1")))
            .await
            .unwrap();
        let user = outcome.user.unwrap();

        let tokens = EmailTokenRepository::new(state.db.clone());
        let stored = tokens.get(&TokenFilter::by_user(user.user_id)).await.unwrap();
        let token_value = stored.tokens[0].token.clone();

        // Deleting the user does not cascade to tokens.
        let users = UserRepository::new(state.db.clone());
        users.delete(&UserFilter::by_id(user.user_id)).await.unwrap();

        let confirmed = confirm_email(&state, &token_value).await.unwrap();
        assert_eq!(confirmed.status, ResultStatus::Invalid);
        assert!(confirmed.user.is_none());
    }

    #[test]
    fn generated_tokens_are_opaque_and_url_safe() {
        let token = generate_token();
        assert_eq!(token.len(), 64);
        assert!(token
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
        assert_ne!(token, generate_token());
    }

    #[test]
    fn email_format_check() {
        assert!(is_valid_email("a@example.com"));
        assert!(!is_valid_email("not-an-email"));
        assert!(!is_valid_email("@example.com"));
        assert!(!is_valid_email("a@"));
    }
}
