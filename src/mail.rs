//! Outbound mail capability.
//!
//! The rest of the crate only sees the [`Mailer`] trait: dispatch either
//! succeeds or fails as a status, never as an error, and a rejection by
//! the transport is indistinguishable from a transport error.

use anyhow::Context;
use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::{Mailbox, MultiPart};
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use serde::Serialize;
use tracing::{error, warn};

use crate::config::SmtpConfig;
use crate::status::ResultStatus;

#[derive(Debug, Clone, Serialize)]
pub struct MailMessage {
    pub to: String,
    pub subject: String,
    pub text: String,
    pub html: Option<String>,
}

/// Outcome of one dispatch attempt.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct Delivery {
    pub status: ResultStatus,
}

impl Delivery {
    pub fn succeeded() -> Self {
        Self {
            status: ResultStatus::Success,
        }
    }

    pub fn failed() -> Self {
        Self {
            status: ResultStatus::Failed,
        }
    }
}

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, message: &MailMessage) -> Delivery;
}

/// SMTP-backed mailer. Plain transport: the relay is expected on a
/// trusted network segment (local submission port, no TLS).
pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl SmtpMailer {
    pub fn new(config: &SmtpConfig) -> anyhow::Result<Self> {
        let transport = AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&config.host)
            .port(config.port)
            .build();
        let from = config
            .from
            .parse()
            .with_context(|| format!("parse mail sender address {:?}", config.from))?;
        Ok(Self { transport, from })
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send(&self, message: &MailMessage) -> Delivery {
        let to: Mailbox = match message.to.parse() {
            Ok(mailbox) => mailbox,
            Err(e) => {
                warn!(error = %e, to = %message.to, "unroutable recipient address");
                return Delivery::failed();
            }
        };

        let builder = Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(message.subject.clone());
        let email = match &message.html {
            Some(html) => builder.multipart(MultiPart::alternative_plain_html(
                message.text.clone(),
                html.clone(),
            )),
            None => builder
                .header(ContentType::TEXT_PLAIN)
                .body(message.text.clone()),
        };
        let email = match email {
            Ok(email) => email,
            Err(e) => {
                error!(error = %e, "build mail message");
                return Delivery::failed();
            }
        };

        match self.transport.send(email).await {
            Ok(response) if response.is_positive() => Delivery::succeeded(),
            Ok(response) => {
                warn!(code = %response.code(), "mail transport rejected message");
                Delivery::failed()
            }
            Err(e) => {
                error!(error = %e, "mail dispatch failed");
                Delivery::failed()
            }
        }
    }
}


#[cfg(test)]
mod tests {
    use super::mock::RecordingMailer;
    use super::*;

    fn sample_message() -> MailMessage {
        MailMessage {
            to: "someone@example.com".into(),
            subject: "Hello".into(),
            text: "Hello world".into(),
            html: None,
        }
    }

    #[tokio::test]
    async fn recording_mailer_captures_messages() {
        let mailer = RecordingMailer::default();
        let delivery = mailer.send(&sample_message()).await;
        assert_eq!(delivery.status, ResultStatus::Success);
        let messages = mailer.messages().await;
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].to, "someone@example.com");
    }

    #[tokio::test]
    async fn refusing_mailer_reports_failed_and_records_nothing() {
        let mailer = RecordingMailer::default();
        mailer.set_refuse(true).await;
        let delivery = mailer.send(&sample_message()).await;
        assert_eq!(delivery.status, ResultStatus::Failed);
        assert!(mailer.messages().await.is_empty());
    }

    #[tokio::test]
    async fn smtp_mailer_rejects_malformed_sender() {
        let config = SmtpConfig {
            host: "127.0.0.1".into(),
            port: 1025,
            from: "not an address".into(),
        };
        assert!(SmtpMailer::new(&config).is_err());
    }
}
