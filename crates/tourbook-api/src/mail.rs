//! # Outgoing Mail
//!
//! Account emails (welcome, password reset) go through the [`Mailer`]
//! trait. [`OutboxMailer`] is the built-in transport: it logs each message
//! and keeps it in an in-memory outbox that operators and tests can read.

use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;

/// What a message is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmailKind {
    /// Sent after signup; links to the account page.
    Welcome,
    /// Carries the password reset link.
    PasswordReset,
}

/// A message addressed to one user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Email {
    /// Recipient address.
    pub to: String,
    /// Recipient's first name, for the greeting.
    pub first_name: String,
    /// Link the message points at.
    pub url: String,
    /// Message purpose.
    pub kind: EmailKind,
}

impl Email {
    /// Build a message for a user with the given full name.
    pub fn new(to: &str, full_name: &str, url: String, kind: EmailKind) -> Self {
        Self {
            to: to.to_string(),
            first_name: full_name
                .split_whitespace()
                .next()
                .unwrap_or_default()
                .to_string(),
            url,
            kind,
        }
    }

    /// Subject line.
    pub fn subject(&self) -> &'static str {
        match self.kind {
            EmailKind::Welcome => "Welcome to the Natours Family!",
            EmailKind::PasswordReset => "Your password reset token (valid for only 10 minutes)",
        }
    }
}

/// Delivery failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MailError {
    /// The transport refused or dropped the message.
    #[error("mail delivery failed: {0}")]
    Delivery(String),
}

/// Sends account emails.
#[async_trait::async_trait]
pub trait Mailer: Send + Sync {
    /// Deliver one message.
    async fn send(&self, email: Email) -> Result<(), MailError>;
}

/// Logs each message and records it in memory.
#[derive(Debug, Clone, Default)]
pub struct OutboxMailer {
    outbox: Arc<Mutex<Vec<Email>>>,
}

impl OutboxMailer {
    /// Create an empty outbox.
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything sent so far, oldest first.
    pub fn sent(&self) -> Vec<Email> {
        self.outbox.lock().clone()
    }
}

#[async_trait::async_trait]
impl Mailer for OutboxMailer {
    async fn send(&self, email: Email) -> Result<(), MailError> {
        tracing::info!(to = %email.to, subject = email.subject(), "email queued");
        self.outbox.lock().push(email);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_name_is_first_word() {
        let email = Email::new(
            "ana@example.com",
            "Ana Maria Lopez",
            "http://localhost/me".into(),
            EmailKind::Welcome,
        );
        assert_eq!(email.first_name, "Ana");
        assert_eq!(email.subject(), "Welcome to the Natours Family!");
    }

    #[tokio::test]
    async fn outbox_records_messages() {
        let mailer = OutboxMailer::new();
        mailer
            .send(Email::new("a@b.io", "A", "u".into(), EmailKind::PasswordReset))
            .await
            .unwrap();
        let sent = mailer.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].kind, EmailKind::PasswordReset);
    }
}
