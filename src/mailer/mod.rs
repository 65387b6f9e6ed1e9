//! Outbound mail.
//!
//! Mail is only ever sent from background tasks; a failure is logged by the
//! task and never reaches the request that scheduled it.

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MailError {
    #[error("invalid recipient {0:?}")]
    InvalidRecipient(String),

    #[error("delivery failed: {0}")]
    Delivery(String),
}

/// Welcome message sent after registration.
#[derive(Debug, Clone)]
pub struct WelcomeMail {
    pub user_id: i64,
    pub name: String,
    pub activation_token: String,
}

impl WelcomeMail {
    pub fn subject(&self) -> &'static str {
        "Welcome to Movies API!"
    }

    pub fn plain_body(&self) -> String {
        self.render(&self.activation_token)
    }

    /// Body with the activation token masked, safe to log.
    pub fn redacted_body(&self) -> String {
        self.render("[redacted]")
    }

    fn render(&self, token: &str) -> String {
        format!(
            "Hi {name},\n\n\
             Thanks for signing up. Your user ID is {id}.\n\n\
             Your activation token is:\n\n\
             {token}\n\n\
             This token is valid for 3 days and can only be used once.\n",
            name = self.name,
            id = self.user_id,
        )
    }
}

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send_welcome(&self, recipient: &str, mail: &WelcomeMail) -> Result<(), MailError>;
}

/// Renders messages and logs them instead of delivering them.
#[derive(Debug, Clone)]
pub struct LogMailer {
    sender: String,
}

impl LogMailer {
    pub fn new(sender: impl Into<String>) -> Self {
        Self { sender: sender.into() }
    }
}

#[async_trait]
impl Mailer for LogMailer {
    async fn send_welcome(&self, recipient: &str, mail: &WelcomeMail) -> Result<(), MailError> {
        if !recipient.contains('@') {
            return Err(MailError::InvalidRecipient(recipient.to_string()));
        }

        let body = mail.plain_body();
        tracing::info!(
            from = %self.sender,
            to = %recipient,
            subject = mail.subject(),
            bytes = body.len(),
            "Mail delivered"
        );
        tracing::debug!(body = %mail.redacted_body(), "Mail body");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::io;
    use std::sync::{Arc, Mutex};

    use super::*;

    fn welcome() -> WelcomeMail {
        WelcomeMail {
            user_id: 42,
            name: "Alice".into(),
            activation_token: "ABCDEFGHIJKLMNOPQRSTUVWXYZ".into(),
        }
    }

    #[test]
    fn body_carries_user_and_token() {
        let body = welcome().plain_body();
        assert!(body.contains("Hi Alice"));
        assert!(body.contains("user ID is 42"));
        assert!(body.contains("ABCDEFGHIJKLMNOPQRSTUVWXYZ"));
        assert!(!body.contains("/v1/users/activated"));
    }

    #[test]
    fn redacted_body_hides_token() {
        let body = welcome().redacted_body();
        assert!(body.contains("Hi Alice"));
        assert!(body.contains("[redacted]"));
        assert!(!body.contains("ABCDEFGHIJKLMNOPQRSTUVWXYZ"));
    }

    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn delivery_logs_never_carry_the_token() {
        let captured = Captured::default();
        let writer = captured.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::TRACE)
            .with_ansi(false)
            .with_writer(move || writer.clone())
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        LogMailer::new("no-reply@movies.example")
            .send_welcome("alice@example.com", &welcome())
            .await
            .unwrap();

        let logs = String::from_utf8(captured.0.lock().unwrap().clone()).unwrap();
        assert!(logs.contains("Mail delivered"));
        assert!(logs.contains("[redacted]"));
        assert!(!logs.contains("ABCDEFGHIJKLMNOPQRSTUVWXYZ"));
    }

    #[tokio::test]
    async fn log_mailer_rejects_malformed_recipient() {
        let mailer = LogMailer::new("Movies API <no-reply@movies.example>");
        assert!(mailer.send_welcome("alice@example.com", &welcome()).await.is_ok());
        assert!(matches!(
            mailer.send_welcome("alice", &welcome()).await,
            Err(MailError::InvalidRecipient(_))
        ));
    }
}
