use async_trait::async_trait;
use thiserror::Error;
use tracing::info;

pub mod mailer;
pub mod templates;

pub use mailer::{HttpMailer, MailerConfig};

/// Notification delivery errors
#[derive(Debug, Error)]
pub enum NotificationError {
    #[error("Transport error: {0}")]
    Transport(String),
    #[error("Mail provider rejected message with status {0}")]
    Rejected(u16),
    #[error("Timed out after {0:?}")]
    Timeout(std::time::Duration),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Outbound transactional email
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait NotificationSender: Send + Sync {
    async fn send(&self, to: &str, subject: &str, html: &str) -> Result<(), NotificationError>;
}

/// Sender used when no mail provider is configured; it only records the attempt in the log.
#[derive(Debug, Clone, Default)]
pub struct LogOnlyNotifier;

#[async_trait]
impl NotificationSender for LogOnlyNotifier {
    async fn send(&self, to: &str, subject: &str, _html: &str) -> Result<(), NotificationError> {
        info!(to, subject, "mail provider not configured; notification logged only");
        Ok(())
    }
}
