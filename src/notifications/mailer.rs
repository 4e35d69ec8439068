use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, instrument, warn};

use super::{NotificationError, NotificationSender};
use crate::config::AppConfig;

#[derive(Clone)]
pub struct MailerConfig {
    pub api_url: String,
    pub api_key: String,
    pub from: String,
    pub timeout: Duration,
}

impl MailerConfig {
    /// Returns `None` unless both the endpoint and its key are configured.
    pub fn from_app_config(cfg: &AppConfig) -> Option<Self> {
        Some(Self {
            api_url: cfg.mail_api_url.clone()?,
            api_key: cfg.mail_api_key.clone()?,
            from: cfg.mail_from.clone(),
            timeout: cfg.mail_timeout(),
        })
    }
}

#[derive(Debug, Serialize)]
struct OutboundMail<'a> {
    from: &'a str,
    to: &'a str,
    subject: &'a str,
    html: &'a str,
}

/// Posts messages as JSON to a transactional mail API.
#[derive(Clone)]
pub struct HttpMailer {
    config: MailerConfig,
    client: reqwest::Client,
}

impl HttpMailer {
    pub fn new(config: MailerConfig) -> Result<Self, NotificationError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| NotificationError::Transport(e.to_string()))?;
        Ok(Self { config, client })
    }
}

#[async_trait]
impl NotificationSender for HttpMailer {
    #[instrument(skip(self, html))]
    async fn send(&self, to: &str, subject: &str, html: &str) -> Result<(), NotificationError> {
        let mail = OutboundMail {
            from: &self.config.from,
            to,
            subject,
            html,
        };

        let response = self
            .client
            .post(&self.config.api_url)
            .bearer_auth(&self.config.api_key)
            .json(&mail)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    NotificationError::Timeout(self.config.timeout)
                } else {
                    NotificationError::Transport(e.to_string())
                }
            })?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            warn!(status, "mail provider rejected message");
            return Err(NotificationError::Rejected(status));
        }

        debug!("mail accepted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn mailer(server: &MockServer) -> HttpMailer {
        HttpMailer::new(MailerConfig {
            api_url: format!("{}/v1/send", server.uri()),
            api_key: "mk_test".into(),
            from: "orders@shop.test".into(),
            timeout: Duration::from_secs(5),
        })
        .unwrap()
    }

    #[tokio::test]
    async fn posts_json_with_bearer_key() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/send"))
            .and(header("authorization", "Bearer mk_test"))
            .and(body_json(json!({
                "from": "orders@shop.test",
                "to": "buyer@shop.test",
                "subject": "Hello",
                "html": "<p>hi</p>"
            })))
            .respond_with(ResponseTemplate::new(202))
            .expect(1)
            .mount(&server)
            .await;

        mailer(&server)
            .send("buyer@shop.test", "Hello", "<p>hi</p>")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn provider_errors_surface_as_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let err = mailer(&server)
            .send("buyer@shop.test", "Hello", "<p>hi</p>")
            .await
            .unwrap_err();
        assert!(matches!(err, NotificationError::Rejected(503)));
    }
}
