//! SendGrid v3 mail client.

use super::Mailer;
use crate::models::{
    Address, Config, DeliveryReceipt, EmailMessage, MailshotError, ProviderKind, Result,
    SendgridOptions,
};
use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;
use tracing::debug;

/// Transactional sender over `POST /v3/mail/send`.
#[derive(Debug)]
pub struct SendgridMailer {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    timeout: Duration,
    max_retries: u32,
    options: SendgridOptions,
}

#[derive(Debug, Serialize)]
struct MailPayload<'a> {
    personalizations: Vec<Personalization<'a>>,
    from: EmailObject<'a>,
    subject: &'a str,
    content: Vec<Content<'a>>,
    #[serde(skip_serializing_if = "<[String]>::is_empty")]
    categories: &'a [String],
    #[serde(skip_serializing_if = "Option::is_none")]
    send_at: Option<i64>,
    tracking_settings: TrackingSettings,
    #[serde(skip_serializing_if = "Option::is_none")]
    mail_settings: Option<MailSettings>,
}

#[derive(Debug, Serialize)]
struct Personalization<'a> {
    to: Vec<EmailObject<'a>>,
}

#[derive(Debug, Serialize)]
struct EmailObject<'a> {
    email: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<&'a str>,
}

impl<'a> From<&'a Address> for EmailObject<'a> {
    fn from(address: &'a Address) -> Self {
        Self {
            email: &address.email,
            name: address.name.as_deref(),
        }
    }
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    value: &'a str,
}

#[derive(Debug, Serialize)]
struct TrackingSettings {
    click_tracking: Toggle,
    open_tracking: Toggle,
    ganalytics: Toggle,
}

#[derive(Debug, Serialize)]
struct MailSettings {
    sandbox_mode: Toggle,
}

#[derive(Debug, Serialize)]
struct Toggle {
    enable: bool,
}

impl SendgridMailer {
    pub fn new(config: &Config) -> Result<Self> {
        let kind = ProviderKind::Sendgrid;
        let c = config.sendgrid_config(kind)?;
        let api_key = config.resolve_api_key(kind)?;
        let timeout = Duration::from_secs(c.timeout_secs);

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(MailshotError::Network)?;

        Ok(Self {
            client,
            api_key,
            base_url: c.base_url.clone(),
            timeout,
            max_retries: c.max_retries,
            options: c.options.clone(),
        })
    }

    fn payload<'a>(&self, message: &'a EmailMessage) -> MailPayload<'a> {
        // SendGrid wants text/plain before text/html.
        let mut content = Vec::new();
        if let Some(text) = message.text.as_deref() {
            content.push(Content {
                kind: "text/plain",
                value: text,
            });
        }
        if let Some(html) = message.html.as_deref() {
            content.push(Content {
                kind: "text/html",
                value: html,
            });
        }

        MailPayload {
            personalizations: vec![Personalization {
                to: message.to.iter().map(EmailObject::from).collect(),
            }],
            from: EmailObject::from(&message.from),
            subject: &message.subject,
            content,
            categories: &message.tags,
            send_at: message.delivery_time.map(|at| at.timestamp()),
            tracking_settings: TrackingSettings {
                click_tracking: Toggle {
                    enable: self.options.click_tracking,
                },
                open_tracking: Toggle {
                    enable: self.options.open_tracking,
                },
                ganalytics: Toggle {
                    enable: self.options.ganalytics,
                },
            },
            mail_settings: message.dry_run.then_some(MailSettings {
                sandbox_mode: Toggle { enable: true },
            }),
        }
    }
}

#[async_trait]
impl Mailer for SendgridMailer {
    fn name(&self) -> &'static str {
        "sendgrid"
    }

    async fn send(&self, message: &EmailMessage) -> Result<DeliveryReceipt> {
        let url = format!("{}/v3/mail/send", self.base_url);
        let payload = self.payload(message);

        let response = super::execute_with_retries(
            || {
                self.client
                    .post(&url)
                    .bearer_auth(&self.api_key)
                    .json(&payload)
            },
            self.timeout,
            self.max_retries,
        )
        .await?;

        let id = response
            .headers()
            .get("x-message-id")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        debug!(
            status = response.status().as_u16(),
            id = id.as_deref().unwrap_or("-"),
            "SendGrid accepted message"
        );

        Ok(DeliveryReceipt {
            id,
            detail: "accepted by SendGrid".to_string(),
            committed: !message.dry_run,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MarketingFields;
    use chrono::DateTime;

    fn mailer() -> SendgridMailer {
        let config: Config = toml::from_str(
            r#"
[sendgrid]
api_key = "sg-test"

[message]
subject = "October news"
from = "Ops <ops@example.com>"
"#,
        )
        .unwrap();
        SendgridMailer::new(&config).unwrap()
    }

    fn message() -> EmailMessage {
        EmailMessage {
            from: Address::parse("Ops <ops@example.com>"),
            to: vec![
                Address::parse("Jane <jane@example.com>"),
                Address::parse("bob@example.com"),
            ],
            subject: "October news".to_string(),
            text: Some("Hello".to_string()),
            html: Some("<p>Hello</p>".to_string()),
            tags: vec!["october".to_string()],
            delivery_time: None,
            dry_run: false,
            last_contact: false,
            marketing: None::<MarketingFields>,
        }
    }

    #[test]
    fn payload_carries_personalizations_and_ordered_content() {
        let value = serde_json::to_value(mailer().payload(&message())).unwrap();

        assert_eq!(
            value.pointer("/personalizations/0/to/0/email").unwrap(),
            "jane@example.com"
        );
        assert_eq!(
            value.pointer("/personalizations/0/to/0/name").unwrap(),
            "Jane"
        );
        assert!(value.pointer("/personalizations/0/to/1/name").is_none());
        assert_eq!(value.pointer("/from/email").unwrap(), "ops@example.com");
        assert_eq!(value.pointer("/content/0/type").unwrap(), "text/plain");
        assert_eq!(value.pointer("/content/1/type").unwrap(), "text/html");
        assert_eq!(value.pointer("/categories/0").unwrap(), "october");
    }

    #[test]
    fn tracking_settings_come_from_config_defaults() {
        let value = serde_json::to_value(mailer().payload(&message())).unwrap();

        assert_eq!(
            value
                .pointer("/tracking_settings/click_tracking/enable")
                .unwrap(),
            true
        );
        assert_eq!(
            value
                .pointer("/tracking_settings/open_tracking/enable")
                .unwrap(),
            true
        );
        assert_eq!(
            value.pointer("/tracking_settings/ganalytics/enable").unwrap(),
            false
        );
    }

    #[test]
    fn dry_run_enables_sandbox_mode() {
        let mut msg = message();
        msg.dry_run = true;
        let value = serde_json::to_value(mailer().payload(&msg)).unwrap();
        assert_eq!(
            value.pointer("/mail_settings/sandbox_mode/enable").unwrap(),
            true
        );

        let value = serde_json::to_value(mailer().payload(&message())).unwrap();
        assert!(value.pointer("/mail_settings").is_none());
    }

    #[test]
    fn delivery_time_becomes_epoch_send_at() {
        let mut msg = message();
        msg.delivery_time = Some(DateTime::parse_from_rfc3339("2026-09-01T10:00:00+02:00").unwrap());
        let value = serde_json::to_value(mailer().payload(&msg)).unwrap();
        assert_eq!(value.pointer("/send_at").unwrap(), 1788249600_i64);
    }
}
