//! Mailgun messages API client.

use super::Mailer;
use crate::models::{
    Config, DeliveryReceipt, EmailMessage, MailgunOptions, MailshotError, ProviderKind, Result,
};
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

/// Transactional sender over `POST /v3/{domain}/messages`.
#[derive(Debug)]
pub struct MailgunMailer {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    domain: String,
    timeout: Duration,
    max_retries: u32,
    options: MailgunOptions,
}

#[derive(Debug, Deserialize)]
struct MailgunResponse {
    id: Option<String>,
    message: Option<String>,
}

impl MailgunMailer {
    pub fn new(config: &Config) -> Result<Self> {
        let kind = ProviderKind::Mailgun;
        let c = config.mailgun_config(kind)?;
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
            domain: c.domain.clone(),
            timeout,
            max_retries: c.max_retries,
            options: c.options.clone(),
        })
    }

    /// Flatten a message into Mailgun form fields.
    ///
    /// Per-message options use `o:`-prefixed dashed keys with booleans
    /// rendered as `yes`/`no`; tags repeat the `o:tag` field.
    fn form_payload(&self, message: &EmailMessage) -> Vec<(String, String)> {
        let mut form = vec![
            ("from".to_string(), message.from.to_string()),
            (
                "to".to_string(),
                message
                    .to
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join(","),
            ),
            ("subject".to_string(), message.subject.clone()),
        ];

        if let Some(text) = &message.text {
            form.push(("text".to_string(), text.clone()));
        }
        if let Some(html) = &message.html {
            form.push(("html".to_string(), html.clone()));
        }

        let opts = &self.options;
        for tag in message.tags.iter().chain(&opts.tag) {
            form.push(("o:tag".to_string(), tag.clone()));
        }

        push_flag(&mut form, "o:dkim", opts.dkim);

        if let Some(at) = &message.delivery_time {
            form.push(("o:deliverytime".to_string(), at.to_rfc2822()));
        }
        if let Some(period) = &opts.deliverytime_optimize_period {
            form.push(("o:deliverytime-optimize-period".to_string(), period.clone()));
        }
        if let Some(target) = &opts.time_zone_localize {
            form.push(("o:time-zone-localize".to_string(), target.clone()));
        }
        if message.dry_run {
            form.push(("o:testmode".to_string(), "yes".to_string()));
        }

        push_flag(&mut form, "o:tracking", opts.tracking);
        if let Some(clicks) = &opts.tracking_clicks {
            form.push(("o:tracking-clicks".to_string(), clicks.clone()));
        }
        push_flag(&mut form, "o:tracking-opens", opts.tracking_opens);
        push_flag(&mut form, "o:require-tls", opts.require_tls);
        push_flag(&mut form, "o:skip-verification", opts.skip_verification);

        form
    }
}

fn push_flag(form: &mut Vec<(String, String)>, key: &str, value: Option<bool>) {
    if let Some(v) = value {
        form.push((key.to_string(), yes_no(v).to_string()));
    }
}

fn yes_no(v: bool) -> &'static str {
    if v {
        "yes"
    } else {
        "no"
    }
}

#[async_trait]
impl Mailer for MailgunMailer {
    fn name(&self) -> &'static str {
        "mailgun"
    }

    async fn send(&self, message: &EmailMessage) -> Result<DeliveryReceipt> {
        let url = format!("{}/v3/{}/messages", self.base_url, self.domain);
        let form = self.form_payload(message);

        let response = super::execute_with_retries(
            || {
                self.client
                    .post(&url)
                    .basic_auth("api", Some(&self.api_key))
                    .form(&form)
            },
            self.timeout,
            self.max_retries,
        )
        .await?;

        let body: MailgunResponse = response
            .json()
            .await
            .map_err(|e| MailshotError::Parse(format!("Failed to parse Mailgun response: {e}")))?;

        debug!(id = body.id.as_deref().unwrap_or("-"), "Mailgun accepted message");

        Ok(DeliveryReceipt {
            id: body.id,
            detail: body.message.unwrap_or_else(|| "queued".to_string()),
            committed: !message.dry_run,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Address, MarketingFields};
    use chrono::DateTime;

    fn mailer() -> MailgunMailer {
        let config: Config = toml::from_str(
            r#"
[mailgun]
api_key = "key-test"
domain = "mg.example.com"

[mailgun.options]
tag = ["newsletter"]

[message]
subject = "October news"
from = "Ops <ops@example.com>"
"#,
        )
        .unwrap();
        MailgunMailer::new(&config).unwrap()
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

    fn field<'a>(form: &'a [(String, String)], key: &str) -> Option<&'a str> {
        form.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str())
    }

    #[test]
    fn payload_joins_recipients_and_keeps_display_names() {
        let form = mailer().form_payload(&message());

        assert_eq!(field(&form, "from"), Some("Ops <ops@example.com>"));
        assert_eq!(
            field(&form, "to"),
            Some("Jane <jane@example.com>,bob@example.com")
        );
        assert_eq!(field(&form, "subject"), Some("October news"));
        assert_eq!(field(&form, "text"), Some("Hello"));
        assert_eq!(field(&form, "html"), Some("<p>Hello</p>"));
    }

    #[test]
    fn payload_renders_options_with_prefixes_and_yes_no() {
        let form = mailer().form_payload(&message());

        let tags: Vec<&str> = form
            .iter()
            .filter(|(k, _)| k == "o:tag")
            .map(|(_, v)| v.as_str())
            .collect();
        assert_eq!(tags, vec!["october", "newsletter"]);

        assert_eq!(field(&form, "o:dkim"), Some("yes"));
        assert_eq!(field(&form, "o:tracking"), Some("yes"));
        assert_eq!(field(&form, "o:tracking-clicks"), Some("yes"));
        assert_eq!(field(&form, "o:tracking-opens"), Some("yes"));
        assert_eq!(field(&form, "o:testmode"), None);
        assert_eq!(field(&form, "o:require-tls"), None);
    }

    #[test]
    fn dry_run_adds_testmode() {
        let mut msg = message();
        msg.dry_run = true;
        let form = mailer().form_payload(&msg);
        assert_eq!(field(&form, "o:testmode"), Some("yes"));
    }

    #[test]
    fn delivery_time_renders_rfc2822() {
        let mut msg = message();
        msg.delivery_time = Some(DateTime::parse_from_rfc3339("2026-09-01T10:00:00+02:00").unwrap());
        let form = mailer().form_payload(&msg);
        assert_eq!(
            field(&form, "o:deliverytime"),
            Some("Tue, 1 Sep 2026 10:00:00 +0200")
        );
    }
}
