//! Email message model shared by every provider.

use super::{Config, MailshotError, MessageConfig, Result};
use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// A mailbox, optionally with a display name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    pub name: Option<String>,
    pub email: String,
}

impl Address {
    /// Parse `Jane Doe <jane@example.com>` or a bare `jane@example.com`.
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();

        if let Some(start) = raw.find('<') {
            if let Some(end) = raw.rfind('>') {
                if start < end {
                    let name = raw[..start].trim();
                    return Self {
                        name: (!name.is_empty()).then(|| name.to_string()),
                        email: raw[start + 1..end].trim().to_string(),
                    };
                }
            }
        }

        Self {
            name: None,
            email: raw.to_string(),
        }
    }

    pub fn new(email: impl Into<String>) -> Self {
        Self {
            name: None,
            email: email.into(),
        }
    }
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.name {
            Some(name) => write!(f, "{} <{}>", name, self.email),
            None => write!(f, "{}", self.email),
        }
    }
}

/// Split a raw `to` cell into its fan-out addresses.
///
/// Mailing-list rows may pack several mailboxes into one cell, separated
/// by `/` or `,`.
pub fn fan_out(raw: &str) -> Vec<Address> {
    raw.split(['/', ','])
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(Address::parse)
        .collect()
}

/// Campaign-level resource names used by marketing providers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MarketingFields {
    /// Audience id when already known; skips audience resolution entirely.
    pub audience_id: Option<String>,
    pub audience: Option<String>,
    pub template: Option<String>,
    pub campaign: Option<String>,
    pub preview_text: Option<String>,
}

/// One outbound email, drafted from a mailing-list row.
#[derive(Debug, Clone)]
pub struct EmailMessage {
    pub from: Address,
    pub to: Vec<Address>,
    pub subject: String,
    pub text: Option<String>,
    pub html: Option<String>,
    pub tags: Vec<String>,
    /// Requested delivery time, honored by providers that support scheduling.
    pub delivery_time: Option<DateTime<FixedOffset>>,
    /// Routes to the provider's test mode and suppresses campaign commits.
    pub dry_run: bool,
    /// Set on the message drafted from the final row of a complete batch.
    pub last_contact: bool,
    pub marketing: Option<MarketingFields>,
}

/// Everything fixed across a campaign, used to draft one message per row.
#[derive(Debug, Clone)]
pub struct MessageSpec {
    pub from: Address,
    pub subject: String,
    pub text: Option<String>,
    pub html: Option<String>,
    pub tags: Vec<String>,
    pub delivery_time: Option<DateTime<FixedOffset>>,
    pub dry_run: bool,
    pub marketing: Option<MarketingFields>,
}

impl MessageSpec {
    /// Build the campaign-wide spec from the `[message]` config section,
    /// reading the body files up front.
    pub fn from_config(config: &Config, dry_run: bool) -> Result<Self> {
        let m = &config.message;
        let (text, html) = load_bodies(m)?;

        let has_marketing = m.audience.is_some()
            || m.audience_id.is_some()
            || m.template.is_some()
            || m.campaign.is_some()
            || m.preview_text.is_some();
        let marketing = has_marketing.then(|| MarketingFields {
            audience_id: m.audience_id.clone(),
            audience: m.audience.clone(),
            template: m.template.clone(),
            campaign: m.campaign.clone(),
            preview_text: m.preview_text.clone(),
        });

        Ok(Self {
            from: Address::parse(&m.from),
            subject: m.subject.clone(),
            text,
            html,
            tags: m.tags.clone(),
            delivery_time: config.delivery_time()?,
            dry_run,
            marketing,
        })
    }

    /// Draft the message for one recipient row's `to` cell.
    pub fn draft(&self, to_raw: &str) -> EmailMessage {
        EmailMessage {
            from: self.from.clone(),
            to: fan_out(to_raw),
            subject: self.subject.clone(),
            text: self.text.clone(),
            html: self.html.clone(),
            tags: self.tags.clone(),
            delivery_time: self.delivery_time,
            dry_run: self.dry_run,
            last_contact: false,
            marketing: self.marketing.clone(),
        }
    }
}

fn load_bodies(m: &MessageConfig) -> Result<(Option<String>, Option<String>)> {
    let read = |path: &PathBuf| {
        std::fs::read_to_string(path)
            .map_err(|e| MailshotError::io(format!("reading body file {}", path.display()), e))
    };

    let text = m.text_file.as_ref().map(read).transpose()?;
    let html = m.html_file.as_ref().map(read).transpose()?;
    Ok((text, html))
}

/// Provider acknowledgement for one accepted message.
#[derive(Debug, Clone)]
pub struct DeliveryReceipt {
    /// Provider-side identifier (message id or campaign id).
    pub id: Option<String>,
    pub detail: String,
    /// Whether a campaign commit was requested alongside this send.
    pub committed: bool,
}
