//! Mailchimp marketing API client.
//!
//! Unlike the transactional backends, a "send" here stages provider-side
//! resources: the audience, one subscribed member per fan-out recipient, the
//! template and the campaign are each resolved find-or-create style through
//! [`crate::resolve::find_or_create`], backed by the persistent resource
//! cache. The campaign itself goes out once, committed by the message that
//! carries the last-contact flag.

use super::Mailer;
use crate::checkpoint::{MemberEntry, ResourceCache, ResourceCacheStore};
use crate::models::{
    Address, AudienceContact, Config, ConfigError, DeliveryReceipt, EmailMessage,
    MailchimpOptions, MailshotError, MarketingFields, ProviderKind, Result,
};
use crate::resolve::{find_or_create, MapSlot, Page};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{info, warn};

/// Marketing sender over the `https://{dc}.api.mailchimp.com/3.0` API.
#[derive(Debug)]
pub struct MailchimpMailer {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    timeout: Duration,
    max_retries: u32,
    page_size: u64,
    contact: Option<AudienceContact>,
    options: MailchimpOptions,
    /// Sends within a batch run concurrently; resolution must not race.
    cache: Mutex<ResourceCacheStore>,
}

#[derive(Debug, Deserialize)]
struct ListPage {
    #[serde(default)]
    lists: Vec<ListEntry>,
    #[serde(default)]
    total_items: u64,
}

#[derive(Debug, Clone, Deserialize)]
struct ListEntry {
    id: String,
    name: String,
}

#[derive(Debug, Deserialize)]
struct MemberPage {
    #[serde(default)]
    members: Vec<MemberRecord>,
    #[serde(default)]
    total_items: u64,
}

#[derive(Debug, Clone, Deserialize)]
struct MemberRecord {
    id: String,
    email_address: String,
    list_id: String,
}

#[derive(Debug, Deserialize)]
struct TemplatePage {
    #[serde(default)]
    templates: Vec<TemplateEntry>,
    #[serde(default)]
    total_items: u64,
}

#[derive(Debug, Clone, Deserialize)]
struct TemplateEntry {
    id: u64,
    name: String,
}

#[derive(Debug, Deserialize)]
struct CampaignPage {
    #[serde(default)]
    campaigns: Vec<CampaignEntry>,
    #[serde(default)]
    total_items: u64,
}

#[derive(Debug, Clone, Deserialize)]
struct CampaignEntry {
    id: String,
    #[serde(default)]
    settings: CampaignEntrySettings,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct CampaignEntrySettings {
    #[serde(default)]
    title: String,
}

#[derive(Debug, Deserialize)]
struct CampaignStatus {
    status: String,
}

#[derive(Debug, Serialize)]
struct CreateAudience<'a> {
    name: &'a str,
    contact: &'a AudienceContact,
    permission_reminder: &'a str,
    email_type_option: bool,
    campaign_defaults: CampaignDefaults<'a>,
}

#[derive(Debug, Serialize)]
struct CampaignDefaults<'a> {
    from_name: &'a str,
    from_email: &'a str,
    subject: &'a str,
    language: &'a str,
}

#[derive(Debug, Serialize)]
struct CreateMember<'a> {
    email_address: &'a str,
    status: &'static str,
    email_type: &'static str,
    merge_fields: MergeFields<'a>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tags: Vec<String>,
}

#[derive(Debug, Serialize)]
struct MergeFields<'a> {
    #[serde(rename = "FNAME")]
    first_name: &'a str,
    #[serde(rename = "LNAME")]
    last_name: &'a str,
}

#[derive(Debug, Serialize)]
struct CreateTemplate<'a> {
    name: &'a str,
    html: &'a str,
}

#[derive(Debug, Serialize)]
struct CreateCampaign<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    recipients: Recipients<'a>,
    settings: CampaignSettings<'a>,
    tracking: CampaignTracking,
}

#[derive(Debug, Serialize)]
struct Recipients<'a> {
    list_id: &'a str,
}

#[derive(Debug, Serialize)]
struct CampaignSettings<'a> {
    subject_line: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    preview_text: Option<&'a str>,
    title: &'a str,
    template_id: u64,
    from_name: &'a str,
    reply_to: &'a str,
    to_name: &'static str,
    auto_footer: bool,
    inline_css: bool,
}

#[derive(Debug, Serialize)]
struct CampaignTracking {
    html_clicks: bool,
    google_analytics: String,
    opens: bool,
    text_clicks: bool,
}

impl MailchimpMailer {
    pub fn new(config: &Config) -> Result<Self> {
        let kind = ProviderKind::Mailchimp;
        let c = config.mailchimp_config(kind)?;
        let api_key = config.resolve_api_key(kind)?;
        let timeout = Duration::from_secs(c.timeout_secs);

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(MailshotError::Network)?;

        Ok(Self {
            client,
            api_key,
            base_url: format!("https://{}.api.mailchimp.com/3.0", c.server_prefix),
            timeout,
            max_retries: c.max_retries,
            page_size: c.page_size,
            contact: c.contact.clone(),
            options: c.options.clone(),
            cache: Mutex::new(ResourceCacheStore::open(&config.dispatch.resource_cache)),
        })
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T> {
        let url = format!("{}{}", self.base_url, path);
        let response = super::execute_with_retries(
            || {
                self.client
                    .get(&url)
                    .basic_auth("anystring", Some(&self.api_key))
                    .query(query)
            },
            self.timeout,
            self.max_retries,
        )
        .await?;

        response.json().await.map_err(|e| {
            MailshotError::Parse(format!("Failed to parse Mailchimp response: {e}"))
        })
    }

    async fn post_json<T: DeserializeOwned, B: Serialize + Sync>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T> {
        let url = format!("{}{}", self.base_url, path);
        let response = super::execute_with_retries(
            || {
                self.client
                    .post(&url)
                    .basic_auth("anystring", Some(&self.api_key))
                    .json(body)
            },
            self.timeout,
            self.max_retries,
        )
        .await?;

        response.json().await.map_err(|e| {
            MailshotError::Parse(format!("Failed to parse Mailchimp response: {e}"))
        })
    }

    /// POST an action endpoint that answers 204 No Content.
    async fn post_empty(&self, path: &str) -> Result<()> {
        let url = format!("{}{}", self.base_url, path);
        super::execute_with_retries(
            || {
                self.client
                    .post(&url)
                    .basic_auth("anystring", Some(&self.api_key))
            },
            self.timeout,
            self.max_retries,
        )
        .await?;
        Ok(())
    }

    fn paging(count: u64, offset: u64) -> [(&'static str, String); 2] {
        [("count", count.to_string()), ("offset", offset.to_string())]
    }

    async fn audience_page(&self, count: u64, offset: u64) -> Result<Page<ListEntry>> {
        let page: ListPage = self.get_json("/lists", &Self::paging(count, offset)).await?;
        Ok(Page {
            items: page.lists,
            total: page.total_items,
        })
    }

    async fn member_page(
        &self,
        audience_id: &str,
        count: u64,
        offset: u64,
    ) -> Result<Page<MemberRecord>> {
        let page: MemberPage = self
            .get_json(
                &format!("/lists/{audience_id}/members"),
                &Self::paging(count, offset),
            )
            .await?;
        Ok(Page {
            items: page.members,
            total: page.total_items,
        })
    }

    async fn template_page(&self, count: u64, offset: u64) -> Result<Page<TemplateEntry>> {
        let page: TemplatePage = self
            .get_json("/templates", &Self::paging(count, offset))
            .await?;
        Ok(Page {
            items: page.templates,
            total: page.total_items,
        })
    }

    async fn campaign_page(&self, count: u64, offset: u64) -> Result<Page<CampaignEntry>> {
        let page: CampaignPage = self
            .get_json("/campaigns", &Self::paging(count, offset))
            .await?;
        Ok(Page {
            items: page.campaigns,
            total: page.total_items,
        })
    }

    fn audience_payload<'a>(
        &'a self,
        message: &'a EmailMessage,
        name: &'a str,
    ) -> Result<CreateAudience<'a>> {
        let contact = self.contact.as_ref().ok_or_else(|| {
            config_invalid(format!(
                "mailchimp.contact is required to create audience '{name}'"
            ))
        })?;

        Ok(CreateAudience {
            name,
            contact,
            permission_reminder: &self.options.permission_reminder,
            email_type_option: true,
            campaign_defaults: CampaignDefaults {
                from_name: message.from.name.as_deref().unwrap_or_default(),
                from_email: &message.from.email,
                subject: &message.subject,
                language: &self.options.language,
            },
        })
    }

    fn member_payload<'a>(&self, message: &EmailMessage, to: &'a Address) -> CreateMember<'a> {
        let (first_name, last_name) = split_name(to.name.as_deref());
        CreateMember {
            email_address: &to.email,
            status: "subscribed",
            email_type: "html",
            merge_fields: MergeFields {
                first_name,
                last_name,
            },
            tags: message.tags.clone(),
        }
    }

    fn campaign_payload<'a>(
        &'a self,
        message: &'a EmailMessage,
        marketing: &'a MarketingFields,
        name: &'a str,
        audience_id: &'a str,
        template_id: u64,
    ) -> CreateCampaign<'a> {
        CreateCampaign {
            kind: "regular",
            recipients: Recipients {
                list_id: audience_id,
            },
            settings: CampaignSettings {
                subject_line: &message.subject,
                preview_text: marketing
                    .preview_text
                    .as_deref()
                    .or(message.text.as_deref()),
                title: name,
                template_id,
                from_name: message.from.name.as_deref().unwrap_or_default(),
                reply_to: &message.from.email,
                to_name: "*|FNAME|* *|LNAME|*",
                auto_footer: self.options.auto_footer,
                inline_css: self.options.inline_css,
            },
            tracking: CampaignTracking {
                html_clicks: self.options.track_html_clicks,
                google_analytics: analytics_tag(name),
                opens: self.options.track_opens,
                text_clicks: self.options.track_text_clicks,
            },
        }
    }

    async fn create_audience(&self, message: &EmailMessage, name: &str) -> Result<ListEntry> {
        let payload = self.audience_payload(message, name)?;
        info!(audience = name, "Creating Mailchimp audience");
        self.post_json("/lists", &payload).await
    }

    async fn create_member(
        &self,
        message: &EmailMessage,
        to: &Address,
        audience_id: &str,
    ) -> Result<MemberRecord> {
        let payload = self.member_payload(message, to);
        info!(member = %to.email, audience = audience_id, "Subscribing member");
        self.post_json(&format!("/lists/{audience_id}/members"), &payload)
            .await
    }

    async fn create_template(&self, message: &EmailMessage, name: &str) -> Result<TemplateEntry> {
        let html = message.html.as_deref().ok_or_else(|| {
            config_invalid("mailchimp needs message.html_file to create a template")
        })?;
        let payload = CreateTemplate { name, html };
        info!(template = name, "Creating Mailchimp template");
        self.post_json("/templates", &payload).await
    }

    async fn resolve_audience(
        &self,
        message: &EmailMessage,
        marketing: &MarketingFields,
        cache: &mut ResourceCache,
    ) -> Result<String> {
        let name = marketing.audience.clone().unwrap_or_default();
        if marketing.audience_id.is_none() && name.is_empty() {
            return Err(config_invalid(
                "mailchimp needs message.audience or message.audience_id",
            ));
        }

        find_or_create(
            marketing.audience_id.clone(),
            MapSlot::new(&mut cache.lists, name.clone()),
            self.page_size,
            |count, offset| self.audience_page(count, offset),
            |list: &ListEntry| list.name == name,
            |list| list.id.clone(),
            || self.create_audience(message, &name),
        )
        .await
    }

    async fn resolve_member(
        &self,
        message: &EmailMessage,
        to: &Address,
        audience_id: &str,
        cache: &mut ResourceCache,
    ) -> Result<MemberEntry> {
        find_or_create(
            None,
            MapSlot::new(&mut cache.members, to.email.clone()),
            self.page_size,
            |count, offset| self.member_page(audience_id, count, offset),
            |member: &MemberRecord| member.email_address == to.email,
            |member| MemberEntry {
                id: member.id.clone(),
                list_name: member.list_id.clone(),
            },
            || self.create_member(message, to, audience_id),
        )
        .await
    }

    async fn resolve_template(
        &self,
        message: &EmailMessage,
        marketing: &MarketingFields,
        cache: &mut ResourceCache,
    ) -> Result<u64> {
        let name = marketing
            .template
            .clone()
            .ok_or_else(|| config_invalid("mailchimp needs message.template"))?;

        find_or_create(
            None,
            MapSlot::new(&mut cache.templates, name.clone()),
            self.page_size,
            |count, offset| self.template_page(count, offset),
            |template: &TemplateEntry| template.name == name,
            |template| template.id,
            || self.create_template(message, &name),
        )
        .await
    }

    async fn resolve_campaign(
        &self,
        message: &EmailMessage,
        marketing: &MarketingFields,
        audience_id: &str,
        template_id: u64,
        cache: &mut ResourceCache,
    ) -> Result<String> {
        let name = marketing
            .campaign
            .clone()
            .ok_or_else(|| config_invalid("mailchimp needs message.campaign"))?;

        find_or_create(
            None,
            MapSlot::new(&mut cache.campaigns, name.clone()),
            self.page_size,
            |count, offset| self.campaign_page(count, offset),
            |campaign: &CampaignEntry| campaign.settings.title == name,
            |campaign| campaign.id.clone(),
            || async {
                let payload =
                    self.campaign_payload(message, marketing, &name, audience_id, template_id);
                info!(campaign = %name, "Creating Mailchimp campaign");
                self.post_json::<CampaignEntry, _>("/campaigns", &payload)
                    .await
            },
        )
        .await
    }

    /// Resolve every resource a message needs; returns the campaign id.
    ///
    /// Member subscription failures are isolated per recipient; the message
    /// only fails outright when no recipient could be staged.
    async fn resolve_all(
        &self,
        message: &EmailMessage,
        marketing: &MarketingFields,
        cache: &mut ResourceCache,
    ) -> Result<String> {
        let audience_id = self.resolve_audience(message, marketing, cache).await?;

        let mut subscribed = 0usize;
        let mut first_error: Option<MailshotError> = None;

        for to in &message.to {
            match self.resolve_member(message, to, &audience_id, cache).await {
                Ok(_) => subscribed += 1,
                Err(e) => {
                    warn!(recipient = %to.email, error = %e, "Member subscription failed");
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                }
            }
        }

        if subscribed == 0 {
            if let Some(e) = first_error {
                return Err(e);
            }
            return Err(MailshotError::Internal(
                "message has no recipients".to_string(),
            ));
        }

        let template_id = self.resolve_template(message, marketing, cache).await?;
        self.resolve_campaign(message, marketing, &audience_id, template_id, cache)
            .await
    }
}

fn config_invalid(message: impl Into<String>) -> MailshotError {
    MailshotError::Config(ConfigError::Invalid(message.into()))
}

/// First word is the first name, the rest is the last name.
fn split_name(name: Option<&str>) -> (&str, &str) {
    match name {
        Some(full) => match full.split_once(' ') {
            Some((first, rest)) => (first, rest.trim_start()),
            None => (full, ""),
        },
        None => ("", ""),
    }
}

fn analytics_tag(campaign: &str) -> String {
    format!("{campaign}-{}", chrono::Utc::now().format("%d-%m-%Y"))
}

#[async_trait]
impl Mailer for MailchimpMailer {
    fn name(&self) -> &'static str {
        "mailchimp"
    }

    async fn send(&self, message: &EmailMessage) -> Result<DeliveryReceipt> {
        let marketing = message.marketing.as_ref().ok_or_else(|| {
            config_invalid("mailchimp needs marketing settings (audience, template, campaign)")
        })?;

        let mut cache = self.cache.lock().await;

        // Persist whatever resolved even when a later step failed; the next
        // run then skips straight past the finished lookups.
        let resolved = self.resolve_all(message, marketing, cache.state_mut()).await;
        cache.save()?;
        let campaign_id = resolved?;

        let status: CampaignStatus = self
            .get_json(&format!("/campaigns/{campaign_id}"), &[])
            .await?;

        let commit = message.last_contact && !message.dry_run;
        if commit {
            self.post_empty(&format!("/campaigns/{campaign_id}/actions/send"))
                .await?;
            info!(campaign = %campaign_id, "Campaign send requested");
        }

        Ok(DeliveryReceipt {
            id: Some(campaign_id.clone()),
            detail: format!(
                "email sent to Mailchimp server as a campaign (id: {campaign_id}, status: {})",
                status.status
            ),
            committed: commit,
        })
    }
}
