//! Configuration models for mailshot.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level configuration for mailshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Provider selection, overridable per run from the CLI.
    #[serde(default)]
    pub provider: ProviderSection,

    /// Mailgun credentials and per-message options.
    #[serde(default)]
    pub mailgun: Option<MailgunConfig>,

    /// SendGrid credentials and tracking options.
    #[serde(default)]
    pub sendgrid: Option<SendgridConfig>,

    /// Mailchimp marketing credentials, audience contact and options.
    #[serde(default)]
    pub mailchimp: Option<MailchimpConfig>,

    /// Campaign message content and marketing resource names.
    pub message: MessageConfig,

    /// Mailing-list sources, checkpoint paths and dispatch tuning.
    #[serde(default)]
    pub dispatch: DispatchConfig,
}

/// Provider selection.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderSection {
    #[serde(default)]
    pub default: ProviderKind,
}

/// The set of supported mail backends.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    #[default]
    Mailgun,
    Sendgrid,
    Mailchimp,
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Mailgun => "mailgun",
            Self::Sendgrid => "sendgrid",
            Self::Mailchimp => "mailchimp",
        };
        write!(f, "{name}")
    }
}

impl std::str::FromStr for ProviderKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "mailgun" => Ok(Self::Mailgun),
            "sendgrid" => Ok(Self::Sendgrid),
            "mailchimp" => Ok(Self::Mailchimp),
            other => Err(format!(
                "unknown provider '{other}' (expected mailgun, sendgrid or mailchimp)"
            )),
        }
    }
}

/// Mailgun API configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MailgunConfig {
    /// API key (can also be set via the `api_key_env` variable)
    #[serde(default)]
    pub api_key: Option<String>,

    /// Environment variable name for the API key
    #[serde(default = "default_mailgun_api_key_env")]
    pub api_key_env: String,

    /// Sending domain, e.g. "mg.example.com"
    pub domain: String,

    /// Base URL for the Mailgun API
    #[serde(default = "default_mailgun_base_url")]
    pub base_url: String,

    /// Request timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    /// Maximum retries on failure
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Per-message Mailgun options
    #[serde(default)]
    pub options: MailgunOptions,
}

fn default_mailgun_api_key_env() -> String {
    "MAILGUN_API_KEY".to_string()
}

fn default_mailgun_base_url() -> String {
    "https://api.mailgun.net".to_string()
}

fn default_timeout() -> u64 {
    30
}

fn default_max_retries() -> u32 {
    3
}

/// Per-message Mailgun options, serialized to `o:`-prefixed form fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MailgunOptions {
    #[serde(default)]
    pub tag: Vec<String>,

    #[serde(default = "default_on")]
    pub dkim: Option<bool>,

    /// Send Time Optimization window, `[0-9]+h` between 24h and 72h
    #[serde(default)]
    pub deliverytime_optimize_period: Option<String>,

    /// Timezone Optimization target, `HH:mm` or `hh:mmaa`
    #[serde(default)]
    pub time_zone_localize: Option<String>,

    #[serde(default = "default_on")]
    pub tracking: Option<bool>,

    /// Mailgun accepts yes, no or htmlonly here, so not a plain bool
    #[serde(default = "default_clicks")]
    pub tracking_clicks: Option<String>,

    #[serde(default = "default_on")]
    pub tracking_opens: Option<bool>,

    #[serde(default)]
    pub require_tls: Option<bool>,

    #[serde(default)]
    pub skip_verification: Option<bool>,
}

fn default_on() -> Option<bool> {
    Some(true)
}

fn default_clicks() -> Option<String> {
    Some("yes".to_string())
}

impl Default for MailgunOptions {
    fn default() -> Self {
        Self {
            tag: Vec::new(),
            dkim: default_on(),
            deliverytime_optimize_period: None,
            time_zone_localize: None,
            tracking: default_on(),
            tracking_clicks: default_clicks(),
            tracking_opens: default_on(),
            require_tls: None,
            skip_verification: None,
        }
    }
}

/// SendGrid API configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendgridConfig {
    #[serde(default)]
    pub api_key: Option<String>,

    #[serde(default = "default_sendgrid_api_key_env")]
    pub api_key_env: String,

    #[serde(default = "default_sendgrid_base_url")]
    pub base_url: String,

    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default)]
    pub options: SendgridOptions,
}

fn default_sendgrid_api_key_env() -> String {
    "SENDGRID_API_KEY".to_string()
}

fn default_sendgrid_base_url() -> String {
    "https://api.sendgrid.com".to_string()
}

/// SendGrid tracking settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SendgridOptions {
    #[serde(default = "default_true")]
    pub click_tracking: bool,

    #[serde(default = "default_true")]
    pub open_tracking: bool,

    #[serde(default)]
    pub ganalytics: bool,
}

fn default_true() -> bool {
    true
}

impl Default for SendgridOptions {
    fn default() -> Self {
        Self {
            click_tracking: true,
            open_tracking: true,
            ganalytics: false,
        }
    }
}

/// Mailchimp marketing API configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MailchimpConfig {
    #[serde(default)]
    pub api_key: Option<String>,

    #[serde(default = "default_mailchimp_api_key_env")]
    pub api_key_env: String,

    /// Datacenter prefix, the tail of the API key, e.g. "us21"
    pub server_prefix: String,

    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Page size for listing endpoints during resource resolution
    #[serde(default = "default_page_size")]
    pub page_size: u64,

    /// Company contact block, required when an audience may need creation
    #[serde(default)]
    pub contact: Option<AudienceContact>,

    #[serde(default)]
    pub options: MailchimpOptions,
}

fn default_mailchimp_api_key_env() -> String {
    "MAILCHIMP_API_KEY".to_string()
}

fn default_page_size() -> u64 {
    1000
}

/// Postal contact attached to newly created audiences.
///
/// Mailchimp requires this block on list creation for anti-spam compliance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudienceContact {
    pub company: String,
    pub address1: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address2: Option<String>,
    pub city: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    pub zip: String,
    pub country: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
}

/// Campaign and audience defaults for Mailchimp.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MailchimpOptions {
    /// Default language for newly created audiences
    #[serde(default = "default_language")]
    pub language: String,

    #[serde(default = "default_permission_reminder")]
    pub permission_reminder: String,

    #[serde(default = "default_true")]
    pub auto_footer: bool,

    #[serde(default = "default_true")]
    pub inline_css: bool,

    #[serde(default = "default_true")]
    pub track_opens: bool,

    #[serde(default = "default_true")]
    pub track_html_clicks: bool,

    #[serde(default = "default_true")]
    pub track_text_clicks: bool,
}

fn default_language() -> String {
    "fr".to_string()
}

fn default_permission_reminder() -> String {
    "*|LIST:DESCRIPTION|*".to_string()
}

impl Default for MailchimpOptions {
    fn default() -> Self {
        Self {
            language: default_language(),
            permission_reminder: default_permission_reminder(),
            auto_footer: true,
            inline_css: true,
            track_opens: true,
            track_html_clicks: true,
            track_text_clicks: true,
        }
    }
}

/// Campaign message content.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageConfig {
    pub subject: String,

    /// From header, `Name <addr>` or a bare address
    pub from: String,

    /// Plain-text body file
    #[serde(default)]
    pub text_file: Option<PathBuf>,

    /// HTML body file, sent as-is
    #[serde(default)]
    pub html_file: Option<PathBuf>,

    #[serde(default)]
    pub tags: Vec<String>,

    /// Marketing audience name, resolved or created on the provider side
    #[serde(default)]
    pub audience: Option<String>,

    /// Known audience id; skips audience resolution when set
    #[serde(default)]
    pub audience_id: Option<String>,

    /// Marketing template name
    #[serde(default)]
    pub template: Option<String>,

    /// Marketing campaign name
    #[serde(default)]
    pub campaign: Option<String>,

    #[serde(default)]
    pub preview_text: Option<String>,
}

/// Dispatch sources and tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// CSV files, or directories searched recursively for `.csv` files
    #[serde(default = "default_mailing_lists")]
    pub mailing_lists: Vec<PathBuf>,

    /// Campaign checkpoint file
    #[serde(default = "default_checkpoint_path")]
    pub checkpoint: PathBuf,

    /// Provider resource cache file
    #[serde(default = "default_resource_cache_path")]
    pub resource_cache: PathBuf,

    /// Global cap on rows handled in one run
    #[serde(default)]
    pub max: Option<u64>,

    /// Concurrent in-flight sends within a batch
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// RFC 3339 delivery time hint for providers that schedule sends
    #[serde(default)]
    pub delivery_time: Option<String>,
}

fn default_mailing_lists() -> Vec<PathBuf> {
    vec![PathBuf::from("mailing-list")]
}

fn default_checkpoint_path() -> PathBuf {
    PathBuf::from("send.cache.json")
}

fn default_resource_cache_path() -> PathBuf {
    PathBuf::from("send.mailchimp-cache.json")
}

fn default_concurrency() -> usize {
    8
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            mailing_lists: default_mailing_lists(),
            checkpoint: default_checkpoint_path(),
            resource_cache: default_resource_cache_path(),
            max: None,
            concurrency: default_concurrency(),
            delivery_time: None,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
            path: path.to_owned(),
            source: e,
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.to_owned(),
            source: e,
        })
    }

    /// Resolve the API key for a provider from config or environment.
    pub fn resolve_api_key(&self, kind: ProviderKind) -> Result<String, ConfigError> {
        let (api_key, api_key_env) = match kind {
            ProviderKind::Mailgun => {
                let c = self.mailgun_config(kind)?;
                (&c.api_key, &c.api_key_env)
            }
            ProviderKind::Sendgrid => {
                let c = self.sendgrid_config(kind)?;
                (&c.api_key, &c.api_key_env)
            }
            ProviderKind::Mailchimp => {
                let c = self.mailchimp_config(kind)?;
                (&c.api_key, &c.api_key_env)
            }
        };

        // Explicit api_key in config wins over the environment
        if let Some(key) = api_key {
            return Ok(expand_env_vars(key));
        }

        std::env::var(api_key_env).map_err(|_| ConfigError::MissingApiKey {
            provider: kind.to_string(),
            env_var: api_key_env.clone(),
        })
    }

    pub fn mailgun_config(&self, kind: ProviderKind) -> Result<&MailgunConfig, ConfigError> {
        self.mailgun
            .as_ref()
            .ok_or_else(|| ConfigError::ProviderNotConfigured(kind.to_string()))
    }

    pub fn sendgrid_config(&self, kind: ProviderKind) -> Result<&SendgridConfig, ConfigError> {
        self.sendgrid
            .as_ref()
            .ok_or_else(|| ConfigError::ProviderNotConfigured(kind.to_string()))
    }

    pub fn mailchimp_config(&self, kind: ProviderKind) -> Result<&MailchimpConfig, ConfigError> {
        self.mailchimp
            .as_ref()
            .ok_or_else(|| ConfigError::ProviderNotConfigured(kind.to_string()))
    }

    /// Parse the configured delivery time hint, if any.
    pub fn delivery_time(&self) -> Result<Option<chrono::DateTime<chrono::FixedOffset>>, ConfigError> {
        self.dispatch
            .delivery_time
            .as_deref()
            .map(parse_delivery_time)
            .transpose()
    }

    /// Check the configuration beyond what deserialization enforces.
    pub fn validate(&self, kind: ProviderKind) -> Result<(), ConfigError> {
        match kind {
            ProviderKind::Mailgun => {
                let c = self.mailgun_config(kind)?;
                if c.domain.is_empty() {
                    return Err(ConfigError::Invalid(
                        "mailgun.domain must not be empty".to_string(),
                    ));
                }
            }
            ProviderKind::Sendgrid => {
                self.sendgrid_config(kind)?;
            }
            ProviderKind::Mailchimp => {
                let c = self.mailchimp_config(kind)?;
                if c.server_prefix.is_empty() {
                    return Err(ConfigError::Invalid(
                        "mailchimp.server_prefix must not be empty".to_string(),
                    ));
                }
                if c.page_size == 0 {
                    return Err(ConfigError::Invalid(
                        "mailchimp.page_size must be at least 1".to_string(),
                    ));
                }
                if self.message.audience.is_none() && self.message.audience_id.is_none() {
                    return Err(ConfigError::Invalid(
                        "mailchimp needs message.audience or message.audience_id".to_string(),
                    ));
                }
                if self.message.template.is_none() {
                    return Err(ConfigError::Invalid(
                        "mailchimp needs message.template".to_string(),
                    ));
                }
                if self.message.campaign.is_none() {
                    return Err(ConfigError::Invalid(
                        "mailchimp needs message.campaign".to_string(),
                    ));
                }
            }
        }

        if self.message.from.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "message.from must not be empty".to_string(),
            ));
        }

        self.delivery_time()?;
        Ok(())
    }
}

/// Parse an RFC 3339 delivery time.
pub fn parse_delivery_time(
    value: &str,
) -> Result<chrono::DateTime<chrono::FixedOffset>, ConfigError> {
    chrono::DateTime::parse_from_rfc3339(value).map_err(|e| ConfigError::InvalidDeliveryTime {
        value: value.to_string(),
        source: e,
    })
}

/// Expand environment variables in a string.
///
/// Supports ${VAR_NAME} syntax.
/// If the variable is not set, the placeholder is left unchanged.
pub fn expand_env_vars(s: &str) -> String {
    let mut result = s.to_string();
    let re = regex::Regex::new(r"\$\{([^}]+)\}").unwrap();

    for cap in re.captures_iter(s) {
        let var_name = &cap[1];
        if let Ok(value) = std::env::var(var_name) {
            result = result.replace(&cap[0], &value);
        }
    }

    result
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("Missing API key for provider '{provider}': set {env_var} env var or api_key in config")]
    MissingApiKey { provider: String, env_var: String },

    #[error("Provider '{0}' selected but its config section is missing")]
    ProviderNotConfigured(String),

    #[error("Invalid delivery time '{value}': {source}")]
    InvalidDeliveryTime {
        value: String,
        source: chrono::ParseError,
    },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}
