//! The capability boundary between the dispatch loop and mail backends.

use crate::models::{
    Config, DeliveryReceipt, EmailMessage, ProviderKind, Result, ValidationErrors,
};
use async_trait::async_trait;
use std::sync::Arc;

/// A mail backend able to check and deliver drafted messages.
///
/// `check_message` never touches the network; `send` owns retries and
/// provider-specific delivery semantics.
#[async_trait]
pub trait Mailer: Send + Sync + std::fmt::Debug {
    /// Backend name for logs and summaries.
    fn name(&self) -> &'static str;

    /// Validate a drafted message without any network call.
    fn check_message(&self, message: &EmailMessage) -> Option<ValidationErrors> {
        super::validate::check_message(message)
    }

    /// Deliver one message, retrying transient failures internally.
    async fn send(&self, message: &EmailMessage) -> Result<DeliveryReceipt>;
}

/// Build the configured backend.
pub fn make_mailer(kind: ProviderKind, config: &Config) -> Result<Arc<dyn Mailer>> {
    let mailer: Arc<dyn Mailer> = match kind {
        ProviderKind::Mailgun => Arc::new(super::MailgunMailer::new(config)?),
        ProviderKind::Sendgrid => Arc::new(super::SendgridMailer::new(config)?),
        ProviderKind::Mailchimp => Arc::new(super::MailchimpMailer::new(config)?),
    };
    Ok(mailer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MailshotError;

    #[test]
    fn unconfigured_provider_fails_construction() {
        let config: Config = toml::from_str(
            r#"
[message]
subject = "s"
from = "a@b.com"
"#,
        )
        .unwrap();

        let err = make_mailer(ProviderKind::Mailgun, &config).unwrap_err();
        assert!(matches!(err, MailshotError::Config(_)));
    }
}
