//! In-memory mailer for tests and dry wiring checks.

use super::Mailer;
use crate::models::{DeliveryReceipt, EmailMessage, MailshotError, ProviderError, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Records every message it is handed; configurable per-address failures.
#[derive(Clone, Debug, Default)]
pub struct MockMailer {
    failures: Arc<Mutex<HashMap<String, String>>>,
    sent: Arc<Mutex<Vec<EmailMessage>>>,
}

impl MockMailer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every send to `email` fail with `error`.
    pub fn fail_address(&self, email: &str, error: &str) {
        self.failures
            .lock()
            .unwrap()
            .insert(email.to_string(), error.to_string());
    }

    pub fn sent(&self) -> Vec<EmailMessage> {
        self.sent.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }
}

#[async_trait]
impl Mailer for MockMailer {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn send(&self, message: &EmailMessage) -> Result<DeliveryReceipt> {
        let id = {
            let mut sent = self.sent.lock().unwrap();
            sent.push(message.clone());
            sent.len()
        };

        let failures = self.failures.lock().unwrap();
        for to in &message.to {
            if let Some(error) = failures.get(&to.email) {
                return Err(MailshotError::Provider(ProviderError::Api {
                    status: 500,
                    message: error.clone(),
                }));
            }
        }

        Ok(DeliveryReceipt {
            id: Some(format!("mock-{id}")),
            detail: "accepted".to_string(),
            committed: message.last_contact,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Address;

    fn message(to: &str) -> EmailMessage {
        EmailMessage {
            from: Address::parse("ops@example.com"),
            to: vec![Address::parse(to)],
            subject: "s".to_string(),
            text: Some("t".to_string()),
            html: None,
            tags: vec![],
            delivery_time: None,
            dry_run: false,
            last_contact: false,
            marketing: None,
        }
    }

    #[tokio::test]
    async fn records_sends_and_fails_scripted_addresses() {
        let mock = MockMailer::new();
        mock.fail_address("bad@example.com", "boom");

        let ok = mock.send(&message("good@example.com")).await;
        assert!(ok.is_ok());

        let err = mock.send(&message("bad@example.com")).await.unwrap_err();
        assert!(err.to_string().contains("boom"));

        // The failed attempt is still recorded.
        assert_eq!(mock.call_count(), 2);
        assert_eq!(mock.sent()[1].to[0].email, "bad@example.com");
    }
}
