//! Mail provider clients behind the `Mailer` trait.

mod mailchimp;
mod mailer;
mod mailgun;
mod mock;
mod sendgrid;
mod validate;

pub use mailchimp::MailchimpMailer;
pub use mailer::{make_mailer, Mailer};
pub use mailgun::MailgunMailer;
pub use mock::MockMailer;
pub use sendgrid::SendgridMailer;
pub use validate::check_message;

use crate::models::{MailshotError, ProviderError, Result};
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

/// Execute a request, retrying transient failures with exponential backoff.
///
/// Network errors and 5xx answers back off `2^attempt` seconds; 429 honors
/// the `Retry-After` header. Other 4xx answers surface immediately, a bad
/// payload or key does not improve on retry.
pub(crate) async fn execute_with_retries(
    build: impl Fn() -> reqwest::RequestBuilder,
    timeout: Duration,
    max_retries: u32,
) -> Result<reqwest::Response> {
    let mut last_error: Option<MailshotError> = None;

    for attempt in 0..max_retries {
        let response = match build().send().await {
            Ok(r) => r,
            Err(e) => {
                last_error = Some(if e.is_timeout() {
                    MailshotError::Timeout(timeout)
                } else {
                    MailshotError::Network(e)
                });
                if attempt < max_retries - 1 {
                    let backoff = Duration::from_secs(2u64.pow(attempt));
                    debug!(
                        attempt = attempt,
                        backoff_secs = backoff.as_secs(),
                        "Retrying after network error"
                    );
                    tokio::time::sleep(backoff).await;
                }
                continue;
            }
        };

        let status = response.status().as_u16();

        if status == 429 {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse::<f64>().ok())
                .unwrap_or(1.0);

            last_error = Some(MailshotError::RateLimited {
                retry_after_secs: retry_after,
            });

            if attempt < max_retries - 1 {
                debug!(
                    attempt = attempt,
                    retry_after_secs = retry_after,
                    "Rate limited, waiting"
                );
                tokio::time::sleep(Duration::from_secs_f64(retry_after)).await;
            }
            continue;
        }

        if !response.status().is_success() {
            let body = response.text().await.unwrap_or_default();
            let error = if status == 401 {
                ProviderError::AuthenticationFailed
            } else {
                ProviderError::Api {
                    status,
                    message: error_detail(&body),
                }
            };
            last_error = Some(MailshotError::Provider(error));

            if status < 500 {
                break;
            }
            if attempt < max_retries - 1 {
                tokio::time::sleep(Duration::from_secs(2u64.pow(attempt))).await;
            }
            continue;
        }

        return Ok(response);
    }

    Err(last_error.unwrap_or_else(|| {
        MailshotError::Provider(ProviderError::MaxRetriesExceeded {
            attempts: max_retries,
            last_error: "Unknown error".to_string(),
        })
    }))
}

/// Pull a human-readable message out of a provider error body.
///
/// Mailgun answers `{"message"}`, Mailchimp `{"detail"}` and SendGrid
/// `{"errors":[{"message"}]}`; anything else passes through as-is.
pub(crate) fn error_detail(body: &str) -> String {
    #[derive(Deserialize)]
    struct ErrorBody {
        message: Option<String>,
        detail: Option<String>,
        errors: Option<Vec<ErrorItem>>,
    }

    #[derive(Deserialize)]
    struct ErrorItem {
        message: Option<String>,
    }

    if let Ok(parsed) = serde_json::from_str::<ErrorBody>(body) {
        if let Some(message) = parsed.message {
            return message;
        }
        if let Some(detail) = parsed.detail {
            return detail;
        }
        if let Some(message) = parsed
            .errors
            .and_then(|list| list.into_iter().next())
            .and_then(|item| item.message)
        {
            return message;
        }
    }

    if body.is_empty() {
        "empty response body".to_string()
    } else {
        body.to_string()
    }
}
