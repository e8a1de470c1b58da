//! mailshot - resumable, checkpointed bulk email campaigns.
//!
//! ## Architecture
//!
//! - **Roster**: mailing-list CSVs walked lazily, one batch per source
//! - **Dispatch**: concurrent per-row sends behind one `Mailer` trait, with
//!   failure isolation and a checkpoint write after every settled batch
//! - **Providers**: Mailgun and SendGrid as transactional backends, Mailchimp
//!   as a marketing backend with find-or-create resource resolution
//!
//! Every run is resumable: the checkpoint records how far each source got and
//! which rows failed, so a crashed or capped campaign picks up where it
//! stopped without re-contacting anyone.

pub mod checkpoint;
pub mod models;
pub mod pipeline;
pub mod provider;
pub mod resolve;
pub mod roster;

// Re-exports for convenience
pub use checkpoint::{CheckpointStore, ResourceCacheStore};
pub use models::{Config, EmailMessage, MailshotError, MessageSpec, ProviderKind, Result};
pub use pipeline::{DispatchStats, Dispatcher};
pub use provider::{make_mailer, Mailer, MockMailer};
pub use roster::{expand_sources, RosterWalker};
