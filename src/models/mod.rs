//! Core data models for mailshot.

mod config;
mod error;
mod message;

pub use config::*;
pub use error::*;
pub use message::*;
