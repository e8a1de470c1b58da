//! Campaign dispatch pipeline.

mod dispatch;

pub use dispatch::*;
