//! Mailing-list roster: CSV sources and the lazy batch walker.

mod rows;
mod walker;

pub use rows::*;
pub use walker::*;
