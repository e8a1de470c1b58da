//! Find-or-create resolution of provider-side resources.

mod paged;

pub use paged::{find_or_create, CacheSlot, MapSlot, Page};
