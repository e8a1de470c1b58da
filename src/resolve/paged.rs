//! Paginated find-or-create resolution for provider-side resources.
//!
//! Audiences, members, templates and campaigns all resolve the same way: an
//! already-known id wins, then the local cache, then a page walk over the
//! provider listing, and only then a creation call. Each logical name causes
//! at most one listing walk and at most one creation across a campaign.

use crate::models::Result;
use std::collections::BTreeMap;
use std::future::Future;

/// One page of a provider listing.
#[derive(Debug, Clone)]
pub struct Page<T> {
    pub items: Vec<T>,
    /// Total item count the provider reports for the whole listing.
    pub total: u64,
}

/// A cache slot for exactly one logical name.
pub trait CacheSlot {
    type Id;

    fn cached(&self) -> Option<Self::Id>;
    fn record(&mut self, id: Self::Id);
}

/// Cache slot over one key of a name-to-id map.
pub struct MapSlot<'a, V> {
    map: &'a mut BTreeMap<String, V>,
    key: String,
}

impl<'a, V> MapSlot<'a, V> {
    pub fn new(map: &'a mut BTreeMap<String, V>, key: impl Into<String>) -> Self {
        Self {
            map,
            key: key.into(),
        }
    }
}

impl<V: Clone> CacheSlot for MapSlot<'_, V> {
    type Id = V;

    fn cached(&self) -> Option<V> {
        self.map.get(&self.key).cloned()
    }

    fn record(&mut self, id: V) {
        self.map.insert(self.key.clone(), id);
    }
}

/// Resolve a resource id: known value, cache, paged scan, then creation.
///
/// The scan requests fixed-size pages from offset 0 and the first matching
/// item wins. Termination is bounded by the total reported on the first
/// page, counting page slots rather than returned items, so a listing that
/// later misreports its total cannot hang the walk. The slot records the id
/// exactly once per remote resolution; a `known` id bypasses the cache
/// entirely.
pub async fn find_or_create<T, Id, Slot, Fetch, FetchFut, Create, CreateFut>(
    known: Option<Id>,
    mut slot: Slot,
    page_size: u64,
    mut fetch: Fetch,
    matches: impl Fn(&T) -> bool,
    id_of: impl Fn(&T) -> Id,
    create: Create,
) -> Result<Id>
where
    Id: Clone,
    Slot: CacheSlot<Id = Id>,
    Fetch: FnMut(u64, u64) -> FetchFut,
    FetchFut: Future<Output = Result<Page<T>>>,
    Create: FnOnce() -> CreateFut,
    CreateFut: Future<Output = Result<T>>,
{
    if let Some(id) = known {
        return Ok(id);
    }

    if let Some(id) = slot.cached() {
        return Ok(id);
    }

    let mut fetched = 0u64;
    let mut total = None;

    loop {
        let page = fetch(page_size, fetched).await?;
        let total = *total.get_or_insert(page.total);

        if let Some(item) = page.items.iter().find(|item| matches(item)) {
            let id = id_of(item);
            slot.record(id.clone());
            return Ok(id);
        }

        fetched += page_size;
        if fetched >= total {
            break;
        }
    }

    let created = create().await?;
    let id = id_of(&created);
    slot.record(id.clone());
    Ok(id)
}
