//! Resource cache: provider-side ids resolved once per logical name.
//!
//! Four namespaces, one JSON file. Once a name is cached the resolver never
//! pages the provider listing for it again.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::models::Result;

/// Cached audience member record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberEntry {
    pub id: String,
    /// Audience the member was resolved in.
    pub list_name: String,
}

/// Resolved resource ids, keyed by logical name.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResourceCache {
    #[serde(default)]
    pub lists: BTreeMap<String, String>,
    /// Keyed by member email.
    #[serde(default)]
    pub members: BTreeMap<String, MemberEntry>,
    #[serde(default)]
    pub templates: BTreeMap<String, u64>,
    #[serde(default)]
    pub campaigns: BTreeMap<String, String>,
}

impl ResourceCache {
    pub fn is_empty(&self) -> bool {
        self.lists.is_empty()
            && self.members.is_empty()
            && self.templates.is_empty()
            && self.campaigns.is_empty()
    }
}

/// Persists the resource cache next to the campaign checkpoint.
#[derive(Debug)]
pub struct ResourceCacheStore {
    path: PathBuf,
    state: ResourceCache,
}

impl ResourceCacheStore {
    /// Open the cache at `path`, starting fresh when it is absent or
    /// unreadable.
    pub fn open(path: &Path) -> Self {
        let state: ResourceCache = super::load_json_or_default(path, "resource cache");

        Self {
            path: path.to_path_buf(),
            state,
        }
    }

    pub fn state(&self) -> &ResourceCache {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut ResourceCache {
        &mut self.state
    }

    /// Persist the current state (atomic write-then-rename).
    pub fn save(&self) -> Result<()> {
        super::write_json_atomic(&self.path, &self.state)?;
        debug!(path = %self.path.display(), "Resource cache saved");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn absent_or_corrupt_cache_starts_fresh() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("send.mailchimp-cache.json");

        let store = ResourceCacheStore::open(&path);
        assert!(store.state().is_empty());

        std::fs::write(&path, "][").unwrap();
        let store = ResourceCacheStore::open(&path);
        assert!(store.state().is_empty());
    }

    #[test]
    fn save_uses_original_wire_names() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("send.mailchimp-cache.json");

        let mut store = ResourceCacheStore::open(&path);
        store
            .state_mut()
            .lists
            .insert("Newsletter".to_string(), "abc123".to_string());
        store.state_mut().members.insert(
            "jane@example.com".to_string(),
            MemberEntry {
                id: "m-1".to_string(),
                list_name: "Newsletter".to_string(),
            },
        );
        store
            .state_mut()
            .templates
            .insert("October".to_string(), 10020510);
        store.save().unwrap();

        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(raw.contains("\"lists\""));
        assert!(raw.contains("\"listName\": \"Newsletter\""));
        assert!(raw.contains("\"templates\""));
        assert!(raw.contains("10020510"));
        assert!(!raw.contains("list_name"));

        let reloaded = ResourceCacheStore::open(&path);
        assert_eq!(reloaded.state().lists["Newsletter"], "abc123");
        assert_eq!(reloaded.state().members["jane@example.com"].id, "m-1");
        assert_eq!(reloaded.state().templates["October"], 10020510);
    }
}
