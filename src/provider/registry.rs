//! Route → resource map holding non-owning references.

use std::sync::{Arc, Weak};

use dashmap::DashMap;

use crate::resource::Resource;

/// Concurrent map from route to [`Resource`].
///
/// Entries are [`Weak`], so the registry never keeps a resource alive on its
/// own. Dead entries are pruned on insert and on lookup. Clones share the same
/// map, which is how the serving thread reads what the caller inserts.
#[derive(Clone, Default)]
pub struct Registry {
    entries: Arc<DashMap<String, Weak<Resource>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Maps `resource.guid()` to `resource`, replacing any previous entry.
    pub fn insert(&self, resource: &Arc<Resource>) {
        self.entries.retain(|_, entry| entry.strong_count() > 0);
        self.entries
            .insert(resource.guid().to_owned(), Arc::downgrade(resource));
    }

    /// Returns the live resource at `route`, if any.
    pub fn get(&self, route: &str) -> Option<Arc<Resource>> {
        let entry = self.entries.get(route)?;
        let live = entry.upgrade();
        drop(entry);

        if live.is_none() {
            self.entries
                .remove_if(route, |_, entry| entry.strong_count() == 0);
        }
        live
    }

    /// Drops the entry at `route`. Returns `true` if a live resource was mapped there.
    pub fn remove(&self, route: &str) -> bool {
        self.entries
            .remove(route)
            .is_some_and(|(_, entry)| entry.strong_count() > 0)
    }

    /// Routes of every live resource, in no particular order.
    pub fn routes(&self) -> Vec<String> {
        self.entries
            .iter()
            .filter(|entry| entry.value().strong_count() > 0)
            .map(|entry| entry.key().clone())
            .collect()
    }

    /// Number of live resources.
    pub fn len(&self) -> usize {
        self.entries
            .iter()
            .filter(|entry| entry.value().strong_count() > 0)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::Headers;
    use crate::resource::ContentSource;
    use bytes::Bytes;

    fn resource(guid: &str, body: &'static str) -> Arc<Resource> {
        Arc::new(Resource::new(
            guid.to_owned(),
            Headers::new(),
            ContentSource::Content(Bytes::from_static(body.as_bytes())),
            Weak::new(),
        ))
    }

    #[test]
    fn lookup_returns_live_entries() {
        let registry = Registry::new();
        let a = resource("a.txt", "a");
        registry.insert(&a);
        assert!(Arc::ptr_eq(&registry.get("a.txt").unwrap(), &a));
        assert!(registry.get("b.txt").is_none());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn registry_does_not_keep_resources_alive() {
        let registry = Registry::new();
        let a = resource("a.txt", "a");
        registry.insert(&a);
        drop(a);
        assert!(registry.get("a.txt").is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn last_writer_wins() {
        let registry = Registry::new();
        let old = resource("same", "old");
        let new = resource("same", "new");
        registry.insert(&old);
        registry.insert(&new);
        let served = registry.get("same").unwrap();
        assert_eq!(served.materialize().unwrap(), "new");
        // The replaced resource is still usable by whoever holds it.
        assert_eq!(old.materialize().unwrap(), "old");
    }

    #[test]
    fn insert_prunes_dead_entries() {
        let registry = Registry::new();
        for guid in ["x", "y", "z"] {
            registry.insert(&resource(guid, "tmp"));
        }
        let keep = resource("keep", "k");
        registry.insert(&keep);
        assert_eq!(registry.routes(), vec!["keep".to_owned()]);
    }

    #[test]
    fn remove_and_clear() {
        let registry = Registry::new();
        let a = resource("a", "a");
        let b = resource("b", "b");
        registry.insert(&a);
        registry.insert(&b);
        assert!(registry.remove("a"));
        assert!(!registry.remove("a"));
        registry.clear();
        assert!(registry.get("b").is_none());
    }

    #[test]
    fn concurrent_reads_during_inserts() {
        let registry = Registry::new();
        let held: Vec<_> = (0..64).map(|i| resource(&format!("r{i}"), "v")).collect();
        std::thread::scope(|scope| {
            let reader = registry.clone();
            scope.spawn(move || {
                for _ in 0..1000 {
                    let _ = reader.get("r10");
                }
            });
            for r in &held {
                registry.insert(r);
            }
        });
        assert_eq!(registry.len(), 64);
    }
}
