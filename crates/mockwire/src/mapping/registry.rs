//! Concurrent mapping registry.
//!
//! Writers rebuild an immutable, priority-ordered snapshot under a short
//! write lock; dispatch clones the snapshot `Arc` and iterates it without
//! holding any lock.

use super::types::{Mapping, MappingError};
use chrono::Utc;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

/// Priority-ordered view of the registry at one point in time.
pub type MappingSnapshot = Arc<[Arc<Mapping>]>;

struct RegistryInner {
    by_guid: HashMap<Uuid, Arc<Mapping>>,
    ordered: MappingSnapshot,
}

impl Default for RegistryInner {
    fn default() -> Self {
        Self {
            by_guid: HashMap::new(),
            ordered: Arc::from(Vec::new()),
        }
    }
}

impl RegistryInner {
    fn rebuild(&mut self) {
        let mut ordered: Vec<Arc<Mapping>> = self.by_guid.values().cloned().collect();
        ordered.sort_by(|a, b| a.priority.cmp(&b.priority).then(a.guid.cmp(&b.guid)));
        self.ordered = ordered.into();
    }
}

#[derive(Default)]
pub struct MappingRegistry {
    inner: RwLock<RegistryInner>,
}

impl MappingRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace by GUID.
    ///
    /// A replaced mapping keeps its creation time; `updated_at` is refreshed.
    pub fn upsert(&self, mut mapping: Mapping) -> Result<Arc<Mapping>, MappingError> {
        mapping.validate()?;

        let mut inner = self.inner.write();
        let now = Utc::now();
        match inner.by_guid.get(&mapping.guid) {
            Some(existing) => {
                mapping.created_at = existing.created_at;
                debug!(guid = %mapping.guid, "Replacing mapping");
            }
            None => {
                mapping.created_at = now;
                debug!(guid = %mapping.guid, priority = mapping.priority, "Adding mapping");
            }
        }
        mapping.updated_at = now;

        let mapping = Arc::new(mapping);
        inner.by_guid.insert(mapping.guid, Arc::clone(&mapping));
        inner.rebuild();
        Ok(mapping)
    }

    pub fn get(&self, guid: &Uuid) -> Option<Arc<Mapping>> {
        self.inner.read().by_guid.get(guid).cloned()
    }

    /// Mappings in dispatch order: priority ascending, then GUID.
    pub fn snapshot(&self) -> MappingSnapshot {
        Arc::clone(&self.inner.read().ordered)
    }

    pub fn remove(&self, guid: &Uuid) -> Option<Arc<Mapping>> {
        let mut inner = self.inner.write();
        let removed = inner.by_guid.remove(guid)?;
        inner.rebuild();
        debug!(guid = %guid, "Removed mapping");
        Some(removed)
    }

    /// Remove every mapping whose first path pattern equals `path`.
    pub fn remove_by_path(&self, path: &str) -> Vec<Arc<Mapping>> {
        let mut inner = self.inner.write();
        let guids: Vec<Uuid> = inner
            .by_guid
            .values()
            .filter(|m| m.path() == Some(path))
            .map(|m| m.guid)
            .collect();
        let removed: Vec<_> = guids
            .iter()
            .filter_map(|guid| inner.by_guid.remove(guid))
            .collect();
        if !removed.is_empty() {
            inner.rebuild();
        }
        removed
    }

    /// Remove all mappings except admin interface ones.
    pub fn reset(&self) {
        let mut inner = self.inner.write();
        inner.by_guid.retain(|_, m| m.is_admin_interface);
        inner.rebuild();
        info!("Mappings reset");
    }

    pub fn len(&self) -> usize {
        self.inner.read().by_guid.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().by_guid.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matchers::{MatcherSpec, RequestMatcherSpec};
    use crate::message::ResponseMessage;

    fn mapping(guid: Uuid, priority: i32, path: &str, status: u16) -> Mapping {
        Mapping::builder()
            .with_guid(guid)
            .at_priority(priority)
            .given(RequestMatcherSpec::new().with_path(MatcherSpec::exact(path)))
            .respond_with(ResponseMessage::new(status))
            .build()
            .unwrap()
    }

    #[test]
    fn test_snapshot_order() {
        let registry = MappingRegistry::new();
        let a = Uuid::from_u128(2);
        let b = Uuid::from_u128(1);
        let c = Uuid::from_u128(3);
        registry.upsert(mapping(a, 5, "/a", 200)).unwrap();
        registry.upsert(mapping(b, 5, "/b", 200)).unwrap();
        registry.upsert(mapping(c, -1, "/c", 200)).unwrap();

        let order: Vec<Uuid> = registry.snapshot().iter().map(|m| m.guid).collect();
        assert_eq!(order, vec![c, b, a]);
    }

    #[test]
    fn test_upsert_replaces_and_keeps_created_at() {
        let registry = MappingRegistry::new();
        let guid = Uuid::new_v4();

        let first = registry.upsert(mapping(guid, 0, "/a", 200)).unwrap();
        let second = registry.upsert(mapping(guid, 0, "/a", 201)).unwrap();

        assert_eq!(registry.len(), 1);
        assert_eq!(second.created_at, first.created_at);
        assert!(second.updated_at >= first.updated_at);
        match &registry.get(&guid).unwrap().provider {
            crate::mapping::ResponseProvider::Static(r) => assert_eq!(r.status, 201),
            other => panic!("unexpected provider {other:?}"),
        }
    }

    #[test]
    fn test_snapshot_is_stable_during_mutation() {
        let registry = MappingRegistry::new();
        registry.upsert(mapping(Uuid::new_v4(), 0, "/a", 200)).unwrap();
        let before = registry.snapshot();
        registry.upsert(mapping(Uuid::new_v4(), 0, "/b", 200)).unwrap();

        assert_eq!(before.len(), 1);
        assert_eq!(registry.snapshot().len(), 2);
    }

    #[test]
    fn test_remove_by_guid_and_path() {
        let registry = MappingRegistry::new();
        let keep = Uuid::new_v4();
        let gone = Uuid::new_v4();
        registry.upsert(mapping(keep, 0, "/keep", 200)).unwrap();
        registry.upsert(mapping(gone, 0, "/drop", 200)).unwrap();
        registry.upsert(mapping(Uuid::new_v4(), 1, "/drop", 200)).unwrap();

        assert_eq!(registry.remove_by_path("/drop").len(), 2);
        assert!(registry.remove(&gone).is_none());
        assert!(registry.remove(&keep).is_some());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_reset_keeps_admin_mappings() {
        let registry = MappingRegistry::new();
        registry.upsert(mapping(Uuid::new_v4(), 0, "/a", 200)).unwrap();
        registry
            .upsert(
                Mapping::builder()
                    .as_admin_interface()
                    .respond_with(ResponseMessage::ok())
                    .build()
                    .unwrap(),
            )
            .unwrap();

        registry.reset();
        assert_eq!(registry.len(), 1);
        assert!(registry.snapshot()[0].is_admin_interface);
    }
}
