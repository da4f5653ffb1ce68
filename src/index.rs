//! Live, dual-keyed index of published instances.
//!
//! Instances are addressable by two derived keys:
//! - label key `<labelValue>.<namespace>` used for A/AAAA lookups
//! - reverse key, the raw host address, used for PTR lookups
//!
//! Several instances may share a key; lookups return all of them.

use parking_lot::RwLock;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tracing::debug;

use crate::error::HostportError;
use crate::filter::Selector;
use crate::instance::{Instance, InstanceId};
use crate::metrics;

/// Read access to indexed instances, as used by the resolver.
pub trait InstanceIndex: Send + Sync {
    /// All published instances under a label key. Empty if none.
    fn by_label_key(&self, key: &str) -> Result<Vec<Arc<Instance>>, HostportError>;

    /// All published instances under a reverse (host address) key. Empty if none.
    fn by_reverse_key(&self, key: &str) -> Result<Vec<Arc<Instance>>, HostportError>;
}

#[derive(Debug)]
struct Entry {
    instance: Arc<Instance>,
    label_key: Option<String>,
    reverse_key: Option<String>,
}

/// Thread-safe index shared between the reconciler and query handlers.
///
/// Each mutation holds the write lock for its whole duration, so readers only
/// ever observe states between two applied events.
#[derive(Debug, Clone)]
pub struct LiveIndex {
    selector: Arc<Selector>,
    inner: Arc<RwLock<IndexInner>>,
}

#[derive(Debug, Default)]
struct IndexInner {
    /// Every instance delivered by the source, published or not.
    instances: HashMap<InstanceId, Entry>,

    /// label key -> instance ids
    by_label: HashMap<String, BTreeSet<InstanceId>>,

    /// host address -> instance ids
    by_reverse: HashMap<String, BTreeSet<InstanceId>>,

    /// Incremented on every applied change.
    generation: u64,

    /// True after the initial enumeration was loaded.
    synced: bool,
}

impl LiveIndex {
    /// Create an empty, unsynced index using the given eligibility rules.
    pub fn new(selector: Selector) -> Self {
        Self {
            selector: Arc::new(selector),
            inner: Arc::new(RwLock::new(IndexInner::default())),
        }
    }

    /// The eligibility rules this index applies.
    pub fn selector(&self) -> &Selector {
        &self.selector
    }

    /// Replace the whole content with a fresh enumeration.
    pub fn replace_all(&self, instances: Vec<Instance>) {
        let mut fresh = IndexInner::default();
        for instance in instances {
            Self::insert(&self.selector, &mut fresh, instance);
        }

        let mut inner = self.inner.write();
        fresh.generation = inner.generation.wrapping_add(1);
        fresh.synced = inner.synced;
        *inner = fresh;

        debug!(
            instances = inner.instances.len(),
            label_keys = inner.by_label.len(),
            reverse_keys = inner.by_reverse.len(),
            "replaced index content"
        );
    }

    /// Insert or update an instance, recomputing its key memberships.
    ///
    /// Returns true if the instance is published afterwards.
    pub fn upsert(&self, instance: Instance) -> bool {
        let mut inner = self.inner.write();
        let id = instance.id();
        Self::unlink(&mut inner, &id);
        let published = Self::insert(&self.selector, &mut inner, instance);
        inner.generation = inner.generation.wrapping_add(1);
        debug!(instance = %id, published, "upserted instance");
        published
    }

    /// Remove an instance and all of its key memberships.
    pub fn remove(&self, id: &InstanceId) {
        let mut inner = self.inner.write();
        if Self::unlink(&mut inner, id).is_some() {
            inner.generation = inner.generation.wrapping_add(1);
            debug!(instance = %id, "removed instance");
        }
    }

    /// Mark the initial enumeration as loaded.
    pub fn mark_synced(&self) {
        let mut inner = self.inner.write();
        inner.synced = true;
        debug!(instances = inner.instances.len(), "index synced");
    }

    /// True once the initial enumeration has been loaded.
    pub fn synced(&self) -> bool {
        self.inner.read().synced
    }

    /// Number of changes applied so far.
    pub fn generation(&self) -> u64 {
        self.inner.read().generation
    }

    /// Number of instances known, published or not.
    pub fn instances_count(&self) -> usize {
        self.inner.read().instances.len()
    }

    /// Number of distinct label keys.
    pub fn label_keys_count(&self) -> usize {
        self.inner.read().by_label.len()
    }

    /// Number of distinct reverse keys.
    pub fn reverse_keys_count(&self) -> usize {
        self.inner.read().by_reverse.len()
    }

    /// Emit current index metrics.
    pub fn emit_metrics(&self) {
        let inner = self.inner.read();
        let published = inner
            .instances
            .values()
            .filter(|e| e.reverse_key.is_some())
            .count();

        metrics::record_index_counts(
            inner.instances.len(),
            published,
            inner.by_label.len(),
            inner.by_reverse.len(),
        );
        metrics::record_synced(inner.synced);
        metrics::record_generation(inner.generation);
    }

    fn insert(selector: &Selector, inner: &mut IndexInner, instance: Instance) -> bool {
        let id = instance.id();
        let (label_key, reverse_key) = selector.keys(&instance);

        if let Some(key) = &label_key {
            inner
                .by_label
                .entry(key.clone())
                .or_default()
                .insert(id.clone());
        }
        if let Some(key) = &reverse_key {
            inner
                .by_reverse
                .entry(key.clone())
                .or_default()
                .insert(id.clone());
        }

        let published = label_key.is_some() || reverse_key.is_some();
        inner.instances.insert(
            id,
            Entry {
                instance: Arc::new(instance),
                label_key,
                reverse_key,
            },
        );
        published
    }

    fn unlink(inner: &mut IndexInner, id: &InstanceId) -> Option<Entry> {
        let entry = inner.instances.remove(id)?;
        if let Some(key) = &entry.label_key {
            Self::unlink_key(&mut inner.by_label, key, id);
        }
        if let Some(key) = &entry.reverse_key {
            Self::unlink_key(&mut inner.by_reverse, key, id);
        }
        Some(entry)
    }

    fn unlink_key(keys: &mut HashMap<String, BTreeSet<InstanceId>>, key: &str, id: &InstanceId) {
        if let Some(ids) = keys.get_mut(key) {
            ids.remove(id);
            if ids.is_empty() {
                keys.remove(key);
            }
        }
    }

    fn resolve_ids(
        inner: &IndexInner,
        ids: Option<&BTreeSet<InstanceId>>,
        key: &str,
    ) -> Result<Vec<Arc<Instance>>, HostportError> {
        let Some(ids) = ids else {
            return Ok(Vec::new());
        };

        ids.iter()
            .map(|id| {
                inner
                    .instances
                    .get(id)
                    .map(|e| Arc::clone(&e.instance))
                    .ok_or_else(|| HostportError::IndexInconsistency {
                        key: key.to_string(),
                        instance: id.to_string(),
                    })
            })
            .collect()
    }
}

impl InstanceIndex for LiveIndex {
    fn by_label_key(&self, key: &str) -> Result<Vec<Arc<Instance>>, HostportError> {
        let inner = self.inner.read();
        Self::resolve_ids(&inner, inner.by_label.get(key), key)
    }

    fn by_reverse_key(&self, key: &str) -> Result<Vec<Arc<Instance>>, HostportError> {
        let inner = self.inner.read();
        Self::resolve_ids(&inner, inner.by_reverse.get(key), key)
    }
}
