//! Resource Registry: resource id to descriptor plus a 64-bit counter.
//!
//! The counter holds the resource's remaining task capacity. It is stored next
//! to the descriptor under a per-entry `parking_lot::Mutex`, while the map of
//! entries sits behind a `RwLock` that is only write-locked to insert or remove.
//! Updates to different resources share the read lock and never wait on each
//! other; updates to the same resource serialize on its entry lock.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::core::descriptor::ResourceDescriptor;
use crate::core::ids::ResourceId;
use crate::core::{RegistryError, RegistryKey};

/// A resource descriptor together with its counter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceEntry {
    /// Resource description.
    pub descriptor: ResourceDescriptor,
    /// Remaining task capacity.
    pub counter: u64,
}

/// Registry of known resources, keyed by [`ResourceId`].
#[derive(Debug, Default)]
pub struct ResourceRegistry {
    entries: RwLock<HashMap<ResourceId, Arc<Mutex<ResourceEntry>>>>,
}

impl ResourceRegistry {
    /// An empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a resource.
    ///
    /// # Errors
    ///
    /// [`RegistryError::DuplicateKey`] if `id` is already registered.
    pub fn put(
        &self,
        id: ResourceId,
        descriptor: ResourceDescriptor,
        counter: u64,
    ) -> Result<(), RegistryError> {
        let mut entries = self.entries.write();
        if entries.contains_key(&id) {
            warn!(resource_id = %id, "rejected duplicate resource registration");
            return Err(RegistryError::DuplicateKey(RegistryKey::Resource(id)));
        }
        entries.insert(id, Arc::new(Mutex::new(ResourceEntry { descriptor, counter })));
        drop(entries);
        info!(resource_id = %id, counter, "resource registered");
        Ok(())
    }

    /// Overwrite a registered resource, returning the previous entry.
    ///
    /// # Errors
    ///
    /// [`RegistryError::NotFound`] if `id` is not registered.
    pub fn replace(
        &self,
        id: ResourceId,
        descriptor: ResourceDescriptor,
        counter: u64,
    ) -> Result<ResourceEntry, RegistryError> {
        self.with_entry(id, |entry| {
            std::mem::replace(entry, ResourceEntry { descriptor, counter })
        })
    }

    /// Copy of a resource's descriptor and counter.
    ///
    /// # Errors
    ///
    /// [`RegistryError::NotFound`] if `id` is not registered.
    pub fn get(&self, id: ResourceId) -> Result<ResourceEntry, RegistryError> {
        self.with_entry(id, |entry| entry.clone())
    }

    /// Current counter value.
    ///
    /// # Errors
    ///
    /// [`RegistryError::NotFound`] if `id` is not registered.
    pub fn counter(&self, id: ResourceId) -> Result<u64, RegistryError> {
        self.with_entry(id, |entry| entry.counter)
    }

    /// Add `delta` to the counter as one read-modify-write and return the new
    /// value. A result below zero or above `u64::MAX` is rejected and the
    /// counter is left unchanged.
    ///
    /// # Errors
    ///
    /// - [`RegistryError::NotFound`] if `id` is not registered
    /// - [`RegistryError::CounterOutOfRange`] if the result does not fit
    pub fn update_counter(&self, id: ResourceId, delta: i64) -> Result<u64, RegistryError> {
        self.with_entry(id, |entry| {
            let current = entry.counter;
            let next = current
                .checked_add_signed(delta)
                .ok_or(RegistryError::CounterOutOfRange { id, current, delta })?;
            entry.counter = next;
            debug!(resource_id = %id, delta, counter = next, "resource counter updated");
            Ok(next)
        })?
    }

    /// Overwrite the counter, returning the previous value.
    ///
    /// # Errors
    ///
    /// [`RegistryError::NotFound`] if `id` is not registered.
    pub fn set_counter(&self, id: ResourceId, value: u64) -> Result<u64, RegistryError> {
        self.with_entry(id, |entry| std::mem::replace(&mut entry.counter, value))
    }

    /// Mutate a resource's descriptor in place. `f` runs under the entry lock
    /// and must not call back into the registry.
    ///
    /// # Errors
    ///
    /// [`RegistryError::NotFound`] if `id` is not registered.
    pub fn update_descriptor<R>(
        &self,
        id: ResourceId,
        f: impl FnOnce(&mut ResourceDescriptor) -> R,
    ) -> Result<R, RegistryError> {
        self.with_entry(id, |entry| f(&mut entry.descriptor))
    }

    /// Unregister a resource. Returns `false` if it was not registered.
    pub fn remove(&self, id: ResourceId) -> bool {
        let removed = self.entries.write().remove(&id).is_some();
        if removed {
            info!(resource_id = %id, "resource removed");
        }
        removed
    }

    /// Whether `id` is registered.
    #[must_use]
    pub fn contains(&self, id: ResourceId) -> bool {
        self.entries.read().contains_key(&id)
    }

    /// Number of registered resources.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether no resource is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy of every entry, ordered by id. Taken under the map read lock, so no
    /// registration or removal is half-visible; each entry is copied whole
    /// under its own lock.
    #[must_use]
    pub fn snapshot(&self) -> Vec<(ResourceId, ResourceEntry)> {
        let mut out: Vec<_> = self
            .entries
            .read()
            .iter()
            .map(|(id, entry)| (*id, entry.lock().clone()))
            .collect();
        out.sort_unstable_by_key(|(id, _)| *id);
        out
    }

    /// Visit every entry of a [`ResourceRegistry::snapshot`]. The visitor runs
    /// without any registry lock held and may call back into the registry.
    pub fn for_each(&self, mut visitor: impl FnMut(ResourceId, &ResourceEntry)) {
        for (id, entry) in self.snapshot() {
            visitor(id, &entry);
        }
    }

    /// Run `f` on the entry under its lock while the map read lock is held,
    /// so removal waits for in-flight updates to finish.
    fn with_entry<R>(
        &self,
        id: ResourceId,
        f: impl FnOnce(&mut ResourceEntry) -> R,
    ) -> Result<R, RegistryError> {
        let entries = self.entries.read();
        let entry = entries
            .get(&id)
            .ok_or(RegistryError::NotFound(RegistryKey::Resource(id)))?;
        let mut guard = entry.lock();
        Ok(f(&mut guard))
    }
}
