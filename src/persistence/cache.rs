use super::entity::{Entity, EntityKind};
use crate::core::{EngineError, Result};
use serde_json::Value;
use std::collections::BTreeMap;

/// Where a cached entity stands relative to storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    /// Created inside this command; will be inserted on flush.
    Inserted,
    /// Loaded from storage; updated on flush only if dirty.
    Loaded,
    /// Loaded from storage, then deleted inside this command.
    Deleted,
}

#[derive(Debug)]
pub(crate) struct CacheEntry {
    pub entity: Box<dyn Entity>,
    pub status: CacheStatus,
    /// Snapshot taken when the entity entered the cache; compared against
    /// the current `persistent_state` to detect dirty entities at flush.
    pub loaded_state: Value,
}

/// Per-command identity cache over persistent entities.
///
/// At most one live entry exists per (kind, id) inside one session. A BTreeMap
/// keeps iteration deterministic, which the flush plan relies on.
#[derive(Debug, Default)]
pub struct EntityCache {
    entries: BTreeMap<(EntityKind, String), CacheEntry>,
}

impl EntityCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether any entry (live or deleted) exists for this key. Used by the
    /// session to avoid re-hitting storage for entities deleted mid-command.
    pub fn contains_key(&self, kind: EntityKind, id: &str) -> bool {
        self.entries.contains_key(&(kind, id.to_string()))
    }

    pub fn get<T: Entity>(&self, kind: EntityKind, id: &str) -> Option<&T> {
        self.entries
            .get(&(kind, id.to_string()))
            .filter(|entry| entry.status != CacheStatus::Deleted)
            .and_then(|entry| entry.entity.as_any().downcast_ref::<T>())
    }

    pub fn get_mut<T: Entity>(&mut self, kind: EntityKind, id: &str) -> Option<&mut T> {
        self.entries
            .get_mut(&(kind, id.to_string()))
            .filter(|entry| entry.status != CacheStatus::Deleted)
            .and_then(|entry| entry.entity.as_any_mut().downcast_mut::<T>())
    }

    /// Register an entity loaded from storage. A no-op if the key is already
    /// cached: the cached copy (which may carry in-command modifications) stays
    /// authoritative.
    pub fn put_loaded(&mut self, entity: Box<dyn Entity>) {
        let key = (entity.kind(), entity.id().to_string());
        if self.entries.contains_key(&key) {
            return;
        }
        let loaded_state = entity.persistent_state();
        self.entries.insert(
            key,
            CacheEntry {
                entity,
                status: CacheStatus::Loaded,
                loaded_state,
            },
        );
    }

    /// Register a newly created entity for insertion on flush.
    ///
    /// Fails with `IllegalState` if an entry with the same key already exists
    /// and does not carry the same state: two divergent in-memory copies of
    /// one record must never coexist in a session.
    pub fn put_inserted(&mut self, entity: Box<dyn Entity>) -> Result<()> {
        let key = (entity.kind(), entity.id().to_string());
        if let Some(existing) = self.entries.get(&key) {
            if existing.entity.persistent_state() == entity.persistent_state() {
                return Ok(());
            }
            return Err(EngineError::IllegalState(format!(
                "divergent copy of {} '{}' already cached",
                key.0, key.1
            )));
        }
        let loaded_state = entity.persistent_state();
        self.entries.insert(
            key,
            CacheEntry {
                entity,
                status: CacheStatus::Inserted,
                loaded_state,
            },
        );
        Ok(())
    }

    /// Mark an entity for deletion on flush. An entity inserted in the same
    /// command is dropped outright; it never reaches storage.
    pub fn mark_deleted(&mut self, kind: EntityKind, id: &str) -> Result<()> {
        let key = (kind, id.to_string());
        match self.entries.get_mut(&key) {
            None => Err(EngineError::not_found(kind.as_str(), id)),
            Some(entry) if entry.status == CacheStatus::Inserted => {
                self.entries.remove(&key);
                Ok(())
            }
            Some(entry) => {
                entry.status = CacheStatus::Deleted;
                Ok(())
            }
        }
    }

    pub(crate) fn entries(&self) -> impl Iterator<Item = (&(EntityKind, String), &CacheEntry)> {
        self.entries.iter()
    }

    pub(crate) fn is_dirty(entry: &CacheEntry) -> bool {
        entry.status == CacheStatus::Loaded && entry.entity.persistent_state() != entry.loaded_state
    }

    /// Reconcile the cache after a successful flush: inserted entries become
    /// loaded, dirty entries get a fresh snapshot and bumped version, deleted
    /// entries disappear.
    pub(crate) fn post_flush(&mut self) {
        self.entries.retain(|_, entry| entry.status != CacheStatus::Deleted);
        for entry in self.entries.values_mut() {
            if Self::is_dirty(entry) {
                let version = entry.entity.version();
                entry.entity.set_version(version + 1);
            }
            entry.status = CacheStatus::Loaded;
            entry.loaded_state = entry.entity.persistent_state();
        }
    }

    pub fn len(&self) -> usize {
        self.entries
            .values()
            .filter(|entry| entry.status != CacheStatus::Deleted)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
