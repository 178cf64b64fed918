use super::cache::{CacheStatus, EntityCache};
use super::dependency::EntityDependencyOrder;
use super::entity::{Entity, EntityKind};
use super::store::{EntityStore, FlushOp};
use crate::core::{EngineError, Result};
use crate::event::subscription::EventSubscriptionEntity;
use std::sync::Arc;
use tracing::debug;

/// Entity-manager session scoped to one command.
///
/// Owns the per-command identity cache; computes and executes the
/// dependency-ordered flush plan on commit.
pub struct DbSession {
    cache: EntityCache,
    store: Arc<dyn EntityStore>,
    dependency_order: Arc<EntityDependencyOrder>,
}

impl DbSession {
    pub fn new(store: Arc<dyn EntityStore>, dependency_order: Arc<EntityDependencyOrder>) -> Self {
        Self {
            cache: EntityCache::new(),
            store,
            dependency_order,
        }
    }

    fn ensure_loaded(&mut self, kind: EntityKind, id: &str) -> Result<()> {
        if self.cache.contains_key(kind, id) {
            return Ok(());
        }
        if let Some(entity) = self.store.load(kind, id)? {
            self.cache.put_loaded(entity);
        }
        Ok(())
    }

    /// Find an entity by key, loading it into the cache on first access.
    pub fn find<T: Entity>(&mut self, kind: EntityKind, id: &str) -> Result<Option<&T>> {
        self.ensure_loaded(kind, id)?;
        Ok(self.cache.get::<T>(kind, id))
    }

    pub fn find_mut<T: Entity>(&mut self, kind: EntityKind, id: &str) -> Result<Option<&mut T>> {
        self.ensure_loaded(kind, id)?;
        Ok(self.cache.get_mut::<T>(kind, id))
    }

    /// Register a new entity for insertion on flush.
    pub fn insert(&mut self, entity: Box<dyn Entity>) -> Result<()> {
        self.cache.put_inserted(entity)
    }

    /// Mark an entity for deletion on flush. Fails with `NotFound` if the
    /// entity exists neither in the cache nor in storage.
    pub fn delete(&mut self, kind: EntityKind, id: &str) -> Result<()> {
        self.ensure_loaded(kind, id)?;
        self.cache.mark_deleted(kind, id)
    }

    /// Load all subscriptions for a scope through the cache, so repeated
    /// correlation queries within one command serve from memory and see
    /// in-command modifications.
    pub fn find_subscriptions(
        &mut self,
        scope_id: Option<&str>,
    ) -> Result<Vec<EventSubscriptionEntity>> {
        for sub in self.store.find_subscriptions(scope_id)? {
            self.cache.put_loaded(Box::new(sub));
        }
        let mut result = Vec::new();
        for ((kind, id), _) in self.cache.entries() {
            if *kind != EntityKind::EventSubscription {
                continue;
            }
            if let Some(sub) = self.cache.get::<EventSubscriptionEntity>(*kind, id) {
                if scope_id.map_or(true, |s| sub.scope.scope_id == s) {
                    result.push(sub.clone());
                }
            }
        }
        Ok(result)
    }

    pub fn cache(&self) -> &EntityCache {
        &self.cache
    }

    /// Flush pending work: inserts in dependency insert order, dirty updates,
    /// then deletes in dependency delete order. Returns rows affected.
    pub fn flush(&mut self) -> Result<usize> {
        let mut ops: Vec<FlushOp> = Vec::new();

        for kind in self.dependency_order.insert_order() {
            for ((entry_kind, _), entry) in self.cache.entries() {
                if entry_kind == kind && entry.status == CacheStatus::Inserted {
                    ops.push(FlushOp::Insert(entry.entity.clone_box()));
                }
            }
        }

        for kind in self.dependency_order.insert_order() {
            for ((entry_kind, _), entry) in self.cache.entries() {
                if entry_kind == kind && EntityCache::is_dirty(entry) {
                    ops.push(FlushOp::Update {
                        entity: entry.entity.clone_box(),
                        expected_version: entry.entity.version(),
                    });
                }
            }
        }

        for kind in self.dependency_order.delete_order() {
            for ((entry_kind, id), entry) in self.cache.entries() {
                if entry_kind == kind && entry.status == CacheStatus::Deleted {
                    ops.push(FlushOp::Delete {
                        kind: *kind,
                        id: id.clone(),
                        expected_version: entry.entity.version(),
                    });
                }
            }
        }

        if ops.is_empty() {
            return Ok(0);
        }
        let affected = self.store.flush(ops)?;
        self.cache.post_flush();
        debug!(rows = affected, "session flushed");
        Ok(affected)
    }
}

/// Deferred-work session: callbacks queued during the command, run after a
/// successful flush, dropped on rollback.
#[derive(Default)]
pub struct DeferredWorkSession {
    callbacks: Vec<Box<dyn FnOnce() + Send>>,
}

impl DeferredWorkSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn defer(&mut self, callback: Box<dyn FnOnce() + Send>) {
        self.callbacks.push(callback);
    }

    pub fn len(&self) -> usize {
        self.callbacks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.callbacks.is_empty()
    }

    fn run_all(&mut self) {
        for callback in self.callbacks.drain(..) {
            callback();
        }
    }
}

/// Per-command session registry.
///
/// Sessions are created lazily on first use and flushed/closed exactly once;
/// a flush after close is programmer error.
pub struct SessionRegistry {
    store: Arc<dyn EntityStore>,
    dependency_order: Arc<EntityDependencyOrder>,
    db: Option<DbSession>,
    deferred: Option<DeferredWorkSession>,
    closed: bool,
}

impl SessionRegistry {
    pub fn new(store: Arc<dyn EntityStore>, dependency_order: Arc<EntityDependencyOrder>) -> Self {
        Self {
            store,
            dependency_order,
            db: None,
            deferred: None,
            closed: false,
        }
    }

    pub fn db_session(&mut self) -> &mut DbSession {
        let store = &self.store;
        let order = &self.dependency_order;
        self.db
            .get_or_insert_with(|| DbSession::new(Arc::clone(store), Arc::clone(order)))
    }

    pub fn deferred_session(&mut self) -> &mut DeferredWorkSession {
        self.deferred.get_or_insert_with(DeferredWorkSession::new)
    }

    /// Flush the db session, then run deferred callbacks. Only reached on the
    /// commit path; rollback drops both sessions unflushed.
    pub fn flush(&mut self) -> Result<usize> {
        if self.closed {
            return Err(EngineError::IllegalState(
                "session registry already closed".into(),
            ));
        }
        let affected = match self.db.as_mut() {
            Some(db) => db.flush()?,
            None => 0,
        };
        if let Some(deferred) = self.deferred.as_mut() {
            deferred.run_all();
        }
        Ok(affected)
    }

    /// Discard pending work without flushing.
    pub fn discard(&mut self) {
        self.db = None;
        self.deferred = None;
    }

    /// Close all sessions. Idempotent; after closing, the registry rejects
    /// further flushes.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.db = None;
        self.deferred = None;
        self.closed = true;
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::entity::ScopeInstanceEntity;
    use crate::persistence::store::InMemoryEngineStore;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn registry() -> SessionRegistry {
        SessionRegistry::new(
            Arc::new(InMemoryEngineStore::new()),
            Arc::new(EntityDependencyOrder::bootstrap()),
        )
    }

    #[test]
    fn test_flush_inserts_and_reports_rows() {
        let mut sessions = registry();
        sessions
            .db_session()
            .insert(Box::new(ScopeInstanceEntity::new("case-1")))
            .unwrap();
        assert_eq!(sessions.flush().unwrap(), 1);
        // Nothing dirty afterwards.
        assert_eq!(sessions.flush().unwrap(), 0);
    }

    #[test]
    fn test_dirty_update_flushes_once() {
        let store: Arc<dyn EntityStore> = Arc::new(InMemoryEngineStore::new());
        let order = Arc::new(EntityDependencyOrder::bootstrap());
        {
            let mut session = DbSession::new(Arc::clone(&store), Arc::clone(&order));
            session
                .insert(Box::new(ScopeInstanceEntity::new("case-1")))
                .unwrap();
            session.flush().unwrap();
        }

        let mut session = DbSession::new(Arc::clone(&store), order);
        session
            .find_mut::<ScopeInstanceEntity>(EntityKind::ScopeInstance, "case-1")
            .unwrap()
            .unwrap()
            .ended = true;
        assert_eq!(session.flush().unwrap(), 1);
        assert_eq!(session.flush().unwrap(), 0);

        let reloaded = store
            .load(EntityKind::ScopeInstance, "case-1")
            .unwrap()
            .unwrap();
        assert_eq!(reloaded.version(), 2);
    }

    #[test]
    fn test_deferred_work_runs_on_flush() {
        let mut sessions = registry();
        let counter = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&counter);
        sessions
            .deferred_session()
            .defer(Box::new(move || {
                c.fetch_add(1, Ordering::SeqCst);
            }));
        sessions.flush().unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_flush_after_close_is_illegal() {
        let mut sessions = registry();
        sessions.close();
        assert!(matches!(
            sessions.flush(),
            Err(EngineError::IllegalState(_))
        ));
    }
}
