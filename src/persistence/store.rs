use super::entity::{Entity, EntityKind};
use crate::core::{EngineError, Result};
use crate::event::subscription::EventSubscriptionEntity;
use crate::job::entity::{DeadJobEntity, JobEntity};
use chrono::{DateTime, Duration, Utc};
use std::collections::BTreeMap;
use std::sync::RwLock;
use tracing::debug;

/// One entry of a flush plan. The session emits these already ordered by the
/// dependency registry; the store applies them in sequence.
#[derive(Debug)]
pub enum FlushOp {
    Insert(Box<dyn Entity>),
    Update {
        entity: Box<dyn Entity>,
        expected_version: u32,
    },
    Delete {
        kind: EntityKind,
        id: String,
        expected_version: u32,
    },
}

impl FlushOp {
    pub fn kind(&self) -> EntityKind {
        match self {
            FlushOp::Insert(entity) => entity.kind(),
            FlushOp::Update { entity, .. } => entity.kind(),
            FlushOp::Delete { kind, .. } => *kind,
        }
    }
}

/// Narrow storage contract the engine persists through.
///
/// `flush` is all-or-nothing: every operation is validated (key free for
/// inserts, version match for updates/deletes) before any of them is applied,
/// so a failed flush leaves storage untouched and the command can be retried
/// from scratch.
///
/// The job-query surface (`acquire_due_jobs`, `try_lock_job`,
/// `reset_expired_locks`) must behave as a single compare-and-swap: under
/// concurrent acquirers, at most one worker ever holds a given job's lock.
pub trait EntityStore: Send + Sync {
    fn load(&self, kind: EntityKind, id: &str) -> Result<Option<Box<dyn Entity>>>;

    /// Apply a dependency-ordered flush plan atomically. Returns the number
    /// of rows affected.
    fn flush(&self, ops: Vec<FlushOp>) -> Result<usize>;

    /// Atomically claim up to `max_count` jobs that are due (`due_date` unset
    /// or `<= now`) and unlocked (`lock_expiration_time` unset or `< now`).
    fn acquire_due_jobs(
        &self,
        now: DateTime<Utc>,
        lock_duration: Duration,
        max_count: usize,
        lock_owner: &str,
    ) -> Result<Vec<JobEntity>>;

    /// Claim one specific job if it is still present, due and unlocked.
    fn try_lock_job(
        &self,
        job_id: &str,
        now: DateTime<Utc>,
        lock_duration: Duration,
        lock_owner: &str,
    ) -> Result<Option<JobEntity>>;

    /// Clear locks whose expiration has passed, making the jobs eligible for
    /// re-acquisition. Returns how many were reset.
    fn reset_expired_locks(&self, now: DateTime<Utc>) -> Result<usize>;

    fn find_job(&self, job_id: &str) -> Result<Option<JobEntity>>;

    fn find_dead_job(&self, job_id: &str) -> Result<Option<DeadJobEntity>>;

    /// Coarse subscription scan; fine-grained matching happens in the pure
    /// matcher over the returned snapshots.
    fn find_subscriptions(&self, scope_id: Option<&str>) -> Result<Vec<EventSubscriptionEntity>>;

    fn count(&self, kind: EntityKind) -> Result<usize>;
}

/// In-memory storage engine backing the engine by default.
///
/// All rows live under one `RwLock`, which makes every flush and every job
/// acquisition a single critical section: the compare-and-swap guarantee of
/// `acquire_due_jobs` falls out of holding the write lock for the whole
/// select-then-update pass.
#[derive(Debug, Default)]
pub struct InMemoryEngineStore {
    rows: RwLock<BTreeMap<(EntityKind, String), Box<dyn Entity>>>,
}

impl InMemoryEngineStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl EntityStore for InMemoryEngineStore {
    fn load(&self, kind: EntityKind, id: &str) -> Result<Option<Box<dyn Entity>>> {
        let rows = self.rows.read()?;
        Ok(rows.get(&(kind, id.to_string())).cloned())
    }

    fn flush(&self, ops: Vec<FlushOp>) -> Result<usize> {
        let mut rows = self.rows.write()?;

        // Validate the whole plan first so a conflict leaves storage untouched.
        for op in &ops {
            match op {
                FlushOp::Insert(entity) => {
                    let key = (entity.kind(), entity.id().to_string());
                    if rows.contains_key(&key) {
                        return Err(EngineError::IllegalState(format!(
                            "{} '{}' already exists",
                            key.0, key.1
                        )));
                    }
                }
                FlushOp::Update {
                    entity,
                    expected_version,
                } => {
                    let key = (entity.kind(), entity.id().to_string());
                    let stored = rows.get(&key).ok_or_else(|| {
                        EngineError::OptimisticLocking(format!(
                            "update of {} '{}' affected zero rows",
                            key.0, key.1
                        ))
                    })?;
                    if stored.version() != *expected_version {
                        return Err(EngineError::OptimisticLocking(format!(
                            "{} '{}' was version {}, expected {}",
                            key.0,
                            key.1,
                            stored.version(),
                            expected_version
                        )));
                    }
                }
                FlushOp::Delete {
                    kind,
                    id,
                    expected_version,
                } => {
                    let key = (*kind, id.clone());
                    let stored = rows.get(&key).ok_or_else(|| {
                        EngineError::OptimisticLocking(format!(
                            "delete of {} '{}' affected zero rows",
                            kind, id
                        ))
                    })?;
                    if stored.version() != *expected_version {
                        return Err(EngineError::OptimisticLocking(format!(
                            "{} '{}' was version {}, expected {}",
                            kind,
                            id,
                            stored.version(),
                            expected_version
                        )));
                    }
                }
            }
        }

        let affected = ops.len();
        for op in ops {
            match op {
                FlushOp::Insert(entity) => {
                    let key = (entity.kind(), entity.id().to_string());
                    rows.insert(key, entity);
                }
                FlushOp::Update {
                    mut entity,
                    expected_version,
                } => {
                    let key = (entity.kind(), entity.id().to_string());
                    entity.set_version(expected_version + 1);
                    rows.insert(key, entity);
                }
                FlushOp::Delete { kind, id, .. } => {
                    rows.remove(&(kind, id));
                }
            }
        }
        Ok(affected)
    }

    fn acquire_due_jobs(
        &self,
        now: DateTime<Utc>,
        lock_duration: Duration,
        max_count: usize,
        lock_owner: &str,
    ) -> Result<Vec<JobEntity>> {
        let mut rows = self.rows.write()?;
        let mut acquired = Vec::new();

        for ((kind, _), entity) in rows.iter_mut() {
            if acquired.len() >= max_count {
                break;
            }
            if *kind != EntityKind::Job {
                continue;
            }
            let Some(job) = entity.as_any_mut().downcast_mut::<JobEntity>() else {
                continue;
            };
            if !job.is_due(now) || job.is_locked(now) {
                continue;
            }
            job.lock_owner = Some(lock_owner.to_string());
            job.lock_expiration_time = Some(now + lock_duration);
            let version = job.version();
            job.set_version(version + 1);
            acquired.push(job.clone());
        }

        if !acquired.is_empty() {
            debug!(count = acquired.len(), owner = lock_owner, "acquired jobs");
        }
        Ok(acquired)
    }

    fn try_lock_job(
        &self,
        job_id: &str,
        now: DateTime<Utc>,
        lock_duration: Duration,
        lock_owner: &str,
    ) -> Result<Option<JobEntity>> {
        let mut rows = self.rows.write()?;
        let Some(entity) = rows.get_mut(&(EntityKind::Job, job_id.to_string())) else {
            return Ok(None);
        };
        let Some(job) = entity.as_any_mut().downcast_mut::<JobEntity>() else {
            return Ok(None);
        };
        if !job.is_due(now) || job.is_locked(now) {
            return Ok(None);
        }
        job.lock_owner = Some(lock_owner.to_string());
        job.lock_expiration_time = Some(now + lock_duration);
        let version = job.version();
        job.set_version(version + 1);
        Ok(Some(job.clone()))
    }

    fn reset_expired_locks(&self, now: DateTime<Utc>) -> Result<usize> {
        let mut rows = self.rows.write()?;
        let mut reset = 0;
        for ((kind, _), entity) in rows.iter_mut() {
            if *kind != EntityKind::Job {
                continue;
            }
            let Some(job) = entity.as_any_mut().downcast_mut::<JobEntity>() else {
                continue;
            };
            let expired = matches!(job.lock_expiration_time, Some(t) if t < now);
            if expired {
                job.lock_owner = None;
                job.lock_expiration_time = None;
                let version = job.version();
                job.set_version(version + 1);
                reset += 1;
            }
        }
        if reset > 0 {
            debug!(count = reset, "reset expired job locks");
        }
        Ok(reset)
    }

    fn find_job(&self, job_id: &str) -> Result<Option<JobEntity>> {
        let rows = self.rows.read()?;
        Ok(rows
            .get(&(EntityKind::Job, job_id.to_string()))
            .and_then(|e| e.as_any().downcast_ref::<JobEntity>())
            .cloned())
    }

    fn find_dead_job(&self, job_id: &str) -> Result<Option<DeadJobEntity>> {
        let rows = self.rows.read()?;
        Ok(rows
            .get(&(EntityKind::DeadJob, job_id.to_string()))
            .and_then(|e| e.as_any().downcast_ref::<DeadJobEntity>())
            .cloned())
    }

    fn find_subscriptions(&self, scope_id: Option<&str>) -> Result<Vec<EventSubscriptionEntity>> {
        let rows = self.rows.read()?;
        Ok(rows
            .iter()
            .filter(|((kind, _), _)| *kind == EntityKind::EventSubscription)
            .filter_map(|(_, e)| e.as_any().downcast_ref::<EventSubscriptionEntity>())
            .filter(|sub| scope_id.map_or(true, |id| sub.scope.scope_id == id))
            .cloned()
            .collect())
    }

    fn count(&self, kind: EntityKind) -> Result<usize> {
        let rows = self.rows.read()?;
        Ok(rows.keys().filter(|(k, _)| *k == kind).count())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ScopeRef;
    use crate::persistence::entity::ScopeInstanceEntity;

    fn job(id: &str) -> JobEntity {
        JobEntity::new("test-handler", ScopeRef::new("case-1")).with_id(id)
    }

    #[test]
    fn test_flush_is_all_or_nothing() {
        let store = InMemoryEngineStore::new();
        store
            .flush(vec![FlushOp::Insert(Box::new(ScopeInstanceEntity::new(
                "case-1",
            )))])
            .unwrap();

        // Second op conflicts on version; the first must not be applied.
        let err = store
            .flush(vec![
                FlushOp::Insert(Box::new(ScopeInstanceEntity::new("case-2"))),
                FlushOp::Delete {
                    kind: EntityKind::ScopeInstance,
                    id: "case-1".into(),
                    expected_version: 99,
                },
            ])
            .unwrap_err();
        assert!(err.is_optimistic_locking());
        assert_eq!(store.count(EntityKind::ScopeInstance).unwrap(), 1);
    }

    #[test]
    fn test_acquire_sets_lock_and_blocks_reacquire() {
        let store = InMemoryEngineStore::new();
        store
            .flush(vec![FlushOp::Insert(Box::new(job("j-1")))])
            .unwrap();

        let now = Utc::now();
        let acquired = store
            .acquire_due_jobs(now, Duration::milliseconds(5000), 10, "worker-1")
            .unwrap();
        assert_eq!(acquired.len(), 1);
        assert_eq!(acquired[0].lock_owner.as_deref(), Some("worker-1"));
        assert_eq!(
            acquired[0].lock_expiration_time,
            Some(now + Duration::milliseconds(5000))
        );

        let again = store
            .acquire_due_jobs(now, Duration::milliseconds(5000), 10, "worker-2")
            .unwrap();
        assert!(again.is_empty());
    }

    #[test]
    fn test_expired_lock_is_reacquirable_after_reset() {
        let store = InMemoryEngineStore::new();
        store
            .flush(vec![FlushOp::Insert(Box::new(job("j-1")))])
            .unwrap();

        let t0 = Utc::now();
        store
            .acquire_due_jobs(t0, Duration::milliseconds(100), 10, "worker-1")
            .unwrap();

        let later = t0 + Duration::milliseconds(200);
        assert_eq!(store.reset_expired_locks(later).unwrap(), 1);
        let acquired = store
            .acquire_due_jobs(later, Duration::milliseconds(100), 10, "worker-2")
            .unwrap();
        assert_eq!(acquired.len(), 1);
    }

    #[test]
    fn test_future_due_date_not_acquirable() {
        let store = InMemoryEngineStore::new();
        let now = Utc::now();
        let timer = job("j-timer").due(now + Duration::seconds(60));
        store
            .flush(vec![FlushOp::Insert(Box::new(timer))])
            .unwrap();

        assert!(store
            .acquire_due_jobs(now, Duration::seconds(5), 10, "worker-1")
            .unwrap()
            .is_empty());
        assert_eq!(
            store
                .acquire_due_jobs(
                    now + Duration::seconds(61),
                    Duration::seconds(5),
                    10,
                    "worker-1"
                )
                .unwrap()
                .len(),
            1
        );
    }
}
