use super::entity::{DeadJobEntity, JobEntity};
use super::handler::JobHandlerRegistry;
use super::message::MessageDispatcher;
use crate::command::{CommandContext, CommandExecutor, TransactionPhase};
use crate::core::{EngineError, Result};
use crate::persistence::{EntityKind, EntityStore};
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tracing::{debug, warn};

/// The async job scheduler's service surface. Jobs are owned exclusively by
/// this service; other components create or read them only through here.
pub struct JobScheduler {
    store: Arc<dyn EntityStore>,
    handlers: Arc<JobHandlerRegistry>,
    dispatcher: Option<Arc<dyn MessageDispatcher>>,
    unacquire_extension: Duration,
}

impl JobScheduler {
    pub fn new(
        store: Arc<dyn EntityStore>,
        handlers: Arc<JobHandlerRegistry>,
        dispatcher: Option<Arc<dyn MessageDispatcher>>,
        unacquire_extension: Duration,
    ) -> Self {
        Self {
            store,
            handlers,
            dispatcher,
            unacquire_extension,
        }
    }

    /// Persist a new job through the owning command's session, so the row
    /// exists only if that command commits.
    ///
    /// When a message dispatcher is configured and the job is ready now, the
    /// job id is sent after the COMMITTED phase, never for work that was
    /// rolled back. Non-transactional contexts still flush and fire their
    /// phases when the owning command returns, so the same listener covers
    /// both cases.
    pub fn schedule(&self, ctx: &mut CommandContext, job: JobEntity) -> Result<String> {
        if job.handler_type.is_empty() {
            return Err(EngineError::IllegalArgument(
                "job handler type must be set".into(),
            ));
        }
        let job_id = job.id.clone();
        let notify = job.due_date.is_none();
        ctx.db_session().insert(Box::new(job))?;
        debug!(job_id = %job_id, "job scheduled");

        if notify {
            if let Some(dispatcher) = &self.dispatcher {
                let dispatcher = Arc::clone(dispatcher);
                let id = job_id.clone();
                ctx.add_transaction_listener(
                    TransactionPhase::Committed,
                    Box::new(move || dispatcher.send(&id)),
                );
            }
        }
        Ok(job_id)
    }

    /// Atomically claim up to `max_count` due, unlocked jobs for `owner`.
    pub fn acquire_jobs(
        &self,
        now: DateTime<Utc>,
        lock_duration: Duration,
        max_count: usize,
        owner: &str,
    ) -> Result<Vec<JobEntity>> {
        self.store
            .acquire_due_jobs(now, lock_duration, max_count, owner)
    }

    /// Claim one specific job (message-notified path). `None` when the job
    /// is gone or already claimed by another worker.
    pub fn try_lock(
        &self,
        job_id: &str,
        now: DateTime<Utc>,
        lock_duration: Duration,
        owner: &str,
    ) -> Result<Option<JobEntity>> {
        self.store.try_lock_job(job_id, now, lock_duration, owner)
    }

    /// Run an acquired job's handler inside a command; on success the job row
    /// is deleted in that same command. On failure the handler's work rolls
    /// back and retry bookkeeping runs in a separate follow-up command, so a
    /// failing job can never get stuck invisible.
    pub fn execute_job(&self, executor: &CommandExecutor, job: &JobEntity) -> Result<()> {
        let job_id = job.id.clone();
        let handlers = Arc::clone(&self.handlers);
        let run = |ctx: &mut CommandContext| -> Result<()> {
            let Some(current) = ctx
                .db_session()
                .find::<JobEntity>(EntityKind::Job, &job_id)?
                .cloned()
            else {
                // Deleted meanwhile; tolerated under at-least-once delivery.
                return Ok(());
            };
            let handler = handlers.get(&current.handler_type).ok_or_else(|| {
                EngineError::IllegalArgument(format!(
                    "no job handler registered for type '{}'",
                    current.handler_type
                ))
            })?;
            handler.execute(ctx, &current)?;
            ctx.db_session().delete(EntityKind::Job, &job_id)?;
            Ok(())
        };

        match executor.execute(&run) {
            Ok(()) => {
                debug!(job_id = %job.id, "job executed");
                Ok(())
            }
            Err(err) => {
                warn!(job_id = %job.id, error = %err, "job handler failed");
                self.record_failure(executor, &job.id, &err);
                Err(err)
            }
        }
    }

    /// Follow-up command after a handler failure: clear the lock, decrement
    /// retries, record the exception; at zero retries move the job to the
    /// dead store instead of rescheduling it.
    fn record_failure(&self, executor: &CommandExecutor, job_id: &str, error: &EngineError) {
        let id = job_id.to_string();
        let message = error.to_string();
        let bookkeeping = |ctx: &mut CommandContext| -> Result<()> {
            let Some(current) = ctx
                .db_session()
                .find::<JobEntity>(EntityKind::Job, &id)?
                .cloned()
            else {
                return Ok(());
            };
            let remaining = current.retries.saturating_sub(1);
            if remaining == 0 {
                let dead = DeadJobEntity::from_job(&current, message.clone());
                ctx.db_session().delete(EntityKind::Job, &id)?;
                ctx.db_session().insert(Box::new(dead))?;
                debug!(job_id = %id, "job moved to dead store");
            } else {
                let job = ctx
                    .db_session()
                    .find_mut::<JobEntity>(EntityKind::Job, &id)?
                    .ok_or_else(|| EngineError::not_found("job", &id))?;
                job.retries = remaining;
                job.lock_owner = None;
                job.lock_expiration_time = None;
                job.exception_message = Some(message.clone());
            }
            Ok(())
        };
        if let Err(err) = executor.execute(&bookkeeping) {
            warn!(job_id = %job_id, error = %err, "job failure bookkeeping failed");
        }
    }

    /// Voluntarily release a claimed job without touching retries or the
    /// recorded exception. The lock window is extended (not cleared) so the
    /// reset-expired-locks sweep cannot race the release; the extension is a
    /// tunable on the engine config.
    pub fn unacquire(&self, executor: &CommandExecutor, job_id: &str) -> Result<()> {
        let id = job_id.to_string();
        let extension = self.unacquire_extension;
        executor.execute(&|ctx: &mut CommandContext| -> Result<()> {
            let Some(job) = ctx
                .db_session()
                .find_mut::<JobEntity>(EntityKind::Job, &id)?
            else {
                return Ok(());
            };
            job.lock_owner = None;
            job.lock_expiration_time = Some(Utc::now() + extension);
            Ok(())
        })
    }

    /// Clear locks whose expiration passed without completion; how crashed
    /// workers are recovered from.
    pub fn reset_expired_locks(&self, now: DateTime<Utc>) -> Result<usize> {
        self.store.reset_expired_locks(now)
    }

    pub fn find_job(&self, job_id: &str) -> Result<Option<JobEntity>> {
        self.store.find_job(job_id)
    }

    pub fn find_dead_job(&self, job_id: &str) -> Result<Option<DeadJobEntity>> {
        self.store.find_dead_job(job_id)
    }
}
