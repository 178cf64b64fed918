use super::scheduler::JobScheduler;
use crate::command::CommandExecutor;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Background worker that polls for due jobs and executes them.
///
/// Two loops run per executor:
///
/// ```text
/// acquisition loop            sweep loop
///      |                          |
///  acquire page              wait interval
///      |                          |
///  execute each job          reset expired locks
///      |                          |
///  backoff when idle             ...
/// ```
///
/// The acquisition loop is the safety net for every job, including
/// message-notified ones whose hint was lost.
pub struct AsyncExecutor {
    scheduler: Arc<JobScheduler>,
    commands: Arc<CommandExecutor>,
    lock_owner: String,
    lock_duration: chrono::Duration,
    acquire_page_size: usize,
    idle_backoff_min: Duration,
    idle_backoff_max: Duration,
    sweep_interval: Duration,
}

impl AsyncExecutor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        scheduler: Arc<JobScheduler>,
        commands: Arc<CommandExecutor>,
        lock_owner: String,
        lock_duration: chrono::Duration,
        acquire_page_size: usize,
        idle_backoff_min: Duration,
        idle_backoff_max: Duration,
        sweep_interval: Duration,
    ) -> Self {
        Self {
            scheduler,
            commands,
            lock_owner,
            lock_duration,
            acquire_page_size,
            idle_backoff_min,
            idle_backoff_max,
            sweep_interval,
        }
    }

    /// Spawn both loops. Must be called from within a tokio runtime.
    pub fn start(self) -> AsyncExecutorHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        info!(lock_owner = %self.lock_owner, "async executor starting");

        let acquisition = tokio::spawn(acquisition_loop(
            Arc::clone(&self.scheduler),
            Arc::clone(&self.commands),
            self.lock_owner.clone(),
            self.lock_duration,
            self.acquire_page_size,
            self.idle_backoff_min,
            self.idle_backoff_max,
            shutdown_rx.clone(),
        ));
        let sweep = tokio::spawn(sweep_loop(
            Arc::clone(&self.scheduler),
            self.sweep_interval,
            shutdown_rx,
        ));

        AsyncExecutorHandle {
            shutdown: shutdown_tx,
            tasks: vec![acquisition, sweep],
        }
    }
}

/// Controls a running [`AsyncExecutor`].
pub struct AsyncExecutorHandle {
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl AsyncExecutorHandle {
    /// Signal shutdown and wait for both loops to finish. Jobs already
    /// claimed but not yet started are released back for other workers.
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        for task in self.tasks {
            let _ = task.await;
        }
        info!("async executor stopped");
    }
}

#[allow(clippy::too_many_arguments)]
async fn acquisition_loop(
    scheduler: Arc<JobScheduler>,
    commands: Arc<CommandExecutor>,
    lock_owner: String,
    lock_duration: chrono::Duration,
    acquire_page_size: usize,
    idle_backoff_min: Duration,
    idle_backoff_max: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut backoff = idle_backoff_min;
    loop {
        if *shutdown.borrow() {
            break;
        }

        let acquired = match scheduler.acquire_jobs(
            Utc::now(),
            lock_duration,
            acquire_page_size,
            &lock_owner,
        ) {
            Ok(jobs) => jobs,
            Err(err) => {
                warn!(error = %err, "job acquisition failed");
                Vec::new()
            }
        };
        let page_full = acquired.len() == acquire_page_size;
        let had_work = !acquired.is_empty();

        let mut remaining = acquired.into_iter();
        while let Some(job) = remaining.next() {
            if *shutdown.borrow() {
                // Release what we claimed but will not run.
                for unran in std::iter::once(job).chain(remaining.by_ref()) {
                    if let Err(err) = scheduler.unacquire(&commands, &unran.id) {
                        warn!(job_id = %unran.id, error = %err, "failed to release job on shutdown");
                    }
                }
                break;
            }
            // Failures are recorded on the job itself; the loop moves on.
            let _ = scheduler.execute_job(&commands, &job);
        }

        if *shutdown.borrow() {
            break;
        }

        if had_work {
            backoff = idle_backoff_min;
        }
        if page_full {
            // More work is likely waiting; go straight back to acquire.
            continue;
        }

        tokio::select! {
            _ = tokio::time::sleep(backoff) => {}
            _ = shutdown.changed() => break,
        }
        if !had_work {
            backoff = (backoff * 2).min(idle_backoff_max);
        }
    }
    debug!(lock_owner = %lock_owner, "acquisition loop exited");
}

async fn sweep_loop(
    scheduler: Arc<JobScheduler>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = shutdown.changed() => break,
        }
        match scheduler.reset_expired_locks(Utc::now()) {
            Ok(0) => {}
            Ok(count) => info!(count, "reset expired job locks"),
            Err(err) => warn!(error = %err, "expired lock sweep failed"),
        }
    }
    debug!("sweep loop exited");
}
