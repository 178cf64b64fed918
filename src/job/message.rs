use super::scheduler::JobScheduler;
use crate::command::CommandExecutor;
use crate::core::Result;
use chrono::{Duration, Utc};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Fire-and-forget hint that a job is ready now. Delivery is best-effort;
/// the polling acquisition loop is the safety net for lost hints.
pub trait MessageDispatcher: Send + Sync {
    fn send(&self, job_id: &str);
}

/// In-process dispatcher over an unbounded tokio channel. The receiving end
/// is handed to a [`MessageWorker`].
pub struct ChannelMessageDispatcher {
    tx: mpsc::UnboundedSender<String>,
}

impl ChannelMessageDispatcher {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl MessageDispatcher for ChannelMessageDispatcher {
    fn send(&self, job_id: &str) {
        // A closed receiver just means nobody is listening for hints.
        let _ = self.tx.send(job_id.to_string());
    }
}

/// Consumes job-ready hints and executes the named jobs, claiming each one
/// first so a polling worker cannot run it concurrently.
pub struct MessageWorker;

impl MessageWorker {
    pub fn spawn(
        scheduler: Arc<JobScheduler>,
        commands: Arc<CommandExecutor>,
        mut rx: mpsc::UnboundedReceiver<String>,
        lock_owner: String,
        lock_duration: Duration,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(job_id) = rx.recv().await {
                if let Err(err) =
                    message_for_job_received(&scheduler, &commands, &job_id, &lock_owner, lock_duration)
                {
                    warn!(job_id = %job_id, error = %err, "message-triggered job failed");
                }
            }
            debug!("message worker channel closed");
        })
    }
}

/// Handle one job-ready hint. A job that is gone or already locked by
/// another worker is silently skipped; hints are at-least-once.
pub fn message_for_job_received(
    scheduler: &JobScheduler,
    commands: &CommandExecutor,
    job_id: &str,
    lock_owner: &str,
    lock_duration: Duration,
) -> Result<()> {
    match scheduler.try_lock(job_id, Utc::now(), lock_duration, lock_owner)? {
        Some(job) => scheduler.execute_job(commands, &job),
        None => {
            debug!(job_id = %job_id, "job unavailable, skipping hint");
            Ok(())
        }
    }
}
