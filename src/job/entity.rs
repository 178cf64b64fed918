use crate::core::{new_id, ScopeRef};
use crate::persistence::entity::{impl_entity, Entity, EntityKind};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::any::Any;

pub const DEFAULT_JOB_RETRIES: u32 = 3;

/// Job type discriminator. `Timer` jobs carry a future due date; `Message`
/// jobs are ready immediately; `History` jobs batch audit work. The engine
/// treats all three uniformly through due-date semantics; the discriminator
/// is retained for storage layers that post-process completed history jobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    Message,
    Timer,
    History,
}

/// A durable, lockable record of deferred work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobEntity {
    pub id: String,
    pub job_type: JobType,
    pub handler_type: String,
    pub handler_configuration: Option<Value>,
    pub scope: ScopeRef,
    /// `None` means "ready now".
    pub due_date: Option<DateTime<Utc>>,
    pub lock_owner: Option<String>,
    pub lock_expiration_time: Option<DateTime<Utc>>,
    pub retries: u32,
    pub exception_message: Option<String>,
    pub create_time: DateTime<Utc>,
    version: u32,
}

impl JobEntity {
    pub fn new(handler_type: impl Into<String>, scope: ScopeRef) -> Self {
        Self {
            id: new_id(),
            job_type: JobType::Message,
            handler_type: handler_type.into(),
            handler_configuration: None,
            scope,
            due_date: None,
            lock_owner: None,
            lock_expiration_time: None,
            retries: DEFAULT_JOB_RETRIES,
            exception_message: None,
            create_time: Utc::now(),
            version: 1,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Set a due date, making this a timer job.
    pub fn due(mut self, due_date: DateTime<Utc>) -> Self {
        self.due_date = Some(due_date);
        self.job_type = JobType::Timer;
        self
    }

    pub fn history(mut self) -> Self {
        self.job_type = JobType::History;
        self
    }

    pub fn retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    pub fn configuration(mut self, configuration: Value) -> Self {
        self.handler_configuration = Some(configuration);
        self
    }

    /// Whether the job is eligible for execution at `now`.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.due_date.map_or(true, |due| due <= now)
    }

    /// Whether an unexpired lock is held on this job.
    pub fn is_locked(&self, now: DateTime<Utc>) -> bool {
        self.lock_expiration_time.map_or(false, |t| t >= now)
    }
}

impl_entity!(JobEntity, EntityKind::Job);

/// A job whose retries are exhausted. Retained durably with the last
/// exception for inspection; never returned by acquisition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadJobEntity {
    pub id: String,
    pub job_type: JobType,
    pub handler_type: String,
    pub handler_configuration: Option<Value>,
    pub scope: ScopeRef,
    pub exception_message: Option<String>,
    pub create_time: DateTime<Utc>,
    version: u32,
}

impl DeadJobEntity {
    /// Build the dead record for an exhausted job, keeping its id so the
    /// failure can be traced back.
    pub fn from_job(job: &JobEntity, exception_message: impl Into<String>) -> Self {
        Self {
            id: job.id.clone(),
            job_type: job.job_type,
            handler_type: job.handler_type.clone(),
            handler_configuration: job.handler_configuration.clone(),
            scope: job.scope.clone(),
            exception_message: Some(exception_message.into()),
            create_time: job.create_time,
            version: 1,
        }
    }
}

impl_entity!(DeadJobEntity, EntityKind::DeadJob);
