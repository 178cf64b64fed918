// ============================================================================
// Jobs: durable deferred work with locking, retries and a dead store
// ============================================================================

pub mod entity;
pub mod executor;
pub mod handler;
pub mod message;
pub mod scheduler;

pub use entity::{DeadJobEntity, JobEntity, JobType, DEFAULT_JOB_RETRIES};
pub use executor::{AsyncExecutor, AsyncExecutorHandle};
pub use handler::{JobHandler, JobHandlerRegistry};
pub use message::{ChannelMessageDispatcher, MessageDispatcher, MessageWorker};
pub use scheduler::JobScheduler;
