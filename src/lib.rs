// ============================================================================
// FlowKernel Library
// ============================================================================

//! A transactional orchestration kernel for process/case instances.
//!
//! - Command kernel: every state change runs as a command through an
//!   interceptor chain (logging, optimistic-lock retry, transaction boundary)
//!   with per-command sessions flushed in dependency order on commit.
//! - Agenda: operations over a running instance are planned onto a FIFO queue
//!   and dispatched to a pluggable instance runtime, with breakpoints that
//!   suspend execution into a serializable continuation.
//! - Jobs: durable deferred work with lock-based acquisition, retries and a
//!   dead-job store, executed by a background async worker.
//! - Events: durable subscriptions matched against incoming events and
//!   consumed transactionally.
//!
//! # Examples
//!
//! ```
//! use flowkernel::persistence::VariableEntity;
//! use flowkernel::{CommandContext, Engine, Result, ScopeRef};
//!
//! # fn main() -> Result<()> {
//! let engine = Engine::builder().build()?;
//!
//! engine.execute(&|ctx: &mut CommandContext| -> Result<()> {
//!     let status = VariableEntity::new(
//!         ScopeRef::new("case-1"),
//!         "status",
//!         serde_json::json!("open"),
//!     );
//!     ctx.db_session().insert(Box::new(status))?;
//!     Ok(())
//! })?;
//! # Ok(())
//! # }
//! ```

pub mod agenda;
pub mod command;
pub mod core;
pub mod engine;
pub mod event;
pub mod job;
pub mod persistence;

// Re-export main types for convenience
pub use crate::core::{new_id, EngineError, Result, ScopeRef};
pub use agenda::{
    Agenda, BreakpointPredicate, Continuation, ExitType, InstanceRuntime, Operation,
};
pub use command::{CommandConfig, CommandContext, CommandExecutor, TransactionPhase};
pub use engine::{Engine, EngineBuilder, EngineConfig};
pub use event::{CorrelationEvent, EventRegistry, EventSubscriptionEntity, EventType};
pub use job::{JobEntity, JobHandler, JobScheduler};
pub use persistence::{EntityKind, EntityStore, InMemoryEngineStore};
