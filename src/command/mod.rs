// ============================================================================
// Command Execution Kernel
// ============================================================================
//
// A command is one transactional unit of work. The kernel runs it through an
// ordered interceptor chain (logging, optimistic-lock retry, transaction
// boundary / context creation) and guarantees that the per-command sessions
// are flushed in dependency order on commit and closed on every exit path.
//
// ============================================================================

pub mod config;
pub mod context;
pub mod executor;
pub mod interceptor;

use crate::persistence::{EntityDependencyOrder, EntityStore};
use std::sync::Arc;

pub use config::{CommandConfig, TransactionPropagation};
pub use context::{CommandContext, ContextState, TransactionPhase};
pub use executor::{Command, CommandExecutor};
pub use interceptor::{
    CommandInterceptor, CommandInvocation, InterceptorChain, LogInterceptor, RetryInterceptor,
    TransactionInterceptor,
};

/// Process-wide services a command context is built from: the storage engine
/// and the static dependency registry. Read-only after bootstrap, shared by
/// reference; there is no ambient "current context" global.
#[derive(Clone)]
pub struct EngineServices {
    pub store: Arc<dyn EntityStore>,
    pub dependency_order: Arc<EntityDependencyOrder>,
}

impl EngineServices {
    pub fn new(store: Arc<dyn EntityStore>, dependency_order: Arc<EntityDependencyOrder>) -> Self {
        Self {
            store,
            dependency_order,
        }
    }
}
