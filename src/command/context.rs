use super::config::CommandConfig;
use crate::agenda::Agenda;
use crate::core::{EngineError, Result};
use crate::persistence::{DbSession, DeferredWorkSession, EntityDependencyOrder, EntityStore, SessionRegistry};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Transaction lifecycle phases a listener can attach to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransactionPhase {
    Committing,
    Committed,
    RollingBack,
    RolledBack,
}

/// Lifecycle of a command context.
///
/// ```text
/// Active ──commit──> Committed
///   │
///   └──rollback──> RolledBack
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextState {
    Active,
    Committed,
    RolledBack,
}

/// The live, exclusively owned handle to one command's sessions and agenda.
///
/// Exactly one context is current per logical execution thread; nested
/// commands either reuse it (flattening into one transaction) or run on a
/// fresh, independent context, depending on their [`CommandConfig`].
pub struct CommandContext {
    config: CommandConfig,
    sessions: SessionRegistry,
    agenda: Agenda,
    exception: Option<EngineError>,
    reused: bool,
    state: ContextState,
    listeners: HashMap<TransactionPhase, Vec<Box<dyn FnOnce() + Send>>>,
}

impl CommandContext {
    pub fn new(
        config: CommandConfig,
        store: Arc<dyn EntityStore>,
        dependency_order: Arc<EntityDependencyOrder>,
    ) -> Self {
        Self {
            config,
            sessions: SessionRegistry::new(store, dependency_order),
            agenda: Agenda::new(),
            exception: None,
            reused: false,
            state: ContextState::Active,
            listeners: HashMap::new(),
        }
    }

    pub fn config(&self) -> &CommandConfig {
        &self.config
    }

    pub fn is_transactional(&self) -> bool {
        self.config.is_transactional()
    }

    pub fn db_session(&mut self) -> &mut DbSession {
        self.sessions.db_session()
    }

    pub fn deferred_session(&mut self) -> &mut DeferredWorkSession {
        self.sessions.deferred_session()
    }

    pub fn agenda(&self) -> &Agenda {
        &self.agenda
    }

    pub fn agenda_mut(&mut self) -> &mut Agenda {
        &mut self.agenda
    }

    /// Register a callback for a transaction phase. Listeners fire in
    /// registration order and at most once.
    pub fn add_transaction_listener(
        &mut self,
        phase: TransactionPhase,
        listener: Box<dyn FnOnce() + Send>,
    ) {
        self.listeners.entry(phase).or_default().push(listener);
    }

    pub(crate) fn record_exception(&mut self, error: &EngineError) {
        if self.exception.is_none() {
            self.exception = Some(error.clone());
        }
    }

    /// The first failure recorded during this command, if any.
    pub fn exception(&self) -> Option<&EngineError> {
        self.exception.as_ref()
    }

    pub(crate) fn mark_reused(&mut self) {
        self.reused = true;
    }

    /// Whether a nested command flattened into this context.
    pub fn was_reused(&self) -> bool {
        self.reused
    }

    pub fn state(&self) -> ContextState {
        self.state
    }

    fn fire_phase(&mut self, phase: TransactionPhase) {
        if let Some(listeners) = self.listeners.remove(&phase) {
            for listener in listeners {
                listener();
            }
        }
    }

    /// Commit this context: flush sessions in dependency order, then fire
    /// `Committing` and `Committed` listeners. Returns rows affected.
    pub(crate) fn commit(&mut self) -> Result<usize> {
        if self.state != ContextState::Active {
            return Err(EngineError::IllegalState(format!(
                "cannot commit command context in state {:?}",
                self.state
            )));
        }
        let affected = self.sessions.flush()?;
        self.fire_phase(TransactionPhase::Committing);
        self.state = ContextState::Committed;
        self.fire_phase(TransactionPhase::Committed);
        debug!(rows = affected, "command context committed");
        Ok(affected)
    }

    /// Roll back this context: discard unflushed work and fire
    /// `RollingBack`/`RolledBack` listeners. Nothing is persisted.
    pub(crate) fn rollback(&mut self) {
        if self.state != ContextState::Active {
            return;
        }
        self.fire_phase(TransactionPhase::RollingBack);
        self.sessions.discard();
        self.state = ContextState::RolledBack;
        self.fire_phase(TransactionPhase::RolledBack);
        debug!("command context rolled back");
    }

    /// Close all sessions. Called on every exit path; idempotent.
    pub(crate) fn close(&mut self) {
        self.listeners.clear();
        self.sessions.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::{InMemoryEngineStore, ScopeInstanceEntity};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn context() -> CommandContext {
        CommandContext::new(
            CommandConfig::new(),
            Arc::new(InMemoryEngineStore::new()),
            Arc::new(EntityDependencyOrder::bootstrap()),
        )
    }

    #[test]
    fn test_commit_fires_phases_in_order() {
        let mut ctx = context();
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));
        for (phase, tag) in [
            (TransactionPhase::Committed, "committed"),
            (TransactionPhase::Committing, "committing"),
        ] {
            let order = Arc::clone(&order);
            ctx.add_transaction_listener(
                phase,
                Box::new(move || order.lock().unwrap().push(tag)),
            );
        }
        ctx.commit().unwrap();
        assert_eq!(*order.lock().unwrap(), vec!["committing", "committed"]);
        assert_eq!(ctx.state(), ContextState::Committed);
    }

    #[test]
    fn test_rollback_discards_and_fires_phases() {
        let mut ctx = context();
        ctx.db_session()
            .insert(Box::new(ScopeInstanceEntity::new("case-1")))
            .unwrap();
        let fired = Arc::new(AtomicUsize::new(0));
        for phase in [TransactionPhase::RollingBack, TransactionPhase::RolledBack] {
            let fired = Arc::clone(&fired);
            ctx.add_transaction_listener(
                phase,
                Box::new(move || {
                    fired.fetch_add(1, Ordering::SeqCst);
                }),
            );
        }
        ctx.rollback();
        assert_eq!(fired.load(Ordering::SeqCst), 2);
        assert_eq!(ctx.state(), ContextState::RolledBack);
    }

    #[test]
    fn test_double_commit_is_illegal() {
        let mut ctx = context();
        ctx.commit().unwrap();
        assert!(matches!(ctx.commit(), Err(EngineError::IllegalState(_))));
    }

    #[test]
    fn test_commit_listeners_not_fired_on_rollback() {
        let mut ctx = context();
        let fired = Arc::new(AtomicUsize::new(0));
        let f = Arc::clone(&fired);
        ctx.add_transaction_listener(
            TransactionPhase::Committed,
            Box::new(move || {
                f.fetch_add(1, Ordering::SeqCst);
            }),
        );
        ctx.rollback();
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }
}
