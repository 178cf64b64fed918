// ============================================================================
// Agenda: the per-command operation scheduler
// ============================================================================

pub mod operation;

use crate::command::CommandContext;
use crate::core::{EngineError, Result, ScopeRef};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tracing::debug;

pub use operation::{ExitType, Operation};

/// Ordered queue of pending operations, owned exclusively by one
/// [`CommandContext`]. FIFO, except operations whose type defines a
/// plan-first rule, which go to the head.
#[derive(Debug, Default)]
pub struct Agenda {
    operations: VecDeque<Operation>,
}

impl Agenda {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn plan(&mut self, operation: Operation) {
        debug!(operation = %operation, "operation planned");
        if operation.plan_first() {
            self.operations.push_front(operation);
        } else {
            self.operations.push_back(operation);
        }
    }

    /// Pop the head operation. Popping an empty agenda is programmer error.
    pub fn next(&mut self) -> Result<Operation> {
        self.operations
            .pop_front()
            .ok_or_else(|| EngineError::IllegalState("agenda is empty".into()))
    }

    pub fn peek(&self) -> Option<&Operation> {
        self.operations.front()
    }

    pub(crate) fn drain_remaining(&mut self) -> Vec<Operation> {
        self.operations.drain(..).collect()
    }
}

/// The narrow contract the model interpreter implements. The agenda loop
/// dispatches each popped operation here with the live command context, so
/// the interpreter can mutate entities and plan further operations.
pub trait InstanceRuntime: Send + Sync {
    fn continue_instance(&self, ctx: &mut CommandContext, scope: &ScopeRef) -> Result<()>;

    fn complete_item(&self, ctx: &mut CommandContext, scope: &ScopeRef, item_id: &str)
        -> Result<()>;

    fn exit_item(
        &self,
        ctx: &mut CommandContext,
        scope: &ScopeRef,
        item_id: &str,
        exit_type: ExitType,
        exit_criterion_id: Option<&str>,
    ) -> Result<()>;

    fn evaluate_completion(&self, ctx: &mut CommandContext, scope: &ScopeRef) -> Result<()>;

    fn trigger_subscription(
        &self,
        ctx: &mut CommandContext,
        scope: &ScopeRef,
        subscription_id: &str,
        payload: Option<&serde_json::Value>,
    ) -> Result<()>;
}

/// Consulted before every pop; a hit suspends the command and captures the
/// remaining agenda as a [`Continuation`].
pub trait BreakpointPredicate: Send + Sync {
    fn is_breakpoint(&self, operation: &Operation) -> bool;
}

/// Serializable snapshot of the operations left pending for one instance
/// when a breakpoint suspended execution. Stored externally; resumed by
/// replanning onto a fresh command context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Continuation {
    pub scope: ScopeRef,
    pub operations: Vec<Operation>,
}

fn dispatch(
    runtime: &dyn InstanceRuntime,
    ctx: &mut CommandContext,
    operation: Operation,
) -> Result<()> {
    match operation {
        Operation::ContinueInstance { scope } => runtime.continue_instance(ctx, &scope),
        Operation::CompleteItem { scope, item_id } => {
            runtime.complete_item(ctx, &scope, &item_id)
        }
        Operation::ExitItem {
            scope,
            item_id,
            exit_type,
            exit_criterion_id,
        } => runtime.exit_item(
            ctx,
            &scope,
            &item_id,
            exit_type,
            exit_criterion_id.as_deref(),
        ),
        Operation::EvaluateCompletion { scope } => runtime.evaluate_completion(ctx, &scope),
        Operation::TriggerSubscription {
            scope,
            subscription_id,
            payload,
        } => runtime.trigger_subscription(ctx, &scope, &subscription_id, payload.as_ref()),
    }
}

/// Drain the context's agenda, dispatching operations in order until it is
/// empty or a breakpoint fires. On a breakpoint the remaining operations are
/// captured and removed from the live agenda; the command then returns
/// normally (committing whatever already ran).
///
/// Execution order is strictly the agenda order, so replays with a fixed
/// seed and fixed synchronous triggers are deterministic.
pub fn run_agenda(
    ctx: &mut CommandContext,
    runtime: &dyn InstanceRuntime,
    breakpoints: Option<&dyn BreakpointPredicate>,
) -> Result<Option<Continuation>> {
    loop {
        let at_breakpoint = match ctx.agenda().peek() {
            None => return Ok(None),
            Some(op) => breakpoints.map_or(false, |b| b.is_breakpoint(op)),
        };

        if at_breakpoint {
            let operations = ctx.agenda_mut().drain_remaining();
            let scope = match operations.first() {
                Some(op) => op.scope().clone(),
                None => return Ok(None),
            };
            debug!(scope = %scope, pending = operations.len(), "breakpoint hit, capturing continuation");
            return Ok(Some(Continuation { scope, operations }));
        }

        let operation = ctx.agenda_mut().next()?;
        debug!(operation = %operation, "operation executing");
        dispatch(runtime, ctx, operation)?;
    }
}
