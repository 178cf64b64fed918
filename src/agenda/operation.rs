use crate::core::ScopeRef;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// How a plan item leaves its scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitType {
    Exit,
    Terminate,
    Complete,
}

/// One atomic state-transition step over a running instance.
///
/// A closed set of variants dispatched by the agenda loop to the plugged-in
/// [`InstanceRuntime`](super::InstanceRuntime); operations are created by
/// commands or by other operations, consumed exactly once, never persisted
/// (except inside a captured [`Continuation`](super::Continuation)).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Operation {
    /// Drive the instance forward from its current state.
    ContinueInstance { scope: ScopeRef },
    /// Complete one item of the instance.
    CompleteItem { scope: ScopeRef, item_id: String },
    /// Exit one item, e.g. because an exit criterion fired.
    ExitItem {
        scope: ScopeRef,
        item_id: String,
        exit_type: ExitType,
        exit_criterion_id: Option<String>,
    },
    /// Re-evaluate whether a stage/scope is complete. A reactive trigger:
    /// planned at the head of the agenda.
    EvaluateCompletion { scope: ScopeRef },
    /// Fire a consumed event subscription into the instance.
    TriggerSubscription {
        scope: ScopeRef,
        subscription_id: String,
        payload: Option<Value>,
    },
}

impl Operation {
    pub fn scope(&self) -> &ScopeRef {
        match self {
            Operation::ContinueInstance { scope }
            | Operation::CompleteItem { scope, .. }
            | Operation::ExitItem { scope, .. }
            | Operation::EvaluateCompletion { scope }
            | Operation::TriggerSubscription { scope, .. } => scope,
        }
    }

    /// Operations planned at the head of the agenda instead of the tail.
    pub fn plan_first(&self) -> bool {
        matches!(self, Operation::EvaluateCompletion { .. })
    }

    pub fn name(&self) -> &'static str {
        match self {
            Operation::ContinueInstance { .. } => "continue_instance",
            Operation::CompleteItem { .. } => "complete_item",
            Operation::ExitItem { .. } => "exit_item",
            Operation::EvaluateCompletion { .. } => "evaluate_completion",
            Operation::TriggerSubscription { .. } => "trigger_subscription",
        }
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}[{}]", self.name(), self.scope())
    }
}
