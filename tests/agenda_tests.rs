use flowkernel::{
    BreakpointPredicate, CommandContext, Engine, EngineError, ExitType, InstanceRuntime,
    Operation, Result, ScopeRef,
};
use std::sync::{Arc, Mutex};

/// Runtime stub that records the dispatched operations and optionally plans
/// follow-up operations, mimicking a model interpreter reacting to state.
#[derive(Default)]
struct RecordingRuntime {
    calls: Mutex<Vec<String>>,
    /// Operations to plan the first time `continue_instance` runs.
    plan_on_continue: Mutex<Vec<Operation>>,
}

impl RecordingRuntime {
    fn record(&self, call: impl Into<String>) {
        self.calls.lock().unwrap().push(call.into());
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

impl InstanceRuntime for RecordingRuntime {
    fn continue_instance(&self, ctx: &mut CommandContext, scope: &ScopeRef) -> Result<()> {
        self.record(format!("continue:{}", scope.scope_id));
        for operation in self.plan_on_continue.lock().unwrap().drain(..) {
            ctx.agenda_mut().plan(operation);
        }
        Ok(())
    }

    fn complete_item(
        &self,
        _ctx: &mut CommandContext,
        scope: &ScopeRef,
        item_id: &str,
    ) -> Result<()> {
        self.record(format!("complete:{}:{}", scope.scope_id, item_id));
        Ok(())
    }

    fn exit_item(
        &self,
        _ctx: &mut CommandContext,
        scope: &ScopeRef,
        item_id: &str,
        exit_type: ExitType,
        _exit_criterion_id: Option<&str>,
    ) -> Result<()> {
        self.record(format!("exit:{}:{}:{:?}", scope.scope_id, item_id, exit_type));
        Ok(())
    }

    fn evaluate_completion(&self, _ctx: &mut CommandContext, scope: &ScopeRef) -> Result<()> {
        self.record(format!("evaluate:{}", scope.scope_id));
        Ok(())
    }

    fn trigger_subscription(
        &self,
        _ctx: &mut CommandContext,
        scope: &ScopeRef,
        subscription_id: &str,
        _payload: Option<&serde_json::Value>,
    ) -> Result<()> {
        self.record(format!("trigger:{}:{}", scope.scope_id, subscription_id));
        Ok(())
    }
}

struct BreakOnComplete;

impl BreakpointPredicate for BreakOnComplete {
    fn is_breakpoint(&self, operation: &Operation) -> bool {
        matches!(operation, Operation::CompleteItem { .. })
    }
}

fn continue_op(scope: &str) -> Operation {
    Operation::ContinueInstance {
        scope: ScopeRef::new(scope),
    }
}

fn complete_op(scope: &str, item: &str) -> Operation {
    Operation::CompleteItem {
        scope: ScopeRef::new(scope),
        item_id: item.into(),
    }
}

#[test]
fn test_operations_dispatch_in_plan_order() {
    let runtime = Arc::new(RecordingRuntime::default());
    *runtime.plan_on_continue.lock().unwrap() = vec![
        complete_op("case-1", "item-1"),
        complete_op("case-1", "item-2"),
    ];
    let engine = Engine::builder()
        .instance_runtime(Arc::clone(&runtime) as Arc<dyn InstanceRuntime>)
        .build()
        .unwrap();

    let continuation = engine.run_operation(continue_op("case-1")).unwrap();
    assert!(continuation.is_none());
    assert_eq!(
        runtime.calls(),
        vec![
            "continue:case-1",
            "complete:case-1:item-1",
            "complete:case-1:item-2"
        ]
    );
}

#[test]
fn test_completion_evaluation_preempts_queued_work() {
    let runtime = Arc::new(RecordingRuntime::default());
    *runtime.plan_on_continue.lock().unwrap() = vec![
        complete_op("case-1", "item-1"),
        Operation::EvaluateCompletion {
            scope: ScopeRef::new("stage-1"),
        },
    ];
    let engine = Engine::builder()
        .instance_runtime(Arc::clone(&runtime) as Arc<dyn InstanceRuntime>)
        .build()
        .unwrap();

    engine.run_operation(continue_op("case-1")).unwrap();
    assert_eq!(
        runtime.calls(),
        vec![
            "continue:case-1",
            "evaluate:stage-1",
            "complete:case-1:item-1"
        ]
    );
}

#[test]
fn test_breakpoint_captures_remaining_operations() {
    let runtime = Arc::new(RecordingRuntime::default());
    *runtime.plan_on_continue.lock().unwrap() = vec![
        complete_op("case-1", "item-1"),
        complete_op("case-1", "item-2"),
    ];
    let engine = Engine::builder()
        .instance_runtime(Arc::clone(&runtime) as Arc<dyn InstanceRuntime>)
        .breakpoints(Arc::new(BreakOnComplete))
        .build()
        .unwrap();

    let continuation = engine
        .run_operation(continue_op("case-1"))
        .unwrap()
        .unwrap();
    // Only the initial operation ran; both completes were captured.
    assert_eq!(runtime.calls(), vec!["continue:case-1"]);
    assert_eq!(continuation.scope.scope_id, "case-1");
    assert_eq!(continuation.operations.len(), 2);
}

#[test]
fn test_resume_replays_captured_operations() {
    let runtime = Arc::new(RecordingRuntime::default());
    *runtime.plan_on_continue.lock().unwrap() =
        vec![complete_op("case-1", "item-1")];
    let breaking = Engine::builder()
        .instance_runtime(Arc::clone(&runtime) as Arc<dyn InstanceRuntime>)
        .breakpoints(Arc::new(BreakOnComplete))
        .build()
        .unwrap();

    let continuation = breaking
        .run_operation(continue_op("case-1"))
        .unwrap()
        .unwrap();

    // Resume on an engine without breakpoints; the captured work completes.
    let resuming = Engine::builder()
        .instance_runtime(Arc::clone(&runtime) as Arc<dyn InstanceRuntime>)
        .build()
        .unwrap();
    let rest = resuming.resume_continuation(&continuation).unwrap();
    assert!(rest.is_none());
    assert_eq!(
        runtime.calls(),
        vec!["continue:case-1", "complete:case-1:item-1"]
    );
}

#[test]
fn test_continuation_survives_serialization() {
    let runtime = Arc::new(RecordingRuntime::default());
    *runtime.plan_on_continue.lock().unwrap() = vec![complete_op("case-1", "item-1")];
    let engine = Engine::builder()
        .instance_runtime(Arc::clone(&runtime) as Arc<dyn InstanceRuntime>)
        .breakpoints(Arc::new(BreakOnComplete))
        .build()
        .unwrap();

    let continuation = engine
        .run_operation(continue_op("case-1"))
        .unwrap()
        .unwrap();
    let json = serde_json::to_string(&continuation).unwrap();
    let restored = serde_json::from_str(&json).unwrap();
    assert_eq!(continuation, restored);
}

#[test]
fn test_runtime_failure_rolls_back_command() {
    struct FailingRuntime;
    impl InstanceRuntime for FailingRuntime {
        fn continue_instance(&self, ctx: &mut CommandContext, _scope: &ScopeRef) -> Result<()> {
            ctx.db_session().insert(Box::new(
                flowkernel::persistence::ScopeInstanceEntity::new("case-1"),
            ))?;
            Err(EngineError::Engine("interpreter failed".into()))
        }
        fn complete_item(
            &self,
            _ctx: &mut CommandContext,
            _scope: &ScopeRef,
            _item_id: &str,
        ) -> Result<()> {
            Ok(())
        }
        fn exit_item(
            &self,
            _ctx: &mut CommandContext,
            _scope: &ScopeRef,
            _item_id: &str,
            _exit_type: ExitType,
            _exit_criterion_id: Option<&str>,
        ) -> Result<()> {
            Ok(())
        }
        fn evaluate_completion(&self, _ctx: &mut CommandContext, _scope: &ScopeRef) -> Result<()> {
            Ok(())
        }
        fn trigger_subscription(
            &self,
            _ctx: &mut CommandContext,
            _scope: &ScopeRef,
            _subscription_id: &str,
            _payload: Option<&serde_json::Value>,
        ) -> Result<()> {
            Ok(())
        }
    }

    let engine = Engine::builder()
        .instance_runtime(Arc::new(FailingRuntime))
        .build()
        .unwrap();
    let result = engine.run_operation(continue_op("case-1"));
    assert!(result.is_err());
    assert_eq!(
        engine
            .store()
            .count(flowkernel::EntityKind::ScopeInstance)
            .unwrap(),
        0
    );
}
