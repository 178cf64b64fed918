use flowkernel::{
    CommandContext, CorrelationEvent, Engine, EngineError, EventRegistry,
    EventSubscriptionEntity, EventType, ExitType, InstanceRuntime, Result, ScopeRef,
};
use std::sync::{Arc, Mutex};

/// Runtime stub that records triggered subscriptions with their payloads.
#[derive(Default)]
struct TriggerRecorder {
    triggers: Mutex<Vec<(String, Option<serde_json::Value>)>>,
}

impl InstanceRuntime for TriggerRecorder {
    fn continue_instance(&self, _ctx: &mut CommandContext, _scope: &ScopeRef) -> Result<()> {
        Ok(())
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
        subscription_id: &str,
        payload: Option<&serde_json::Value>,
    ) -> Result<()> {
        self.triggers
            .lock()
            .unwrap()
            .push((subscription_id.to_string(), payload.cloned()));
        Ok(())
    }
}

fn engine(runtime: Arc<TriggerRecorder>) -> Engine {
    Engine::builder()
        .instance_runtime(runtime as Arc<dyn InstanceRuntime>)
        .build()
        .unwrap()
}

fn subscribe(engine: &Engine, subscription: EventSubscriptionEntity) -> String {
    engine
        .execute(&move |ctx: &mut CommandContext| {
            EventRegistry::subscribe(ctx, subscription.clone())
        })
        .unwrap()
}

#[test]
fn test_correlation_consumes_matching_subscription() {
    let runtime = Arc::new(TriggerRecorder::default());
    let engine = engine(Arc::clone(&runtime));
    subscribe(
        &engine,
        EventSubscriptionEntity::new(
            EventType::Message,
            "order-received",
            ScopeRef::new("case-1"),
        )
        .with_id("sub-1"),
    );

    let scope_ids = engine
        .correlate_event(&CorrelationEvent::new(EventType::Message, "order-received"))
        .unwrap();
    assert_eq!(scope_ids, vec!["case-1"]);
    assert_eq!(
        runtime.triggers.lock().unwrap().as_slice(),
        &[("sub-1".to_string(), None)]
    );
    // Consumed: the same event matches nothing on a second pass.
    assert!(engine
        .correlate_event(&CorrelationEvent::new(EventType::Message, "order-received"))
        .unwrap()
        .is_empty());
}

#[test]
fn test_event_name_and_type_must_match() {
    let runtime = Arc::new(TriggerRecorder::default());
    let engine = engine(Arc::clone(&runtime));
    subscribe(
        &engine,
        EventSubscriptionEntity::new(
            EventType::Message,
            "order-received",
            ScopeRef::new("case-1"),
        ),
    );

    assert!(engine
        .correlate_event(&CorrelationEvent::new(EventType::Message, "order-shipped"))
        .unwrap()
        .is_empty());
    assert!(engine
        .correlate_event(&CorrelationEvent::new(EventType::Signal, "order-received"))
        .unwrap()
        .is_empty());
}

#[test]
fn test_unconfigured_subscription_matches_any_payload() {
    let runtime = Arc::new(TriggerRecorder::default());
    let engine = engine(Arc::clone(&runtime));
    subscribe(
        &engine,
        EventSubscriptionEntity::new(
            EventType::Message,
            "order-received",
            ScopeRef::new("case-1"),
        )
        .with_id("sub-1"),
    );

    let scope_ids = engine
        .correlate_event(
            &CorrelationEvent::new(EventType::Message, "order-received").payload("order-42"),
        )
        .unwrap();
    assert_eq!(scope_ids, vec!["case-1"]);
    // The payload travels into the trigger operation.
    assert_eq!(
        runtime.triggers.lock().unwrap().as_slice(),
        &[(
            "sub-1".to_string(),
            Some(serde_json::Value::String("order-42".into()))
        )]
    );
}

#[test]
fn test_configured_subscription_requires_exact_payload() {
    let runtime = Arc::new(TriggerRecorder::default());
    let engine = engine(Arc::clone(&runtime));
    subscribe(
        &engine,
        EventSubscriptionEntity::new(
            EventType::Message,
            "order-received",
            ScopeRef::new("case-1"),
        )
        .correlation("order-42"),
    );

    assert!(engine
        .correlate_event(&CorrelationEvent::new(EventType::Message, "order-received"))
        .unwrap()
        .is_empty());
    assert!(engine
        .correlate_event(
            &CorrelationEvent::new(EventType::Message, "order-received").payload("order-43"),
        )
        .unwrap()
        .is_empty());
    assert_eq!(
        engine
            .correlate_event(
                &CorrelationEvent::new(EventType::Message, "order-received").payload("order-42"),
            )
            .unwrap(),
        vec!["case-1"]
    );
}

#[test]
fn test_scoped_event_only_reaches_its_instance() {
    let runtime = Arc::new(TriggerRecorder::default());
    let engine = engine(Arc::clone(&runtime));
    for case in ["case-1", "case-2"] {
        subscribe(
            &engine,
            EventSubscriptionEntity::new(EventType::Signal, "escalate", ScopeRef::new(case))
                .with_id(format!("sub-{case}")),
        );
    }

    let scope_ids = engine
        .correlate_event(&CorrelationEvent::new(EventType::Signal, "escalate").scope("case-2"))
        .unwrap();
    assert_eq!(scope_ids, vec!["case-2"]);

    // The unscoped broadcast still reaches the remaining subscription.
    let scope_ids = engine
        .correlate_event(&CorrelationEvent::new(EventType::Signal, "escalate"))
        .unwrap();
    assert_eq!(scope_ids, vec!["case-1"]);
}

#[test]
fn test_broadcast_consumes_all_matches() {
    let runtime = Arc::new(TriggerRecorder::default());
    let engine = engine(Arc::clone(&runtime));
    for case in ["case-1", "case-2", "case-3"] {
        subscribe(
            &engine,
            EventSubscriptionEntity::new(EventType::Signal, "escalate", ScopeRef::new(case)),
        );
    }

    let mut scope_ids = engine
        .correlate_event(&CorrelationEvent::new(EventType::Signal, "escalate"))
        .unwrap();
    scope_ids.sort();
    assert_eq!(scope_ids, vec!["case-1", "case-2", "case-3"]);
    assert_eq!(runtime.triggers.lock().unwrap().len(), 3);
}

#[test]
fn test_cancel_removes_subscription_without_trigger() {
    let runtime = Arc::new(TriggerRecorder::default());
    let engine = engine(Arc::clone(&runtime));
    subscribe(
        &engine,
        EventSubscriptionEntity::new(
            EventType::Message,
            "order-received",
            ScopeRef::new("case-1"),
        )
        .with_id("sub-1"),
    );

    engine
        .execute(&|ctx: &mut CommandContext| EventRegistry::cancel(ctx, "sub-1"))
        .unwrap();

    assert!(engine
        .correlate_event(&CorrelationEvent::new(EventType::Message, "order-received"))
        .unwrap()
        .is_empty());
    assert!(runtime.triggers.lock().unwrap().is_empty());
}

#[test]
fn test_cancel_unknown_subscription_is_not_found() {
    let runtime = Arc::new(TriggerRecorder::default());
    let engine = engine(runtime);
    let result = engine.execute(&|ctx: &mut CommandContext| EventRegistry::cancel(ctx, "ghost"));
    assert!(matches!(result, Err(EngineError::NotFound { .. })));
}

#[test]
fn test_subscription_rolls_back_with_its_command() {
    let runtime = Arc::new(TriggerRecorder::default());
    let engine = engine(runtime);
    let result = engine.execute(&|ctx: &mut CommandContext| -> Result<()> {
        EventRegistry::subscribe(
            ctx,
            EventSubscriptionEntity::new(
                EventType::Message,
                "order-received",
                ScopeRef::new("case-1"),
            ),
        )?;
        Err(EngineError::Engine("fails".into()))
    });
    assert!(result.is_err());
    assert_eq!(
        engine
            .store()
            .count(flowkernel::EntityKind::EventSubscription)
            .unwrap(),
        0
    );
}
