use crate::agenda::Operation;
use crate::command::CommandContext;
use crate::core::{new_id, EngineError, Result, ScopeRef};
use crate::persistence::entity::{impl_entity, Entity, EntityKind};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::any::Any;
use tracing::debug;

/// What an instance is waiting on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Signal,
    Message,
    Compound,
}

/// A durable record that an instance is waiting for an external event.
///
/// `configuration` carries an optional correlation payload. A subscription
/// without one matches any incoming event of its type and name; one with a
/// payload matches only events carrying exactly that payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventSubscriptionEntity {
    pub id: String,
    pub event_type: EventType,
    pub event_name: String,
    pub scope: ScopeRef,
    pub scope_definition_id: Option<String>,
    pub activity_id: Option<String>,
    pub configuration: Option<String>,
    pub create_time: DateTime<Utc>,
    version: u32,
}

impl EventSubscriptionEntity {
    pub fn new(event_type: EventType, event_name: impl Into<String>, scope: ScopeRef) -> Self {
        Self {
            id: new_id(),
            event_type,
            event_name: event_name.into(),
            scope,
            scope_definition_id: None,
            activity_id: None,
            configuration: None,
            create_time: Utc::now(),
            version: 1,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn activity(mut self, activity_id: impl Into<String>) -> Self {
        self.activity_id = Some(activity_id.into());
        self
    }

    pub fn scope_definition(mut self, scope_definition_id: impl Into<String>) -> Self {
        self.scope_definition_id = Some(scope_definition_id.into());
        self
    }

    pub fn correlation(mut self, configuration: impl Into<String>) -> Self {
        self.configuration = Some(configuration.into());
        self
    }
}

impl_entity!(EventSubscriptionEntity, EntityKind::EventSubscription);

/// An external event offered for correlation against open subscriptions.
#[derive(Debug, Clone, PartialEq)]
pub struct CorrelationEvent {
    pub event_type: EventType,
    pub event_name: String,
    pub scope_id: Option<String>,
    pub scope_type: Option<String>,
    pub correlation_payload: Option<String>,
}

impl CorrelationEvent {
    pub fn new(event_type: EventType, event_name: impl Into<String>) -> Self {
        Self {
            event_type,
            event_name: event_name.into(),
            scope_id: None,
            scope_type: None,
            correlation_payload: None,
        }
    }

    pub fn scope(mut self, scope_id: impl Into<String>) -> Self {
        self.scope_id = Some(scope_id.into());
        self
    }

    pub fn scope_type(mut self, scope_type: impl Into<String>) -> Self {
        self.scope_type = Some(scope_type.into());
        self
    }

    pub fn payload(mut self, payload: impl Into<String>) -> Self {
        self.correlation_payload = Some(payload.into());
        self
    }
}

/// Subscription lifecycle service. All mutation flows through the command's
/// session, so subscriptions appear and disappear transactionally with the
/// instance state that created them.
pub struct EventRegistry;

impl EventRegistry {
    /// Open a subscription.
    pub fn subscribe(
        ctx: &mut CommandContext,
        subscription: EventSubscriptionEntity,
    ) -> Result<String> {
        if subscription.event_name.is_empty() {
            return Err(EngineError::IllegalArgument(
                "event name must be set".into(),
            ));
        }
        let id = subscription.id.clone();
        ctx.db_session().insert(Box::new(subscription))?;
        debug!(subscription_id = %id, "subscription opened");
        Ok(id)
    }

    /// Remove a subscription without firing it, e.g. when the waiting item
    /// exits for another reason.
    pub fn cancel(ctx: &mut CommandContext, subscription_id: &str) -> Result<()> {
        ctx.db_session()
            .delete(EntityKind::EventSubscription, subscription_id)?;
        debug!(subscription_id = %subscription_id, "subscription cancelled");
        Ok(())
    }

    /// Consume a subscription: delete it and plan the trigger operation that
    /// delivers the event into the instance within this same command.
    pub fn consume(
        ctx: &mut CommandContext,
        subscription_id: &str,
        payload: Option<serde_json::Value>,
    ) -> Result<()> {
        let subscription = ctx
            .db_session()
            .find::<EventSubscriptionEntity>(EntityKind::EventSubscription, subscription_id)?
            .ok_or_else(|| EngineError::not_found("event subscription", subscription_id))?;
        let scope = subscription.scope.clone();
        ctx.db_session()
            .delete(EntityKind::EventSubscription, subscription_id)?;
        ctx.agenda_mut().plan(Operation::TriggerSubscription {
            scope,
            subscription_id: subscription_id.to_string(),
            payload,
        });
        Ok(())
    }

    /// Correlate one incoming event against all open subscriptions, consuming
    /// every match. Returns the scope ids of the triggered instances.
    pub fn correlate(ctx: &mut CommandContext, event: &CorrelationEvent) -> Result<Vec<String>> {
        let query = super::matcher::SubscriptionQuery::from_event(event);
        let subscriptions = ctx
            .db_session()
            .find_subscriptions(event.scope_id.as_deref())?;
        let matches = super::matcher::find_matching(&subscriptions, &query);

        let payload = event
            .correlation_payload
            .as_ref()
            .map(|p| serde_json::Value::String(p.clone()));
        let mut scope_ids = Vec::with_capacity(matches.len());
        for subscription in matches {
            Self::consume(ctx, &subscription.id, payload.clone())?;
            scope_ids.push(subscription.scope.scope_id.clone());
        }
        debug!(
            event_name = %event.event_name,
            matched = scope_ids.len(),
            "event correlated"
        );
        Ok(scope_ids)
    }
}
