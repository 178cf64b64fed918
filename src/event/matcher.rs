use super::subscription::{CorrelationEvent, EventSubscriptionEntity, EventType};

/// Matching parameters for a correlation pass. A `None` field is a wildcard
/// on the query side; correlation is the one subscription-side condition,
/// checked against the subscription's stored configuration.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SubscriptionQuery {
    pub event_type: Option<EventType>,
    pub event_name: Option<String>,
    pub scope_id: Option<String>,
    pub scope_type: Option<String>,
    pub activity_id: Option<String>,
    pub correlation: Option<String>,
}

impl SubscriptionQuery {
    pub fn from_event(event: &CorrelationEvent) -> Self {
        Self {
            event_type: Some(event.event_type),
            event_name: Some(event.event_name.clone()),
            scope_id: event.scope_id.clone(),
            scope_type: event.scope_type.clone(),
            activity_id: None,
            correlation: event.correlation_payload.clone(),
        }
    }
}

/// Whether a subscription matches the query.
///
/// Query fields are conjunctive wildcards. The configuration check is
/// asymmetric: a subscription without a configuration accepts any
/// correlation payload, one with a configuration requires the payload to
/// equal it exactly.
pub fn matches(subscription: &EventSubscriptionEntity, query: &SubscriptionQuery) -> bool {
    if query
        .event_type
        .map_or(false, |t| t != subscription.event_type)
    {
        return false;
    }
    if query
        .event_name
        .as_ref()
        .map_or(false, |n| *n != subscription.event_name)
    {
        return false;
    }
    if query
        .scope_id
        .as_ref()
        .map_or(false, |s| *s != subscription.scope.scope_id)
    {
        return false;
    }
    if query.scope_type.as_ref().map_or(false, |t| {
        subscription.scope.scope_type.as_deref() != Some(t.as_str())
    }) {
        return false;
    }
    if query.activity_id.as_ref().map_or(false, |a| {
        subscription.activity_id.as_deref() != Some(a.as_str())
    }) {
        return false;
    }
    if let Some(configuration) = &subscription.configuration {
        if query.correlation.as_ref() != Some(configuration) {
            return false;
        }
    }
    true
}

pub fn find_matching<'a>(
    subscriptions: &'a [EventSubscriptionEntity],
    query: &SubscriptionQuery,
) -> Vec<&'a EventSubscriptionEntity> {
    subscriptions
        .iter()
        .filter(|sub| matches(sub, query))
        .collect()
}
