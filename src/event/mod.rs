// ============================================================================
// Events: durable subscriptions and correlation
// ============================================================================

pub mod matcher;
pub mod subscription;

pub use matcher::{find_matching, matches, SubscriptionQuery};
pub use subscription::{CorrelationEvent, EventRegistry, EventSubscriptionEntity, EventType};
