// ============================================================================
// Persistence: entity cache, dependency-ordered flush, sessions, storage
// ============================================================================

pub mod cache;
pub mod dependency;
pub mod entity;
pub mod session;
pub mod store;

pub use cache::{CacheStatus, EntityCache};
pub use dependency::EntityDependencyOrder;
pub use entity::{Entity, EntityKind, ScopeInstanceEntity, VariableEntity};
pub use session::{DbSession, DeferredWorkSession, SessionRegistry};
pub use store::{EntityStore, FlushOp, InMemoryEngineStore};
