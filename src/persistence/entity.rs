use crate::core::{new_id, ScopeRef};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::any::Any;

/// Closed set of persistent entity kinds known to the engine.
///
/// The variant order here is arbitrary; the flush order between kinds is
/// defined by [`EntityDependencyOrder`](super::EntityDependencyOrder), never
/// inferred from this enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EntityKind {
    Variable,
    EventSubscription,
    Job,
    DeadJob,
    ScopeInstance,
}

impl EntityKind {
    pub const ALL: [EntityKind; 5] = [
        EntityKind::Variable,
        EntityKind::EventSubscription,
        EntityKind::Job,
        EntityKind::DeadJob,
        EntityKind::ScopeInstance,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Variable => "variable",
            EntityKind::EventSubscription => "event_subscription",
            EntityKind::Job => "job",
            EntityKind::DeadJob => "dead_job",
            EntityKind::ScopeInstance => "scope_instance",
        }
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A persistent engine record.
///
/// `persistent_state` returns the current field values as a JSON snapshot;
/// the session compares it against the load-time snapshot to decide whether
/// an update must be flushed (dirty checking). `version` carries the
/// optimistic-lock counter checked by the store on update/delete.
pub trait Entity: Send + Sync + std::fmt::Debug + 'static {
    fn kind(&self) -> EntityKind;
    fn id(&self) -> &str;
    fn version(&self) -> u32;
    fn set_version(&mut self, version: u32);
    fn persistent_state(&self) -> Value;
    fn clone_box(&self) -> Box<dyn Entity>;
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl Clone for Box<dyn Entity> {
    fn clone(&self) -> Self {
        self.clone_box()
    }
}

macro_rules! impl_entity {
    ($type:ty, $kind:expr) => {
        impl Entity for $type {
            fn kind(&self) -> EntityKind {
                $kind
            }

            fn id(&self) -> &str {
                &self.id
            }

            fn version(&self) -> u32 {
                self.version
            }

            fn set_version(&mut self, version: u32) {
                self.version = version;
            }

            fn persistent_state(&self) -> Value {
                serde_json::to_value(self).unwrap_or(Value::Null)
            }

            fn clone_box(&self) -> Box<dyn Entity> {
                Box::new(self.clone())
            }

            fn as_any(&self) -> &dyn Any {
                self
            }

            fn as_any_mut(&mut self) -> &mut dyn Any {
                self
            }
        }
    };
}

pub(crate) use impl_entity;

/// A node of a running process/case instance tree.
///
/// The engine core does not interpret instances; this record exists so the
/// plugged-in model interpreter has a parent/child scope row that variables,
/// jobs and subscriptions can hang off.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScopeInstanceEntity {
    pub id: String,
    pub parent_instance_id: Option<String>,
    pub scope_type: Option<String>,
    pub tenant_id: Option<String>,
    pub ended: bool,
    version: u32,
}

impl ScopeInstanceEntity {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            parent_instance_id: None,
            scope_type: None,
            tenant_id: None,
            ended: false,
            version: 1,
        }
    }

    pub fn parent(mut self, parent_instance_id: impl Into<String>) -> Self {
        self.parent_instance_id = Some(parent_instance_id.into());
        self
    }

    pub fn scope_type(mut self, scope_type: impl Into<String>) -> Self {
        self.scope_type = Some(scope_type.into());
        self
    }
}

impl_entity!(ScopeInstanceEntity, EntityKind::ScopeInstance);

/// A variable attached to a scope instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariableEntity {
    pub id: String,
    pub scope: ScopeRef,
    pub name: String,
    pub value: Value,
    version: u32,
}

impl VariableEntity {
    pub fn new(scope: ScopeRef, name: impl Into<String>, value: Value) -> Self {
        Self {
            id: new_id(),
            scope,
            name: name.into(),
            value,
            version: 1,
        }
    }
}

impl_entity!(VariableEntity, EntityKind::Variable);
