use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Reference to the scope a piece of work targets: a running process or case
/// instance, optionally narrowed to a sub-scope (an execution, a plan item).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ScopeRef {
    pub scope_id: String,
    pub sub_scope_id: Option<String>,
    pub scope_type: Option<String>,
    pub tenant_id: Option<String>,
}

impl ScopeRef {
    pub fn new(scope_id: impl Into<String>) -> Self {
        Self {
            scope_id: scope_id.into(),
            sub_scope_id: None,
            scope_type: None,
            tenant_id: None,
        }
    }

    pub fn sub_scope(mut self, sub_scope_id: impl Into<String>) -> Self {
        self.sub_scope_id = Some(sub_scope_id.into());
        self
    }

    pub fn scope_type(mut self, scope_type: impl Into<String>) -> Self {
        self.scope_type = Some(scope_type.into());
        self
    }

    pub fn tenant(mut self, tenant_id: impl Into<String>) -> Self {
        self.tenant_id = Some(tenant_id.into());
        self
    }
}

impl std::fmt::Display for ScopeRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.sub_scope_id {
            Some(sub) => write!(f, "{}/{}", self.scope_id, sub),
            None => write!(f, "{}", self.scope_id),
        }
    }
}

/// Generate a fresh entity id.
pub fn new_id() -> String {
    Uuid::new_v4().to_string()
}
