use super::entity::JobEntity;
use crate::command::CommandContext;
use crate::core::Result;
use std::collections::HashMap;
use std::sync::Arc;

/// Executes one kind of deferred work. Handlers run inside a command, so all
/// entity access goes through the command's sessions; at-least-once delivery
/// means handlers must be idempotent or re-check state before acting.
pub trait JobHandler: Send + Sync {
    fn handler_type(&self) -> &str;

    fn execute(&self, ctx: &mut CommandContext, job: &JobEntity) -> Result<()>;
}

/// Immutable handler table, built once at engine bootstrap and safe for
/// unsynchronized concurrent reads afterwards.
#[derive(Default)]
pub struct JobHandlerRegistry {
    handlers: HashMap<String, Arc<dyn JobHandler>>,
}

impl JobHandlerRegistry {
    pub fn bootstrap(handlers: Vec<Arc<dyn JobHandler>>) -> Self {
        let handlers = handlers
            .into_iter()
            .map(|h| (h.handler_type().to_string(), h))
            .collect();
        Self { handlers }
    }

    pub fn get(&self, handler_type: &str) -> Option<&Arc<dyn JobHandler>> {
        self.handlers.get(handler_type)
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoopHandler;

    impl JobHandler for NoopHandler {
        fn handler_type(&self) -> &str {
            "noop"
        }

        fn execute(&self, _ctx: &mut CommandContext, _job: &JobEntity) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_registry_lookup() {
        let registry = JobHandlerRegistry::bootstrap(vec![Arc::new(NoopHandler)]);
        assert!(registry.get("noop").is_some());
        assert!(registry.get("other").is_none());
    }
}
