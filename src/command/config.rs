/// How a command relates to the surrounding transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionPropagation {
    /// Join the caller's transaction if one exists, otherwise open one.
    Required,
    /// Execute outside a transaction: work is flushed immediately and
    /// independently of any outer command.
    NotSupported,
}

/// Immutable execution configuration for a command. Created once per call
/// site, never mutated afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandConfig {
    propagation: TransactionPropagation,
    context_reusable: bool,
}

impl CommandConfig {
    pub fn new() -> Self {
        Self {
            propagation: TransactionPropagation::Required,
            context_reusable: true,
        }
    }

    pub fn transaction_not_supported() -> Self {
        Self {
            propagation: TransactionPropagation::NotSupported,
            context_reusable: false,
        }
    }

    pub fn propagation(mut self, propagation: TransactionPropagation) -> Self {
        self.propagation = propagation;
        self
    }

    pub fn context_reusable(mut self, reusable: bool) -> Self {
        self.context_reusable = reusable;
        self
    }

    pub fn transaction_propagation(&self) -> TransactionPropagation {
        self.propagation
    }

    pub fn is_context_reusable(&self) -> bool {
        self.context_reusable
    }

    pub fn is_transactional(&self) -> bool {
        self.propagation == TransactionPropagation::Required
    }
}

impl Default for CommandConfig {
    fn default() -> Self {
        Self::new()
    }
}
