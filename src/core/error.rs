use thiserror::Error;

/// Engine error taxonomy.
///
/// `IllegalArgument` and `IllegalState` are never retried. `OptimisticLocking`
/// is retried a bounded number of times by the command kernel before it is
/// surfaced. `NotFound` and `Engine` are surfaced to the caller as-is.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("Illegal argument: {0}")]
    IllegalArgument(String),

    #[error("Illegal state: {0}")]
    IllegalState(String),

    #[error("Optimistic locking failure: {0}")]
    OptimisticLocking(String),

    #[error("{kind} '{id}' not found")]
    NotFound { kind: String, id: String },

    #[error("Engine error: {0}")]
    Engine(String),
}

pub type Result<T> = std::result::Result<T, EngineError>;

impl EngineError {
    pub fn not_found(kind: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            kind: kind.into(),
            id: id.into(),
        }
    }

    pub fn is_optimistic_locking(&self) -> bool {
        matches!(self, Self::OptimisticLocking(_))
    }
}

impl<T> From<std::sync::PoisonError<T>> for EngineError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        Self::Engine(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = EngineError::not_found("job", "j-1");
        assert_eq!(err.to_string(), "job 'j-1' not found");

        let err = EngineError::IllegalState("agenda is empty".into());
        assert_eq!(err.to_string(), "Illegal state: agenda is empty");
    }

    #[test]
    fn test_optimistic_locking_predicate() {
        assert!(EngineError::OptimisticLocking("v1 != v2".into()).is_optimistic_locking());
        assert!(!EngineError::Engine("boom".into()).is_optimistic_locking());
    }
}
