use thiserror::Error;

/// Configuration errors for templates and dependency graphs.
///
/// These are fatal to the operation that raised them and are never retried.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WorkflowError {
    #[error("validation error: {0}")]
    ValidationError(String),

    #[error("unknown dependency: step '{step}' depends on unknown step '{dependency}'")]
    UnknownDependency { step: String, dependency: String },

    #[error("circular dependency among steps: {}", .steps.join(", "))]
    CircularDependency { steps: Vec<String> },

    #[error("unknown template '{0}'")]
    UnknownTemplate(String),

    #[error("unknown step '{step}' in template '{template}'")]
    UnknownStep { template: String, step: String },
}

/// Failures reported by external collaborators (query, test, phrasing).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CollaboratorError {
    #[error("query failed: {0}")]
    Query(String),

    #[error("statistical test failed: {0}")]
    Test(String),

    #[error("insight writer failed: {0}")]
    Writer(String),

    #[error("collaborator unavailable: {0}")]
    Unavailable(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_circular_dependency_lists_steps() {
        let err = WorkflowError::CircularDependency {
            steps: vec!["a".to_string(), "b".to_string()],
        };
        assert_eq!(err.to_string(), "circular dependency among steps: a, b");
    }

    #[test]
    fn test_unknown_dependency_display() {
        let err = WorkflowError::UnknownDependency {
            step: "b".to_string(),
            dependency: "ghost".to_string(),
        };
        assert!(err.to_string().contains("unknown step 'ghost'"));
    }

    #[test]
    fn test_collaborator_error_display() {
        let err = CollaboratorError::Query("timeout".to_string());
        assert_eq!(err.to_string(), "query failed: timeout");
    }
}
