//! Error types for Cadence
//!
//! Centralized error handling using thiserror. Every failure the engine can
//! surface to a caller is a variant here; sub-components with their own local
//! error enums (e.g. the agent client) convert into this at the boundary.

use thiserror::Error;

/// All error types that can occur in Cadence
#[derive(Debug, Error)]
pub enum CadenceError {
    /// The external agent operation itself failed (transport, timeout, refusal)
    #[error("Agent invocation failed for task '{task}': {message}")]
    AgentInvocation { task: String, message: String },

    /// A task output did not conform to its declared JSON Schema
    #[error("Schema violation in task '{task}': {message}")]
    SchemaViolation { task: String, message: String },

    /// A replayed effect id produced a different output than previously recorded
    #[error("Duplicate effect with mismatched payload: {0}")]
    DuplicateEffect(String),

    /// A human reviewer rejected a breakpoint
    #[error("Breakpoint rejected: {0}")]
    BreakpointRejected(String),

    /// A human reviewer stopped a convergence loop between iterations
    #[error("Human terminated: {0}")]
    HumanTerminated(String),

    /// A fan-out member failed; `index` identifies the failing element
    #[error("Fan-out member {index} failed: {source}")]
    FanOut {
        index: usize,
        #[source]
        source: Box<CadenceError>,
    },

    /// A step failed; `path` identifies the step within the process
    #[error("Step {path} failed: {source}")]
    Step {
        path: String,
        #[source]
        source: Box<CadenceError>,
    },

    /// The run was cancelled externally
    #[error("Run cancelled: {0}")]
    Cancelled(String),

    /// Run not found in storage
    #[error("Run not found: {0}")]
    RunNotFound(String),

    /// Task name not present in the registry
    #[error("Task not found: {0}")]
    TaskNotFound(String),

    /// Breakpoint not found in storage
    #[error("Breakpoint not found: {0}")]
    BreakpointNotFound(String),

    /// Invalid state transition or malformed engine state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Storage/persistence error
    #[error("Storage error: {0}")]
    Storage(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CadenceError {
    /// Wrap an error with the step path that raised it.
    pub fn at_step(self, path: impl Into<String>) -> Self {
        CadenceError::Step {
            path: path.into(),
            source: Box::new(self),
        }
    }

    /// The innermost error kind, unwrapping step/fan-out wrappers.
    pub fn root(&self) -> &CadenceError {
        match self {
            CadenceError::Step { source, .. } => source.root(),
            CadenceError::FanOut { source, .. } => source.root(),
            other => other,
        }
    }
}

impl From<rusqlite::Error> for CadenceError {
    fn from(err: rusqlite::Error) -> Self {
        CadenceError::Storage(err.to_string())
    }
}

/// Result type alias for Cadence operations
pub type Result<T> = std::result::Result<T, CadenceError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_agent_invocation_error() {
        let err = CadenceError::AgentInvocation {
            task: "generate".to_string(),
            message: "connection refused".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Agent invocation failed for task 'generate': connection refused"
        );
    }

    #[test]
    fn test_schema_violation_error() {
        let err = CadenceError::SchemaViolation {
            task: "score".to_string(),
            message: "missing required field 'score'".to_string(),
        };
        assert!(err.to_string().contains("score"));
    }

    #[test]
    fn test_duplicate_effect_error() {
        let err = CadenceError::DuplicateEffect("run-1:s0".to_string());
        assert_eq!(
            err.to_string(),
            "Duplicate effect with mismatched payload: run-1:s0"
        );
    }

    #[test]
    fn test_fan_out_error_carries_index() {
        let inner = CadenceError::AgentInvocation {
            task: "t".to_string(),
            message: "timeout".to_string(),
        };
        let err = CadenceError::FanOut {
            index: 2,
            source: Box::new(inner),
        };
        assert!(err.to_string().contains("member 2"));
    }

    #[test]
    fn test_step_wrapper_and_root() {
        let inner = CadenceError::BreakpointRejected("not good enough".to_string());
        let err = inner.at_step("s3");
        assert!(err.to_string().starts_with("Step s3 failed"));
        assert!(matches!(err.root(), CadenceError::BreakpointRejected(_)));
    }

    #[test]
    fn test_root_unwraps_nested_wrappers() {
        let inner = CadenceError::SchemaViolation {
            task: "t".to_string(),
            message: "bad".to_string(),
        };
        let err = CadenceError::FanOut {
            index: 0,
            source: Box::new(inner),
        }
        .at_step("s1");
        assert!(matches!(err.root(), CadenceError::SchemaViolation { .. }));
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: CadenceError = io_err.into();
        assert!(matches!(err, CadenceError::Io(_)));
        assert!(err.to_string().contains("file not found"));
    }

    #[test]
    fn test_json_error_conversion() {
        let json_err = serde_json::from_str::<serde_json::Value>("invalid").unwrap_err();
        let err: CadenceError = json_err.into();
        assert!(matches!(err, CadenceError::Json(_)));
    }

    #[test]
    fn test_result_type_alias() {
        fn returns_ok() -> Result<i32> {
            Ok(42)
        }

        fn returns_err() -> Result<i32> {
            Err(CadenceError::InvalidState("test".to_string()))
        }

        assert!(returns_ok().is_ok());
        assert!(returns_err().is_err());
    }
}
