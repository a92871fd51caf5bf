//! Per-run execution context.
//!
//! One `ExecutionContext` is constructed when a run starts and passed by
//! reference into every component call (task builders, executor, breakpoint
//! controller). There is no ambient global: everything a builder may need
//! about the current run travels through this value.

use crate::id::now_ms;

/// Context for a single process run.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    /// The run this context belongs to.
    pub run_id: String,

    /// Unix timestamp in milliseconds when the run started.
    pub started_at: i64,

    /// Agent role name the process targets (from config).
    pub agent: String,
}

impl ExecutionContext {
    /// Create a context for a new run starting now.
    pub fn new(run_id: impl Into<String>, agent: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            started_at: now_ms(),
            agent: agent.into(),
        }
    }

    /// Create a context for a resumed run, preserving the original start time.
    pub fn resumed(run_id: impl Into<String>, agent: impl Into<String>, started_at: i64) -> Self {
        Self {
            run_id: run_id.into(),
            started_at,
            agent: agent.into(),
        }
    }

    /// Current time in milliseconds since epoch.
    pub fn now(&self) -> i64 {
        now_ms()
    }

    /// Elapsed milliseconds since the run started.
    pub fn elapsed_ms(&self) -> i64 {
        self.now() - self.started_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_context_stamps_start() {
        let ctx = ExecutionContext::new("run-1", "researcher");
        assert_eq!(ctx.run_id, "run-1");
        assert_eq!(ctx.agent, "researcher");
        assert!(ctx.started_at > 0);
    }

    #[test]
    fn test_resumed_context_preserves_start() {
        let ctx = ExecutionContext::resumed("run-1", "researcher", 1234);
        assert_eq!(ctx.started_at, 1234);
    }

    #[test]
    fn test_elapsed_is_nonnegative() {
        let ctx = ExecutionContext::new("run-1", "researcher");
        assert!(ctx.elapsed_ms() >= 0);
    }
}
