//! Agent operation boundary.
//!
//! The engine delegates all actual reasoning to an external agent-execution
//! runtime, modeled as the `AgentClient` trait: a descriptor goes in, a JSON
//! payload comes out. The engine never inspects payload semantics beyond
//! schema validation.

mod http;
mod mock;

pub use http::{HttpAgentClient, HttpAgentConfig};
pub use mock::MockAgentClient;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

/// Errors from the agent operation itself.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("agent call timed out after {0:?}")]
    Timeout(Duration),

    #[error("agent refused the task: {0}")]
    Refused(String),

    #[error("agent returned non-JSON payload: {0}")]
    BadPayload(String),
}

/// Everything the external runtime needs to execute one task.
///
/// Built per invocation by a `TaskDefinition`'s builder; serializable so it
/// can be shipped over the wire or captured in logs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskDescriptor {
    /// Agent role to dispatch to (e.g. "researcher", "critic").
    pub agent: String,

    /// Instructions for this invocation.
    pub instructions: String,

    /// Structured context the agent should consider.
    pub context: Value,

    /// JSON Schema the payload is expected to satisfy. Informational for the
    /// agent; the engine enforces it separately on the way back.
    pub output_schema: Value,
}

impl TaskDescriptor {
    pub fn new(agent: impl Into<String>, instructions: impl Into<String>) -> Self {
        Self {
            agent: agent.into(),
            instructions: instructions.into(),
            context: Value::Null,
            output_schema: Value::Null,
        }
    }

    pub fn with_context(mut self, context: Value) -> Self {
        self.context = context;
        self
    }

    pub fn with_output_schema(mut self, schema: Value) -> Self {
        self.output_schema = schema;
        self
    }
}

/// Stateless client for the external agent operation.
///
/// Each call is independent; the engine layers memoization and validation on
/// top, never the client.
#[async_trait]
pub trait AgentClient: Send + Sync {
    /// Execute one task descriptor and return the raw JSON payload.
    async fn invoke(&self, descriptor: &TaskDescriptor) -> std::result::Result<Value, AgentError>;
}
