//! TaskExecutor: one memoized, schema-checked agent invocation.
//!
//! Execution order per call: effect store lookup (replay Succeeded output
//! without touching the agent), agent invocation, schema validation, effect
//! recording. Agent and schema failures are recorded as Failed effects and
//! propagate; the executor never retries on its own.

use std::sync::{Arc, Mutex};

use serde_json::Value;

use crate::agent::AgentClient;
use crate::context::ExecutionContext;
use crate::error::{CadenceError, Result};
use crate::store::{BeginOutcome, EffectStore};
use crate::task::definition::TaskDefinition;

/// Executes single task invocations against the agent runtime.
pub struct TaskExecutor {
    /// Agent operation (opaque, possibly slow, possibly failing)
    agent: Arc<dyn AgentClient>,
    /// Idempotency log; shared with concurrent fan-out members
    effects: Arc<Mutex<EffectStore>>,
}

impl TaskExecutor {
    pub fn new(agent: Arc<dyn AgentClient>, effects: Arc<Mutex<EffectStore>>) -> Self {
        Self { agent, effects }
    }

    /// Shared handle to the effect store.
    pub fn effects(&self) -> Arc<Mutex<EffectStore>> {
        self.effects.clone()
    }

    /// Execute one task invocation under a deterministic effect id.
    ///
    /// Returns the cached output immediately if this effect id already
    /// Succeeded; otherwise invokes the agent, validates the payload against
    /// the task's schema, and records the terminal effect before returning.
    pub async fn execute(
        &self,
        definition: &TaskDefinition,
        input: &Value,
        effect_id: &str,
        ctx: &ExecutionContext,
    ) -> Result<Value> {
        let begun = {
            let mut store = self.effects.lock().unwrap();
            store.begin(effect_id, &ctx.run_id, definition.name(), input)?
        };

        if let BeginOutcome::Cached(output) = begun {
            tracing::debug!(effect_id = %effect_id, task = %definition.name(), "Replaying memoized effect");
            return Ok(output);
        }

        tracing::info!(effect_id = %effect_id, task = %definition.name(), "Invoking agent");
        let descriptor = definition.descriptor(input, ctx);

        let raw = match self.agent.invoke(&descriptor).await {
            Ok(payload) => payload,
            Err(agent_err) => {
                let message = agent_err.to_string();
                self.effects.lock().unwrap().fail(effect_id, &message)?;
                return Err(CadenceError::AgentInvocation {
                    task: definition.name().to_string(),
                    message,
                });
            }
        };

        if let Err(violation) = definition.validate_output(&raw) {
            // Permanent: a malformed payload is not retried automatically
            self.effects.lock().unwrap().fail(effect_id, &violation.to_string())?;
            return Err(violation);
        }

        self.effects.lock().unwrap().complete(effect_id, raw.clone())?;
        Ok(raw)
    }
}
