//! Parallel fan-out: concurrent execution of independent task invocations.
//!
//! All members are dispatched at once and joined before returning; results
//! come back in input order regardless of completion order. Failure policy is
//! fail-fast: the first error aborts outstanding members (already-started
//! agent calls are not force-killed, but nothing new is scheduled) and the
//! call fails identifying the failing index.

use std::sync::Arc;

use serde_json::Value;
use tokio::task::JoinSet;

use crate::context::ExecutionContext;
use crate::error::{CadenceError, Result};
use crate::task::{TaskDefinition, TaskExecutor};

/// One member of a fan-out: a task, its input snapshot, and its effect id.
pub struct FanOutMember {
    pub definition: Arc<TaskDefinition>,
    pub input: Value,
    pub effect_id: String,
}

/// Executes sets of independent task invocations concurrently.
pub struct ParallelFanOut {
    executor: Arc<TaskExecutor>,
}

impl ParallelFanOut {
    pub fn new(executor: Arc<TaskExecutor>) -> Self {
        Self { executor }
    }

    /// Execute all members concurrently, preserving input order in the
    /// result vector.
    pub async fn execute_all(
        &self,
        members: Vec<FanOutMember>,
        ctx: &ExecutionContext,
    ) -> Result<Vec<Value>> {
        let count = members.len();
        let mut join_set = JoinSet::new();

        for (index, member) in members.into_iter().enumerate() {
            let executor = self.executor.clone();
            let ctx = ctx.clone();
            join_set.spawn(async move {
                let result = executor
                    .execute(&member.definition, &member.input, &member.effect_id, &ctx)
                    .await;
                (index, result)
            });
        }

        let mut outputs: Vec<Option<Value>> = vec![None; count];

        while let Some(joined) = join_set.join_next().await {
            let (index, result) = joined
                .map_err(|e| CadenceError::InvalidState(format!("fan-out member panicked: {}", e)))?;

            match result {
                Ok(output) => {
                    outputs[index] = Some(output);
                }
                Err(source) => {
                    tracing::warn!(index = index, error = %source, "Fan-out member failed; aborting siblings");
                    join_set.abort_all();
                    return Err(CadenceError::FanOut {
                        index,
                        source: Box::new(source),
                    });
                }
            }
        }

        outputs
            .into_iter()
            .enumerate()
            .map(|(index, output)| {
                output.ok_or_else(|| {
                    CadenceError::InvalidState(format!("fan-out member {} produced no result", index))
                })
            })
            .collect()
    }
}
