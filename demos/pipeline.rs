//! Demo pipeline: a two-task convergence loop against the mock agent.
//!
//! Runs entirely offline. The mock "agent" drafts an answer and scores it a
//! little higher each iteration until the loop converges.
//!
//! ```sh
//! cargo run --example pipeline
//! ```

use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicU32, Ordering};

use serde_json::json;
use tempfile::TempDir;

use cadence::agent::{MockAgentClient, TaskDescriptor};
use cadence::breakpoint::{AutoApprove, BreakpointController};
use cadence::process::{ProcessDefinition, ProcessRunner, Step};
use cadence::store::{EffectStore, RunStore};
use cadence::task::{TaskDefinition, TaskExecutor, TaskRegistry};

#[tokio::main]
async fn main() -> eyre::Result<()> {
    let temp = TempDir::new()?;

    let mut registry = TaskRegistry::new();
    registry.register(TaskDefinition::new(
        "draft",
        json!({
            "type": "object",
            "properties": { "draft": { "type": "string" } },
            "required": ["draft"]
        }),
        |input, ctx| {
            TaskDescriptor::new(&ctx.agent, "Draft an answer to the question")
                .with_context(input.clone())
        },
    )?);
    registry.register(TaskDefinition::new(
        "score",
        json!({
            "type": "object",
            "properties": { "score": { "type": "number" } },
            "required": ["score"]
        }),
        |input, ctx| {
            TaskDescriptor::new(&ctx.agent, "Score the draft from 0 to 100")
                .with_context(input.clone())
        },
    )?);

    let attempts = AtomicU32::new(0);
    let agent = Arc::new(MockAgentClient::with_handler(move |desc| {
        if desc.instructions.starts_with("Draft") {
            Ok(json!({"draft": "The moon is tidally locked to the earth."}))
        } else {
            let n = attempts.fetch_add(1, Ordering::SeqCst);
            Ok(json!({"score": 60.0 + 15.0 * n as f64}))
        }
    }));

    let effects = Arc::new(Mutex::new(EffectStore::open_at(temp.path())?));
    let runs = Arc::new(Mutex::new(RunStore::open_at(temp.path())?));
    let executor = Arc::new(TaskExecutor::new(agent, effects));
    let breakpoints = BreakpointController::new(runs.clone(), Arc::new(AutoApprove));
    let runner = ProcessRunner::new(Arc::new(registry), executor, breakpoints, runs, "demo-agent");

    let process = ProcessDefinition::new("demo").step(Step::Loop {
        body: vec![Step::task("draft"), Step::task("score")],
        score_task: "score".to_string(),
        score_field: "score".to_string(),
        threshold: 85.0,
        max_iterations: 5,
        gated: false,
    });

    let result = runner
        .run(&process, json!({"question": "Why do we only see one side of the moon?"}))
        .await?;

    println!("run:      {}", result.run_id);
    println!("status:   {}", result.status);
    println!("duration: {}ms", result.duration_ms);
    println!("draft:    {}", result.output["draft"]["draft"]);
    println!("score:    {}", result.output["score"]["score"]);
    for step in &result.history {
        println!("step:     {}", serde_json::to_string(step)?);
    }

    Ok(())
}
