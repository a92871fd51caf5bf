//! Process execution integration tests
//!
//! Exercises full pipelines through the public API with a mock agent:
//! convergence budgets, effect accumulation, and breakpoint resumability
//! across process instances.

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use serde_json::{Value, json};
use tempfile::TempDir;

use cadence::agent::{MockAgentClient, TaskDescriptor};
use cadence::breakpoint::{AutoApprove, BreakpointController, ResolutionChannel, StoreResolutionChannel};
use cadence::process::{ProcessDefinition, ProcessRunner, Step};
use cadence::store::{EffectStatus, EffectStore, Resolution, RunStatus, RunStore};
use cadence::task::{TaskDefinition, TaskExecutor, TaskRegistry};

fn echo_task(name: &str, schema: Value) -> TaskDefinition {
    let marker = name.to_string();
    TaskDefinition::new(name, schema, move |input, ctx| {
        TaskDescriptor::new(&ctx.agent, marker.clone()).with_context(input.clone())
    })
    .unwrap()
}

fn draft_schema() -> Value {
    json!({
        "type": "object",
        "properties": { "draft": { "type": "string" } },
        "required": ["draft"]
    })
}

fn score_schema() -> Value {
    json!({
        "type": "object",
        "properties": { "score": { "type": "number" } },
        "required": ["score"]
    })
}

fn build_runner(
    temp: &TempDir,
    registry: TaskRegistry,
    agent: Arc<MockAgentClient>,
    channel: Arc<dyn ResolutionChannel>,
) -> (ProcessRunner, Arc<Mutex<RunStore>>, Arc<Mutex<EffectStore>>) {
    let effects = Arc::new(Mutex::new(EffectStore::open_at(temp.path()).unwrap()));
    let runs = Arc::new(Mutex::new(RunStore::open_at(temp.path()).unwrap()));
    let executor = Arc::new(TaskExecutor::new(agent, effects.clone()));
    let breakpoints = BreakpointController::new(runs.clone(), channel);
    let runner = ProcessRunner::new(
        Arc::new(registry),
        executor,
        breakpoints,
        runs.clone(),
        "worker",
    );
    (runner, runs, effects)
}

fn generate_score_registry() -> TaskRegistry {
    let mut registry = TaskRegistry::new();
    registry.register(echo_task("generate", draft_schema()));
    registry.register(echo_task("score", score_schema()));
    registry
}

/// A 2-task sequential loop body under a budget of 2 with scores below the
/// threshold runs exactly 2 iterations, accumulates 2 generate + 2 score
/// effects, and reports converged=false.
#[tokio::test]
async fn test_exhausted_loop_accumulates_expected_effects() {
    let agent = Arc::new(MockAgentClient::with_handler(|desc| {
        match desc.instructions.as_str() {
            "generate" => Ok(json!({"draft": "attempt"})),
            "score" => Ok(json!({"score": 55.0})),
            other => panic!("unexpected task {}", other),
        }
    }));

    let temp = TempDir::new().unwrap();
    let (runner, runs, effects) = build_runner(
        &temp,
        generate_score_registry(),
        agent.clone(),
        Arc::new(AutoApprove),
    );

    let process = ProcessDefinition::new("converge").step(Step::Loop {
        body: vec![Step::task("generate"), Step::task("score")],
        score_task: "score".to_string(),
        score_field: "score".to_string(),
        threshold: 80.0,
        max_iterations: 2,
        gated: false,
    });

    let result = runner.run(&process, json!({"topic": "effects"})).await.unwrap();

    assert_eq!(result.status, RunStatus::Completed);
    assert_eq!(agent.call_count(), 4);

    let succeeded = effects
        .lock()
        .unwrap()
        .count_by_status(&result.run_id, EffectStatus::Succeeded)
        .unwrap();
    assert_eq!(succeeded, 4);

    match result.history.last().unwrap() {
        cadence::store::StepSummary::Loop {
            iterations,
            converged,
            termination,
            ..
        } => {
            assert_eq!(*iterations, 2);
            assert!(!converged);
            assert_eq!(termination, "exhausted");
        }
        other => panic!("expected loop summary, got {:?}", other),
    }

    let run = runs.lock().unwrap().get_run(&result.run_id).unwrap().unwrap();
    assert!(run.duration_ms().is_some());
}

/// Full pipeline: gather, fan out two reviewers, then refine in a loop until
/// the score converges.
#[tokio::test]
async fn test_full_pipeline_with_fanout_and_loop() {
    let refinements = AtomicU32::new(0);
    let agent = Arc::new(MockAgentClient::with_handler(move |desc| {
        match desc.instructions.as_str() {
            "gather" => Ok(json!({"draft": "sources"})),
            "summarize" => Ok(json!({"draft": "summary"})),
            "critique" => Ok(json!({"draft": "critique"})),
            "refine" => Ok(json!({"draft": "refined"})),
            "score" => {
                let n = refinements.fetch_add(1, Ordering::SeqCst);
                Ok(json!({"score": ([60.0, 85.0][n as usize])}))
            }
            other => panic!("unexpected task {}", other),
        }
    }));

    let mut registry = TaskRegistry::new();
    for name in ["gather", "summarize", "critique", "refine"] {
        registry.register(echo_task(name, draft_schema()));
    }
    registry.register(echo_task("score", score_schema()));

    let temp = TempDir::new().unwrap();
    let (runner, _runs, _effects) =
        build_runner(&temp, registry, agent.clone(), Arc::new(AutoApprove));

    let process = ProcessDefinition::new("literature_review")
        .step(Step::task("gather"))
        .step(Step::fan_out(["summarize", "critique"]))
        .step(Step::Loop {
            body: vec![Step::task("refine"), Step::task("score")],
            score_task: "score".to_string(),
            score_field: "score".to_string(),
            threshold: 80.0,
            max_iterations: 5,
            gated: false,
        });

    let result = runner.run(&process, json!({"question": "q"})).await.unwrap();

    assert_eq!(result.status, RunStatus::Completed);
    assert_eq!(result.output["gather"]["draft"], "sources");
    assert_eq!(result.output["summarize"]["draft"], "summary");
    assert_eq!(result.output["critique"]["draft"], "critique");
    assert_eq!(result.output["score"]["score"], 85.0);

    // gather + 2 fan-out members + 2 iterations x 2 tasks
    assert_eq!(agent.call_count(), 7);
}

/// A run suspended at a breakpoint, killed, resolved from outside, and
/// resumed in a fresh process instance picks up at the suspension point and
/// re-executes no prior step.
#[tokio::test]
async fn test_breakpoint_resume_in_new_process_instance() {
    let temp = TempDir::new().unwrap();

    let process = ProcessDefinition::new("gated")
        .step(Step::task("generate"))
        .step(Step::breakpoint("Review draft", "Is the draft worth scoring?"))
        .step(Step::task("score"));

    // First process instance: runs until the breakpoint, then is aborted
    let first_agent = Arc::new(MockAgentClient::with_handler(|desc| {
        match desc.instructions.as_str() {
            "generate" => Ok(json!({"draft": "v1"})),
            other => panic!("first instance should not run '{}'", other),
        }
    }));

    let (runner, runs, _effects) = {
        let effects = Arc::new(Mutex::new(EffectStore::open_at(temp.path()).unwrap()));
        let runs = Arc::new(Mutex::new(RunStore::open_at(temp.path()).unwrap()));
        let executor = Arc::new(TaskExecutor::new(first_agent.clone(), effects.clone()));
        let channel = Arc::new(StoreResolutionChannel::new(
            runs.clone(),
            Duration::from_millis(20),
        ));
        let breakpoints = BreakpointController::new(runs.clone(), channel);
        let runner = ProcessRunner::new(
            Arc::new(generate_score_registry()),
            executor,
            breakpoints,
            runs.clone(),
            "worker",
        );
        (runner, runs.clone(), effects)
    };

    let process_clone = process.clone();
    let handle = tokio::spawn(async move { runner.run(&process_clone, json!({})).await });

    // Wait for the run to suspend
    let run_id = loop {
        tokio::time::sleep(Duration::from_millis(20)).await;
        let suspended = runs
            .lock()
            .unwrap()
            .list_runs_by_status(RunStatus::AwaitingBreakpoint)
            .unwrap();
        if let Some(run) = suspended.first() {
            break run.run_id.clone();
        }
    };

    // "Crash" the first process while it is suspended
    handle.abort();
    assert_eq!(first_agent.call_count(), 1);

    // A human approves from outside
    runs.lock()
        .unwrap()
        .resolve_breakpoint(&format!("{}:s1:bp", run_id), Resolution::Approved)
        .unwrap();
    drop(runs);

    // Second process instance: fresh stores, fresh agent
    let second_agent = Arc::new(MockAgentClient::with_handler(|desc| {
        match desc.instructions.as_str() {
            // generate must NOT be re-invoked; it replays from the store
            "score" => Ok(json!({"score": 92.0})),
            other => panic!("resumed instance should not run '{}'", other),
        }
    }));

    let (runner2, _runs2, _effects2) = build_runner(
        &temp,
        generate_score_registry(),
        second_agent.clone(),
        Arc::new(AutoApprove),
    );

    let result = runner2.resume(&process, &run_id).await.unwrap();

    assert_eq!(result.status, RunStatus::Completed);
    assert_eq!(result.output["generate"]["draft"], "v1");
    assert_eq!(result.output["score"]["score"], 92.0);
    // Only the post-breakpoint step touched the agent
    assert_eq!(second_agent.call_count(), 1);
}

/// Definitions loaded from YAML execute the same as built ones.
#[tokio::test]
async fn test_yaml_definition_round_trips_through_runner() {
    let yaml = r#"
name: review
steps:
  - kind: task
    task: generate
  - kind: task
    task: score
"#;
    let process = ProcessDefinition::from_yaml(yaml).unwrap();

    let agent = Arc::new(MockAgentClient::with_handler(|desc| {
        match desc.instructions.as_str() {
            "generate" => Ok(json!({"draft": "v1"})),
            "score" => Ok(json!({"score": 70.0})),
            other => panic!("unexpected task {}", other),
        }
    }));

    let temp = TempDir::new().unwrap();
    let (runner, _runs, _effects) = build_runner(
        &temp,
        generate_score_registry(),
        agent,
        Arc::new(AutoApprove),
    );

    let result = runner.run(&process, json!({})).await.unwrap();
    assert_eq!(result.status, RunStatus::Completed);
    assert_eq!(result.history.len(), 2);
}
