//! ProcessRunner: interprets a ProcessDefinition step by step.
//!
//! The runner threads a single JSON state object through the steps: each
//! task reads the current state as input and its validated output is recorded
//! under the task's name. Every step appends a summary to the run's history
//! and persists the record, so a crash loses at most the in-flight step and a
//! resumed run replays everything else from the effect store.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{Value, json};

use crate::breakpoint::BreakpointController;
use crate::context::ExecutionContext;
use crate::convergence::{
    ConvergenceLoopController, ConvergenceState, GateDecision, LoopConfig, LoopDriver, Termination,
};
use crate::error::{CadenceError, Result};
use crate::id::{breakpoint_id, effect_id, fanout_path, generate_run_id, iteration_path, step_path};
use crate::process::definition::{ProcessDefinition, Step};
use crate::process::fanout::{FanOutMember, ParallelFanOut};
use crate::store::{RunRecord, RunStatus, RunStore, StepOutcome, StepSummary};
use crate::task::{TaskExecutor, TaskRegistry};

/// Final result of a completed run.
#[derive(Debug, Clone)]
pub struct ProcessResult {
    pub run_id: String,
    pub status: RunStatus,
    /// The final state object, with every task's output under its name
    pub output: Value,
    pub history: Vec<StepSummary>,
    pub duration_ms: i64,
}

/// Executes process definitions against the task registry and stores.
pub struct ProcessRunner {
    registry: Arc<TaskRegistry>,
    executor: Arc<TaskExecutor>,
    fanout: ParallelFanOut,
    breakpoints: BreakpointController,
    runs: Arc<Mutex<RunStore>>,
    /// Default agent role recorded in the execution context
    agent: String,
}

impl ProcessRunner {
    pub fn new(
        registry: Arc<TaskRegistry>,
        executor: Arc<TaskExecutor>,
        breakpoints: BreakpointController,
        runs: Arc<Mutex<RunStore>>,
        agent: impl Into<String>,
    ) -> Self {
        let fanout = ParallelFanOut::new(executor.clone());
        Self {
            registry,
            executor,
            fanout,
            breakpoints,
            runs,
            agent: agent.into(),
        }
    }

    /// Start a new run of the definition.
    pub async fn run(&self, definition: &ProcessDefinition, input: Value) -> Result<ProcessResult> {
        definition.validate(&self.registry)?;

        let run_id = generate_run_id();
        let run = RunRecord::new(&run_id, &definition.name, input);
        self.persist(&run)?;

        tracing::info!(run_id = %run_id, process = %definition.name, "Run started");

        let ctx = ExecutionContext::resumed(&run_id, &self.agent, run.started_at);
        self.drive(definition, run, ctx).await
    }

    /// Resume a non-terminal run from persisted state.
    ///
    /// The definition is re-executed from the top; Succeeded effects and
    /// resolved breakpoints replay from the stores without re-invoking the
    /// agent, so execution picks up at the exact suspension point. History is
    /// rebuilt deterministically along the way (the JSONL log keeps every
    /// prior version).
    pub async fn resume(&self, definition: &ProcessDefinition, run_id: &str) -> Result<ProcessResult> {
        definition.validate(&self.registry)?;

        let mut run = {
            let store = self.runs.lock().unwrap();
            store
                .get_run(run_id)?
                .ok_or_else(|| CadenceError::RunNotFound(run_id.to_string()))?
        };

        if run.status.is_terminal() && run.status != RunStatus::Failed {
            return Err(CadenceError::InvalidState(format!(
                "cannot resume run {} in status {}",
                run_id, run.status
            )));
        }
        if run.process != definition.name {
            return Err(CadenceError::InvalidState(format!(
                "run {} belongs to process '{}', not '{}'",
                run_id, run.process, definition.name
            )));
        }

        run.status = RunStatus::Running;
        run.error = None;
        run.completed_at = None;
        run.history.clear();
        run.touch();
        self.persist(&run)?;

        tracing::info!(run_id = %run_id, process = %definition.name, "Run resumed");

        let ctx = ExecutionContext::resumed(run_id, &self.agent, run.started_at);
        self.drive(definition, run, ctx).await
    }

    async fn drive(
        &self,
        definition: &ProcessDefinition,
        mut run: RunRecord,
        ctx: ExecutionContext,
    ) -> Result<ProcessResult> {
        let mut state = normalize_state(run.input.clone());

        let result = self
            .execute_steps(&definition.steps, "", &mut state, &mut run, &ctx)
            .await;

        match result {
            Ok(()) => {
                run.finish(RunStatus::Completed, None);
                self.persist(&run)?;
                let duration_ms = run.duration_ms().unwrap_or(0);
                tracing::info!(run_id = %run.run_id, duration_ms = duration_ms, "Run completed");
                Ok(ProcessResult {
                    run_id: run.run_id.clone(),
                    status: run.status,
                    output: state,
                    history: run.history,
                    duration_ms,
                })
            }
            Err(err) => {
                let status = if matches!(err.root(), CadenceError::Cancelled(_)) {
                    RunStatus::Cancelled
                } else {
                    RunStatus::Failed
                };
                run.finish(status, Some(err.to_string()));
                self.persist(&run)?;
                tracing::error!(run_id = %run.run_id, error = %err, "Run failed");
                Err(err)
            }
        }
    }

    /// Execute a step sequence under a path prefix. Shared between the top
    /// level ("") and loop iterations ("s2.i1").
    async fn execute_steps(
        &self,
        steps: &[Step],
        prefix: &str,
        state: &mut Value,
        run: &mut RunRecord,
        ctx: &ExecutionContext,
    ) -> Result<()> {
        for (index, step) in steps.iter().enumerate() {
            let path = step_path(prefix, index);
            self.check_cancelled(&ctx.run_id)?;

            match step {
                Step::Task { task } => {
                    self.run_task_step(task, &path, state, run, ctx).await?;
                }
                Step::FanOut { tasks } => {
                    self.run_fanout_step(tasks, &path, state, run, ctx).await?;
                }
                Step::Breakpoint {
                    title,
                    question,
                    context_files,
                } => {
                    self.run_breakpoint_step(title, question, context_files, &path, state, run, ctx)
                        .await?;
                }
                Step::Loop {
                    body,
                    score_task,
                    score_field,
                    threshold,
                    max_iterations,
                    gated,
                } => {
                    self.run_loop_step(
                        body,
                        score_task,
                        score_field,
                        *threshold,
                        *max_iterations,
                        *gated,
                        &path,
                        state,
                        run,
                        ctx,
                    )
                    .await?;
                }
            }
        }

        Ok(())
    }

    async fn run_task_step(
        &self,
        task: &str,
        path: &str,
        state: &mut Value,
        run: &mut RunRecord,
        ctx: &ExecutionContext,
    ) -> Result<()> {
        let definition = self.registry.get(task)?;
        let eid = effect_id(&ctx.run_id, path);

        match self.executor.execute(&definition, state, &eid, ctx).await {
            Ok(output) => {
                insert_output(state, task, output);
                run.history.push(StepSummary::Task {
                    path: path.to_string(),
                    task: task.to_string(),
                    effect_id: eid,
                    outcome: StepOutcome::Succeeded,
                });
                run.touch();
                self.persist(run)?;
                Ok(())
            }
            Err(err) => {
                run.history.push(StepSummary::Task {
                    path: path.to_string(),
                    task: task.to_string(),
                    effect_id: eid,
                    outcome: StepOutcome::Failed,
                });
                run.touch();
                self.persist(run)?;
                Err(err.at_step(path))
            }
        }
    }

    async fn run_fanout_step(
        &self,
        tasks: &[String],
        path: &str,
        state: &mut Value,
        run: &mut RunRecord,
        ctx: &ExecutionContext,
    ) -> Result<()> {
        let mut members = Vec::with_capacity(tasks.len());
        let mut effect_ids = Vec::with_capacity(tasks.len());
        for (member, task) in tasks.iter().enumerate() {
            let eid = effect_id(&ctx.run_id, &fanout_path(path, member));
            effect_ids.push(eid.clone());
            members.push(FanOutMember {
                definition: self.registry.get(task)?,
                input: state.clone(),
                effect_id: eid,
            });
        }

        match self.fanout.execute_all(members, ctx).await {
            Ok(outputs) => {
                for (task, output) in tasks.iter().zip(outputs) {
                    insert_output(state, task, output);
                }
                run.history.push(StepSummary::FanOut {
                    path: path.to_string(),
                    tasks: tasks.to_vec(),
                    effect_ids,
                    outcome: StepOutcome::Succeeded,
                    failed_index: None,
                });
                run.touch();
                self.persist(run)?;
                Ok(())
            }
            Err(err) => {
                let failed_index = match &err {
                    CadenceError::FanOut { index, .. } => Some(*index),
                    _ => None,
                };
                run.history.push(StepSummary::FanOut {
                    path: path.to_string(),
                    tasks: tasks.to_vec(),
                    effect_ids,
                    outcome: StepOutcome::Failed,
                    failed_index,
                });
                run.touch();
                self.persist(run)?;
                Err(err.at_step(path))
            }
        }
    }

    async fn run_breakpoint_step(
        &self,
        title: &str,
        question: &str,
        context_files: &[String],
        path: &str,
        state: &mut Value,
        run: &mut RunRecord,
        ctx: &ExecutionContext,
    ) -> Result<()> {
        let bp_id = breakpoint_id(&ctx.run_id, path);

        match self
            .breakpoints
            .pause(run, &bp_id, title, question, context_files.to_vec())
            .await
        {
            Ok(edited) => {
                let resolution = if edited.is_some() { "edited" } else { "approved" };
                if let Some(payload) = edited {
                    merge_state(state, payload);
                }
                run.history.push(StepSummary::Breakpoint {
                    path: path.to_string(),
                    breakpoint_id: bp_id,
                    resolution: resolution.to_string(),
                });
                run.touch();
                self.persist(run)?;
                Ok(())
            }
            Err(err) => {
                if matches!(err, CadenceError::BreakpointRejected(_)) {
                    run.history.push(StepSummary::Breakpoint {
                        path: path.to_string(),
                        breakpoint_id: bp_id,
                        resolution: "rejected".to_string(),
                    });
                    run.touch();
                    self.persist(run)?;
                }
                Err(err.at_step(path))
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_loop_step(
        &self,
        body: &[Step],
        score_task: &str,
        score_field: &str,
        threshold: f64,
        max_iterations: u32,
        gated: bool,
        path: &str,
        state: &mut Value,
        run: &mut RunRecord,
        ctx: &ExecutionContext,
    ) -> Result<()> {
        let controller = ConvergenceLoopController::new(LoopConfig::new(threshold, max_iterations));
        let initial = state.clone();

        let outcome = {
            let mut driver = RunnerLoopDriver {
                runner: self,
                body,
                run,
                ctx,
                path,
                score_task,
                score_field,
                gated,
                pending_edit: None,
            };
            controller.run(initial, &mut driver).await?
        };

        *state = outcome.state;
        run.history.push(StepSummary::Loop {
            path: path.to_string(),
            iterations: outcome.iterations,
            score: outcome.score,
            converged: outcome.converged,
            termination: outcome.termination.as_str().to_string(),
        });
        run.touch();
        self.persist(run)?;

        if let Termination::HumanTerminated { reason } = outcome.termination {
            return Err(CadenceError::HumanTerminated(reason).at_step(path));
        }

        Ok(())
    }

    /// Observe external cancellation at a step or iteration boundary.
    fn check_cancelled(&self, run_id: &str) -> Result<()> {
        let store = self.runs.lock().unwrap();
        if let Some(record) = store.get_run(run_id)? {
            if record.status == RunStatus::Cancelled {
                return Err(CadenceError::Cancelled(run_id.to_string()));
            }
        }
        Ok(())
    }

    /// Persist the run record. An externally written Cancelled status is
    /// never clobbered by a routine history flush.
    fn persist(&self, run: &RunRecord) -> Result<()> {
        let mut store = self.runs.lock().unwrap();
        let externally_cancelled = store
            .get_run(&run.run_id)?
            .map(|existing| existing.status == RunStatus::Cancelled)
            .unwrap_or(false);

        if externally_cancelled && run.status != RunStatus::Cancelled {
            let mut merged = run.clone();
            merged.status = RunStatus::Cancelled;
            store.save_run(&merged)
        } else {
            store.save_run(run)
        }
    }
}

/// Drives one loop step's body and between-iterations gate for the runner.
struct RunnerLoopDriver<'a> {
    runner: &'a ProcessRunner,
    body: &'a [Step],
    run: &'a mut RunRecord,
    ctx: &'a ExecutionContext,
    path: &'a str,
    score_task: &'a str,
    score_field: &'a str,
    gated: bool,
    /// Edited gate payload, merged into the state at the next iteration
    pending_edit: Option<Value>,
}

#[async_trait]
impl<'a> LoopDriver for RunnerLoopDriver<'a> {
    async fn run_iteration(&mut self, mut state: Value, iteration: u32) -> Result<(Value, f64)> {
        if let Some(payload) = self.pending_edit.take() {
            merge_state(&mut state, payload);
        }

        let prefix = iteration_path(self.path, iteration);
        self.runner
            .execute_steps(self.body, &prefix, &mut state, self.run, self.ctx)
            .await?;

        let score = extract_score(&state, self.score_task, self.score_field)?;
        Ok((state, score))
    }

    async fn between_iterations(&mut self, conv: &ConvergenceState) -> Result<GateDecision> {
        if !self.gated {
            return Ok(GateDecision::Continue);
        }

        let gate_path = format!("{}.g{}", self.path, conv.iteration);
        let bp_id = breakpoint_id(&self.ctx.run_id, &gate_path);
        let question = format!(
            "Iteration {} scored {:.1} against threshold {:.1}. Continue iterating?",
            conv.iteration,
            conv.score.unwrap_or(0.0),
            conv.threshold
        );

        match self
            .runner
            .breakpoints
            .pause(self.run, &bp_id, "Continue loop?", &question, Vec::new())
            .await
        {
            Ok(edited) => {
                let resolution = if edited.is_some() { "edited" } else { "approved" };
                self.pending_edit = edited;
                self.run.history.push(StepSummary::Breakpoint {
                    path: gate_path,
                    breakpoint_id: bp_id,
                    resolution: resolution.to_string(),
                });
                self.run.touch();
                self.runner.persist(self.run)?;
                Ok(GateDecision::Continue)
            }
            Err(CadenceError::BreakpointRejected(reason)) => {
                self.run.history.push(StepSummary::Breakpoint {
                    path: gate_path,
                    breakpoint_id: bp_id,
                    resolution: "rejected".to_string(),
                });
                self.run.touch();
                self.runner.persist(self.run)?;
                Ok(GateDecision::Stop { reason })
            }
            Err(err) => Err(err),
        }
    }
}

/// The run state is always a JSON object; a non-object input is wrapped
/// under "input".
fn normalize_state(input: Value) -> Value {
    if input.is_object() {
        input
    } else {
        json!({ "input": input })
    }
}

fn insert_output(state: &mut Value, task: &str, output: Value) {
    if let Some(map) = state.as_object_mut() {
        map.insert(task.to_string(), output);
    }
}

/// Merge an edited breakpoint payload into the state. Object payloads merge
/// key-by-key; anything else lands under "edited".
fn merge_state(state: &mut Value, payload: Value) {
    let Some(map) = state.as_object_mut() else {
        return;
    };
    match payload {
        Value::Object(edit) => {
            for (key, value) in edit {
                map.insert(key, value);
            }
        }
        other => {
            map.insert("edited".to_string(), other);
        }
    }
}

fn extract_score(state: &Value, task: &str, field: &str) -> Result<f64> {
    state
        .get(task)
        .and_then(|output| output.get(field))
        .and_then(Value::as_f64)
        .ok_or_else(|| {
            CadenceError::InvalidState(format!(
                "scoring task '{}' produced no numeric '{}' field",
                task, field
            ))
        })
}
