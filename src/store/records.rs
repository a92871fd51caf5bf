//! Record types persisted by the effect and run stores.
//!
//! Three record families share the same storage idiom: `EffectRecord` (one
//! per task invocation, the idempotency log), `RunRecord` (one per process
//! run, carrying the step history), and `BreakpointRecord` (one per
//! suspension point awaiting human review).

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::id::now_ms;

/// Effect status state machine: Pending -> Succeeded | Failed, exactly once.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum EffectStatus {
    /// Agent call in flight (or interrupted by a crash)
    Pending,
    /// Output validated and recorded
    Succeeded,
    /// Agent call or schema validation failed
    Failed,
}

impl EffectStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EffectStatus::Pending => "pending",
            EffectStatus::Succeeded => "succeeded",
            EffectStatus::Failed => "failed",
        }
    }

    /// Check if this is a terminal status.
    pub fn is_terminal(&self) -> bool {
        matches!(self, EffectStatus::Succeeded | EffectStatus::Failed)
    }
}

impl std::fmt::Display for EffectStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The durable record of one task invocation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EffectRecord {
    /// Deterministic id: "<run_id>:<step path>"
    pub effect_id: String,

    /// Run this effect belongs to
    pub run_id: String,

    /// Task that produced it
    pub task_name: String,

    /// Input snapshot at invocation time
    pub input: Value,

    pub status: EffectStatus,

    /// Present iff Succeeded
    pub output: Option<Value>,

    /// Present iff Failed
    pub error: Option<String>,

    /// Unix timestamp in milliseconds
    pub started_at: i64,

    /// Set when the record turns terminal
    pub completed_at: Option<i64>,
}

impl EffectRecord {
    /// Create a fresh Pending record for a new invocation attempt.
    pub fn pending(
        effect_id: impl Into<String>,
        run_id: impl Into<String>,
        task_name: impl Into<String>,
        input: Value,
    ) -> Self {
        Self {
            effect_id: effect_id.into(),
            run_id: run_id.into(),
            task_name: task_name.into(),
            input,
            status: EffectStatus::Pending,
            output: None,
            error: None,
            started_at: now_ms(),
            completed_at: None,
        }
    }

    /// Transition to Succeeded with the validated output.
    pub fn succeeded(mut self, output: Value) -> Self {
        self.status = EffectStatus::Succeeded;
        self.output = Some(output);
        self.error = None;
        self.completed_at = Some(now_ms());
        self
    }

    /// Transition to Failed with the error description.
    pub fn failed(mut self, error: impl Into<String>) -> Self {
        self.status = EffectStatus::Failed;
        self.error = Some(error.into());
        self.output = None;
        self.completed_at = Some(now_ms());
        self
    }
}

/// Run status state machine.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Actively executing steps
    Running,
    /// Suspended at a breakpoint pending human resolution
    AwaitingBreakpoint,
    /// All steps completed
    Completed,
    /// A step failed or a human stopped the run
    Failed,
    /// Cancelled externally; observed at the next step boundary
    Cancelled,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::AwaitingBreakpoint => "awaiting_breakpoint",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
            RunStatus::Cancelled => "cancelled",
        }
    }

    /// Check if this is a terminal status.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunStatus::Completed | RunStatus::Failed | RunStatus::Cancelled
        )
    }

    /// Check if the run can be picked up again by a runner.
    pub fn is_resumable(&self) -> bool {
        matches!(self, RunStatus::Running | RunStatus::AwaitingBreakpoint)
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Outcome tag recorded in step summaries.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StepOutcome {
    Succeeded,
    Failed,
}

/// One entry in a run's history: a summarized step result.
///
/// Summaries carry identifiers and verdicts, not payloads; outputs live in
/// the effect store keyed by effect id.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StepSummary {
    Task {
        path: String,
        task: String,
        effect_id: String,
        outcome: StepOutcome,
    },
    FanOut {
        path: String,
        tasks: Vec<String>,
        effect_ids: Vec<String>,
        outcome: StepOutcome,
        /// Index of the first failing member, if any
        failed_index: Option<usize>,
    },
    Loop {
        path: String,
        iterations: u32,
        score: Option<f64>,
        converged: bool,
        termination: String,
    },
    Breakpoint {
        path: String,
        breakpoint_id: String,
        resolution: String,
    },
}

impl StepSummary {
    /// The step path this summary describes.
    pub fn path(&self) -> &str {
        match self {
            StepSummary::Task { path, .. } => path,
            StepSummary::FanOut { path, .. } => path,
            StepSummary::Loop { path, .. } => path,
            StepSummary::Breakpoint { path, .. } => path,
        }
    }
}

/// The persisted ProcessRun.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunRecord {
    pub run_id: String,

    /// Name of the process definition being executed
    pub process: String,

    pub status: RunStatus,

    /// Input snapshot the run started with
    pub input: Value,

    /// Append-only sequence of step summaries
    pub history: Vec<StepSummary>,

    /// Terminal error description, present iff Failed
    pub error: Option<String>,

    /// Unix timestamp in milliseconds
    pub started_at: i64,

    /// Set when the run reaches a terminal state
    pub completed_at: Option<i64>,

    /// Unix timestamp in milliseconds
    pub updated_at: i64,
}

impl RunRecord {
    /// Create a new Running record.
    pub fn new(run_id: impl Into<String>, process: impl Into<String>, input: Value) -> Self {
        let now = now_ms();
        Self {
            run_id: run_id.into(),
            process: process.into(),
            status: RunStatus::Running,
            input,
            history: Vec::new(),
            error: None,
            started_at: now,
            completed_at: None,
            updated_at: now,
        }
    }

    /// Update the timestamp to now.
    pub fn touch(&mut self) {
        self.updated_at = now_ms();
    }

    /// Mark the run terminal with the given status.
    pub fn finish(&mut self, status: RunStatus, error: Option<String>) {
        self.status = status;
        self.error = error;
        self.completed_at = Some(now_ms());
        self.touch();
    }

    /// Wall-clock duration, if the run has finished.
    pub fn duration_ms(&self) -> Option<i64> {
        self.completed_at.map(|done| done - self.started_at)
    }
}

/// How a human resolved a breakpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Resolution {
    /// Continue with no payload change
    Approved,
    /// Stop the run
    Rejected { reason: Option<String> },
    /// Continue with revised parameters merged into the run state
    Edited { payload: Value },
}

impl Resolution {
    pub fn as_str(&self) -> &'static str {
        match self {
            Resolution::Approved => "approved",
            Resolution::Rejected { .. } => "rejected",
            Resolution::Edited { .. } => "edited",
        }
    }
}

/// A designated suspension point awaiting human review.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BreakpointRecord {
    /// Deterministic id: "<run_id>:<step path>:bp"
    pub id: String,

    pub run_id: String,

    /// Short label for review UIs
    pub title: String,

    /// The question the reviewer is being asked
    pub question: String,

    /// Artifact references for context; passed through, never read
    pub context_files: Vec<String>,

    /// None while pending; resolved exactly once
    pub resolution: Option<Resolution>,

    /// Unix timestamp in milliseconds
    pub created_at: i64,

    pub resolved_at: Option<i64>,
}

impl BreakpointRecord {
    pub fn new(
        id: impl Into<String>,
        run_id: impl Into<String>,
        title: impl Into<String>,
        question: impl Into<String>,
        context_files: Vec<String>,
    ) -> Self {
        Self {
            id: id.into(),
            run_id: run_id.into(),
            title: title.into(),
            question: question.into(),
            context_files,
            resolution: None,
            created_at: now_ms(),
            resolved_at: None,
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.resolution.is_some()
    }

    /// Indexable status string: "pending" or "resolved".
    pub fn status_str(&self) -> &'static str {
        if self.is_resolved() { "resolved" } else { "pending" }
    }

    /// Apply a resolution. Returns false if already resolved.
    pub fn resolve(&mut self, resolution: Resolution) -> bool {
        if self.is_resolved() {
            return false;
        }
        self.resolution = Some(resolution);
        self.resolved_at = Some(now_ms());
        true
    }
}
