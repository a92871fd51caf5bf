//! Process definitions: control flow as data.
//!
//! A process is an ordered composition of steps (task, fan-out, breakpoint,
//! convergence loop) referencing tasks by name. Definitions are plain serde
//! data so they can be loaded from YAML and so the runner's interpretation,
//! resumption, and history all hang off the same declarative structure
//! instead of nested async code.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{CadenceError, Result};
use crate::task::TaskRegistry;

fn default_score_field() -> String {
    "score".to_string()
}

/// One step in a process.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Step {
    /// Execute a single task; its output lands in the run state under the
    /// task's name.
    Task { task: String },

    /// Execute several independent tasks concurrently against the same
    /// state snapshot; all must succeed.
    FanOut { tasks: Vec<String> },

    /// Suspend for human review.
    Breakpoint {
        title: String,
        question: String,
        #[serde(default)]
        context_files: Vec<String>,
    },

    /// Repeat a sub-pipeline until `score_task`'s `score_field` clears the
    /// threshold or the iteration budget is spent.
    Loop {
        body: Vec<Step>,
        score_task: String,
        #[serde(default = "default_score_field")]
        score_field: String,
        threshold: f64,
        max_iterations: u32,
        /// Pause for human review between iterations
        #[serde(default)]
        gated: bool,
    },
}

impl Step {
    /// Shorthand for a task step.
    pub fn task(name: impl Into<String>) -> Self {
        Step::Task { task: name.into() }
    }

    /// Shorthand for a fan-out step.
    pub fn fan_out(tasks: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Step::FanOut {
            tasks: tasks.into_iter().map(|t| t.into()).collect(),
        }
    }

    /// Shorthand for a breakpoint step.
    pub fn breakpoint(title: impl Into<String>, question: impl Into<String>) -> Self {
        Step::Breakpoint {
            title: title.into(),
            question: question.into(),
            context_files: Vec::new(),
        }
    }
}

/// The declarative composition a ProcessRunner executes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProcessDefinition {
    pub name: String,
    pub steps: Vec<Step>,
}

impl ProcessDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            steps: Vec::new(),
        }
    }

    /// Append a step.
    pub fn step(mut self, step: Step) -> Self {
        self.steps.push(step);
        self
    }

    /// Load a definition from YAML text.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml)
            .map_err(|e| CadenceError::InvalidState(format!("invalid process definition: {}", e)))
    }

    /// Load a definition from a YAML file.
    pub fn from_yaml_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Check that every referenced task resolves in the registry and loop
    /// shapes are sane. Run before execution so a typo fails fast instead of
    /// mid-pipeline.
    pub fn validate(&self, registry: &TaskRegistry) -> Result<()> {
        Self::validate_steps(&self.steps, registry)
    }

    fn validate_steps(steps: &[Step], registry: &TaskRegistry) -> Result<()> {
        for step in steps {
            match step {
                Step::Task { task } => {
                    registry.get(task)?;
                }
                Step::FanOut { tasks } => {
                    if tasks.is_empty() {
                        return Err(CadenceError::InvalidState(
                            "fan-out step has no tasks".to_string(),
                        ));
                    }
                    for task in tasks {
                        registry.get(task)?;
                    }
                }
                Step::Breakpoint { .. } => {}
                Step::Loop {
                    body, score_task, ..
                } => {
                    registry.get(score_task)?;
                    Self::validate_steps(body, registry)?;
                }
            }
        }
        Ok(())
    }
}
