//! Convergence loops: repeat a sub-pipeline until a score clears a threshold.
//!
//! The controller formalizes the `while (!converged && iteration < max)`
//! pattern as an explicit state machine so the termination contract is
//! independently testable: `Iterating` until `Converged` (score met the
//! threshold), `Exhausted` (iteration budget spent), or `HumanTerminated`
//! (a reviewer stopped the loop between iterations).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;

/// Loop parameters, fixed per invocation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct LoopConfig {
    /// Converged once the body's score reaches this value
    pub threshold: f64,

    /// Hard budget on body executions; 0 skips the body entirely
    pub max_iterations: u32,
}

impl LoopConfig {
    pub fn new(threshold: f64, max_iterations: u32) -> Self {
        Self {
            threshold,
            max_iterations,
        }
    }
}

/// Live loop state, visible to the between-iterations gate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConvergenceState {
    /// Completed body executions (starts at 0)
    pub iteration: u32,

    /// Latest score returned by the body
    pub score: Option<f64>,

    pub threshold: f64,

    pub max_iterations: u32,

    pub converged: bool,
}

impl ConvergenceState {
    fn new(config: &LoopConfig) -> Self {
        Self {
            iteration: 0,
            score: None,
            threshold: config.threshold,
            max_iterations: config.max_iterations,
            converged: false,
        }
    }
}

/// How a loop ended.
#[derive(Debug, Clone, PartialEq)]
pub enum Termination {
    /// Score cleared the threshold
    Converged,
    /// Iteration budget spent without converging
    Exhausted,
    /// A reviewer stopped the loop between iterations
    HumanTerminated { reason: String },
}

impl Termination {
    pub fn as_str(&self) -> &'static str {
        match self {
            Termination::Converged => "converged",
            Termination::Exhausted => "exhausted",
            Termination::HumanTerminated { .. } => "human_terminated",
        }
    }
}

/// Result of a completed loop invocation.
///
/// Exhausted and HumanTerminated loops still return the last computed state,
/// flagged `converged: false`; the caller decides what that means.
#[derive(Debug, Clone)]
pub struct LoopOutcome {
    pub state: Value,
    pub iterations: u32,
    pub score: Option<f64>,
    pub converged: bool,
    pub termination: Termination,
}

/// Verdict from the between-iterations gate.
#[derive(Debug, Clone, PartialEq)]
pub enum GateDecision {
    Continue,
    Stop { reason: String },
}

/// The loop body (and optional gate) supplied by the caller.
///
/// `run_iteration` executes one pass of the sub-pipeline and returns the new
/// state plus its score. `between_iterations` runs after every non-final
/// iteration that did not converge; the default continues unconditionally.
#[async_trait]
pub trait LoopDriver: Send {
    async fn run_iteration(&mut self, state: Value, iteration: u32) -> Result<(Value, f64)>;

    async fn between_iterations(&mut self, _state: &ConvergenceState) -> Result<GateDecision> {
        Ok(GateDecision::Continue)
    }
}

/// Runs convergence loops to a terminal state.
#[derive(Debug, Clone)]
pub struct ConvergenceLoopController {
    config: LoopConfig,
}

impl ConvergenceLoopController {
    pub fn new(config: LoopConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &LoopConfig {
        &self.config
    }

    /// Drive the loop until Converged, Exhausted, or HumanTerminated.
    pub async fn run(&self, initial: Value, driver: &mut dyn LoopDriver) -> Result<LoopOutcome> {
        // A zero budget runs the body zero times and returns the initial
        // state unmodified, not converged.
        if self.config.max_iterations == 0 {
            return Ok(LoopOutcome {
                state: initial,
                iterations: 0,
                score: None,
                converged: false,
                termination: Termination::Exhausted,
            });
        }

        let mut conv = ConvergenceState::new(&self.config);
        let mut state = initial;

        loop {
            let (next_state, score) = driver.run_iteration(state, conv.iteration).await?;
            state = next_state;
            conv.iteration += 1;
            conv.score = Some(score);

            tracing::debug!(
                iteration = conv.iteration,
                score = score,
                threshold = self.config.threshold,
                "Loop iteration scored"
            );

            if score >= self.config.threshold {
                conv.converged = true;
                return Ok(LoopOutcome {
                    state,
                    iterations: conv.iteration,
                    score: conv.score,
                    converged: true,
                    termination: Termination::Converged,
                });
            }

            if conv.iteration >= self.config.max_iterations {
                return Ok(LoopOutcome {
                    state,
                    iterations: conv.iteration,
                    score: conv.score,
                    converged: false,
                    termination: Termination::Exhausted,
                });
            }

            // Gate runs between iterations only, never after the last
            match driver.between_iterations(&conv).await? {
                GateDecision::Continue => {}
                GateDecision::Stop { reason } => {
                    return Ok(LoopOutcome {
                        state,
                        iterations: conv.iteration,
                        score: conv.score,
                        converged: false,
                        termination: Termination::HumanTerminated { reason },
                    });
                }
            }
        }
    }
}
