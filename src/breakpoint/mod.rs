//! Breakpoints: designated suspension points for human review.
//!
//! A paused run persists a `BreakpointRecord`, flips to AwaitingBreakpoint,
//! and waits on a `ResolutionChannel` for a human verdict. Breakpoint state
//! lives in the run store, not in memory, so a run killed while suspended
//! resumes from the persisted record: an already-resolved breakpoint applies
//! its resolution without pausing again.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::{CadenceError, Result};
use crate::store::{BreakpointRecord, Resolution, RunRecord, RunStatus, RunStore};

/// Transport delivering a breakpoint to a reviewer and returning a verdict.
///
/// The engine only needs this synchronous-looking contract; whether the other
/// end is a CLI, a web UI, or an API is not its concern.
#[async_trait]
pub trait ResolutionChannel: Send + Sync {
    async fn await_resolution(&self, breakpoint: &BreakpointRecord) -> Result<Resolution>;
}

/// Polls the run store until another process writes a resolution.
///
/// No lock is held while sleeping; the CLI (or any writer) resolves the
/// record from outside and the suspended run picks it up on the next poll.
pub struct StoreResolutionChannel {
    store: Arc<Mutex<RunStore>>,
    poll_interval: Duration,
}

impl StoreResolutionChannel {
    pub fn new(store: Arc<Mutex<RunStore>>, poll_interval: Duration) -> Self {
        Self { store, poll_interval }
    }
}

#[async_trait]
impl ResolutionChannel for StoreResolutionChannel {
    async fn await_resolution(&self, breakpoint: &BreakpointRecord) -> Result<Resolution> {
        loop {
            let current = {
                let store = self.store.lock().unwrap();
                store.get_breakpoint(&breakpoint.id)?
            };

            if let Some(record) = current {
                if let Some(resolution) = record.resolution {
                    return Ok(resolution);
                }
            }

            tokio::time::sleep(self.poll_interval).await;
        }
    }
}

/// Approves every breakpoint without waiting. For tests and offline demos.
pub struct AutoApprove;

#[async_trait]
impl ResolutionChannel for AutoApprove {
    async fn await_resolution(&self, _breakpoint: &BreakpointRecord) -> Result<Resolution> {
        Ok(Resolution::Approved)
    }
}

/// Suspends runs at breakpoints and applies resolutions.
pub struct BreakpointController {
    store: Arc<Mutex<RunStore>>,
    channel: Arc<dyn ResolutionChannel>,
}

impl BreakpointController {
    pub fn new(store: Arc<Mutex<RunStore>>, channel: Arc<dyn ResolutionChannel>) -> Self {
        Self { store, channel }
    }

    /// Suspend the run until the breakpoint is resolved.
    ///
    /// Returns `None` on Approved and the edited payload on Edited; Rejected
    /// surfaces as `BreakpointRejected`, which fails the run. A breakpoint
    /// already resolved in the store (resume path) applies immediately.
    pub async fn pause(
        &self,
        run: &mut RunRecord,
        breakpoint_id: &str,
        title: &str,
        question: &str,
        context_files: Vec<String>,
    ) -> Result<Option<Value>> {
        let existing = {
            let store = self.store.lock().unwrap();
            store.get_breakpoint(breakpoint_id)?
        };

        let record = match existing {
            Some(BreakpointRecord {
                resolution: Some(resolution),
                ..
            }) => {
                tracing::debug!(breakpoint_id = %breakpoint_id, "Replaying resolved breakpoint");
                return self.apply(run, resolution);
            }
            Some(record) => record,
            None => {
                let record = BreakpointRecord::new(
                    breakpoint_id,
                    &run.run_id,
                    title,
                    question,
                    context_files,
                );
                let mut store = self.store.lock().unwrap();
                store.save_breakpoint(&record)?;
                record
            }
        };

        run.status = RunStatus::AwaitingBreakpoint;
        run.touch();
        {
            let mut store = self.store.lock().unwrap();
            store.save_run(run)?;
        }

        tracing::info!(
            run_id = %run.run_id,
            breakpoint_id = %breakpoint_id,
            title = %title,
            "Run suspended at breakpoint"
        );

        let resolution = self.channel.await_resolution(&record).await?;

        // Channels that answer without writing (auto-approve) still need the
        // resolution persisted, or a resumed run would pause here again.
        {
            let mut store = self.store.lock().unwrap();
            if let Some(current) = store.get_breakpoint(breakpoint_id)? {
                if !current.is_resolved() {
                    store.resolve_breakpoint(breakpoint_id, resolution.clone())?;
                }
            }
        }

        self.apply(run, resolution)
    }

    /// Apply a resolution to the suspended run.
    fn apply(&self, run: &mut RunRecord, resolution: Resolution) -> Result<Option<Value>> {
        match resolution {
            Resolution::Approved => {
                self.restore_running(run)?;
                Ok(None)
            }
            Resolution::Edited { payload } => {
                self.restore_running(run)?;
                Ok(Some(payload))
            }
            Resolution::Rejected { reason } => {
                let reason = reason.unwrap_or_else(|| "rejected by reviewer".to_string());
                Err(CadenceError::BreakpointRejected(reason))
            }
        }
    }

    fn restore_running(&self, run: &mut RunRecord) -> Result<()> {
        run.status = RunStatus::Running;
        run.touch();
        let mut store = self.store.lock().unwrap();
        store.save_run(run)?;
        Ok(())
    }
}
