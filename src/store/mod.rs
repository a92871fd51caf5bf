//! Storage layer for Cadence.
//!
//! Both stores use the same dual-storage approach:
//! - **JSONL file**: Append-only log of all record changes (source of truth)
//! - **SQLite database**: Query index for fast lookups (rebuilt from JSONL)
//!
//! The `EffectStore` is the idempotency log of task invocations; the
//! `RunStore` persists process runs and their breakpoints. Together they are
//! sufficient to resume a run from a fresh process.

mod effect_store;
mod records;
mod run_store;

pub use effect_store::{BeginOutcome, EffectStore};
pub use records::{
    BreakpointRecord, EffectRecord, EffectStatus, Resolution, RunRecord, RunStatus, StepOutcome,
    StepSummary,
};
pub use run_store::RunStore;

use std::path::Path;

use eyre::{Context, Result};
use sha2::{Digest, Sha256};

/// Compute a hash of the project directory path for storage isolation.
///
/// Runs started from different projects land in different store directories
/// under `~/.cadence/<hash>/`.
pub fn compute_project_hash(project_dir: &Path) -> Result<String> {
    let canonical = project_dir
        .canonicalize()
        .with_context(|| format!("Failed to canonicalize path: {}", project_dir.display()))?;

    let path_str = canonical.to_string_lossy();
    let mut hasher = Sha256::new();
    hasher.update(path_str.as_bytes());
    let result = hasher.finalize();

    // Take first 16 chars of hex
    Ok(hex::encode(&result[..8]))
}
