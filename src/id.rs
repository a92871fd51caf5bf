//! ID generation for runs, effects, and breakpoints.
//!
//! Run ids are unique per invocation (timestamp + counter). Effect and
//! breakpoint ids are NOT random: they derive deterministically from the run
//! id and the step's position in the process, so a resumed run regenerates
//! the same ids and replays from the effect store instead of re-invoking.

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use chrono::Utc;

/// Get current time in milliseconds since epoch.
pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// Generate a unique run ID based on timestamp with sub-second precision.
///
/// Format: "run-" + seconds + microseconds + counter (e.g. "run-17378028001234560001").
/// The atomic counter keeps ids unique even when several runs start within
/// the same microsecond.
pub fn generate_run_id() -> String {
    static COUNTER: AtomicU32 = AtomicU32::new(0);

    let duration = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("Time went backwards");

    let secs = duration.as_secs();
    let micros = duration.subsec_micros();
    let counter = COUNTER.fetch_add(1, Ordering::Relaxed);

    format!("run-{}{:06}{:04}", secs, micros, counter % 10000)
}

/// Deterministic effect id for a step position within a run.
///
/// `path` is the step path, e.g. "s0", "s1.f2" (fan-out member 2 of step 1),
/// "s2.i1.s0" (step 0 of iteration 1 of the loop at step 2).
pub fn effect_id(run_id: &str, path: &str) -> String {
    format!("{}:{}", run_id, path)
}

/// Deterministic breakpoint id for a step position within a run.
pub fn breakpoint_id(run_id: &str, path: &str) -> String {
    format!("{}:{}:bp", run_id, path)
}

/// Path of a top-level (or nested) step at `index` under `prefix`.
///
/// An empty prefix yields "s0"; prefix "s2.i1" yields "s2.i1.s0".
pub fn step_path(prefix: &str, index: usize) -> String {
    if prefix.is_empty() {
        format!("s{}", index)
    } else {
        format!("{}.s{}", prefix, index)
    }
}

/// Path of fan-out member `member` within the step at `path`.
pub fn fanout_path(path: &str, member: usize) -> String {
    format!("{}.f{}", path, member)
}

/// Path prefix for iteration `iteration` of the loop at `path`.
pub fn iteration_path(path: &str, iteration: u32) -> String {
    format!("{}.i{}", path, iteration)
}
