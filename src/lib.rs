//! Cadence - a durable task-orchestration engine for agent pipelines
//!
//! Cadence executes "processes": declarative pipelines of named tasks whose
//! actual reasoning is delegated to an external agent runtime. The engine
//! owns what the scripts cannot: durable effect memoization, parallel
//! fan-out, human-review breakpoints, convergence loops, and crash-safe
//! resumption.

pub mod agent;
pub mod breakpoint;
pub mod cli;
pub mod config;
pub mod context;
pub mod convergence;
pub mod error;
pub mod id;
pub mod process;
pub mod store;
pub mod task;

pub use error::{CadenceError, Result};
