//! CLI command definitions using clap.
//!
//! Defines the main CLI structure and subcommands:
//! - list: list runs
//! - status: inspect one run (history, effects)
//! - breakpoints: show pending breakpoints
//! - approve/reject/edit: resolve a breakpoint
//! - cancel: request cancellation of a run

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Cadence - a durable task-orchestration engine for agent pipelines
#[derive(Parser, Debug)]
#[command(name = "cadence")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Optional config file path
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Project directory whose runs to operate on (defaults to cwd)
    #[arg(short, long, global = true)]
    pub project: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Commands>,
}

impl Cli {
    /// Check if verbose mode is enabled
    pub fn is_verbose(&self) -> bool {
        self.verbose
    }
}

/// Main subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// List runs
    List {
        /// Filter by status (running, awaiting_breakpoint, completed, failed, cancelled)
        #[arg(short, long)]
        status: Option<String>,
    },

    /// Get status of a specific run
    Status {
        /// Run ID to check
        run_id: String,

        /// Include step history and effect records
        #[arg(short, long)]
        detailed: bool,
    },

    /// List pending breakpoints
    Breakpoints {
        /// Only show breakpoints for this run
        #[arg(short, long)]
        run_id: Option<String>,
    },

    /// Approve a pending breakpoint
    Approve {
        /// Breakpoint ID to approve
        id: String,
    },

    /// Reject a pending breakpoint (fails the suspended run)
    Reject {
        /// Breakpoint ID to reject
        id: String,

        /// Reason for rejection
        #[arg(short, long)]
        reason: Option<String>,
    },

    /// Resolve a pending breakpoint with edited parameters
    Edit {
        /// Breakpoint ID to resolve
        id: String,

        /// Edited payload as a JSON object
        payload: String,
    },

    /// Request cancellation of a run
    Cancel {
        /// Run ID to cancel
        run_id: String,
    },
}
