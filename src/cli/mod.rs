//! CLI module for cadence - command-line interface and subcommands.
//!
//! Provides run inspection, breakpoint resolution, and cancellation; the
//! commands operate purely on the persisted stores, which is how a human
//! resolves a suspended run from another terminal.

pub mod commands;

pub use commands::Cli;
