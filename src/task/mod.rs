//! Task layer: definitions, output schemas, and the executor.
//!
//! A task is a named unit of delegated work with a declared output contract.
//! Definitions are pure data plus a descriptor builder; the executor layers
//! memoization and schema validation around the agent call.

mod definition;
mod executor;
mod schema;

pub use definition::{TaskDefinition, TaskRegistry};
pub use executor::TaskExecutor;
pub use schema::OutputSchema;
