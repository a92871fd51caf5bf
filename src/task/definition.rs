//! Task definitions and the registry that holds them.
//!
//! A TaskDefinition is a named, parameterized unit of work: pure data plus a
//! builder closure that turns an input snapshot into a TaskDescriptor for the
//! agent runtime. Definitions are created at module load time, never mutated,
//! and shared read-only across runs via the registry.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use crate::agent::TaskDescriptor;
use crate::context::ExecutionContext;
use crate::error::{CadenceError, Result};
use crate::task::schema::OutputSchema;

type DescriptorBuilder = Box<dyn Fn(&Value, &ExecutionContext) -> TaskDescriptor + Send + Sync>;

/// A named unit of delegated work with a declared output contract.
pub struct TaskDefinition {
    name: String,
    schema: OutputSchema,
    builder: DescriptorBuilder,
}

impl TaskDefinition {
    /// Create a definition. The schema is compiled once here.
    pub fn new<F>(name: impl Into<String>, output_schema: Value, builder: F) -> Result<Self>
    where
        F: Fn(&Value, &ExecutionContext) -> TaskDescriptor + Send + Sync + 'static,
    {
        Ok(Self {
            name: name.into(),
            schema: OutputSchema::compile(output_schema)?,
            builder: Box::new(builder),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn schema(&self) -> &OutputSchema {
        &self.schema
    }

    /// Build the descriptor for one invocation.
    pub fn descriptor(&self, input: &Value, ctx: &ExecutionContext) -> TaskDescriptor {
        (self.builder)(input, ctx)
    }

    /// Validate a raw payload against the declared output schema.
    pub fn validate_output(&self, payload: &Value) -> Result<()> {
        self.schema.check(payload).map_err(|message| CadenceError::SchemaViolation {
            task: self.name.clone(),
            message,
        })
    }
}

impl std::fmt::Debug for TaskDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskDefinition").field("name", &self.name).finish()
    }
}

/// Registry mapping task names to definitions.
///
/// ProcessDefinitions are plain data and reference tasks by name; the
/// registry is where those names resolve to behavior.
#[derive(Debug, Default)]
pub struct TaskRegistry {
    tasks: HashMap<String, Arc<TaskDefinition>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a definition. Last registration wins on name collision.
    pub fn register(&mut self, definition: TaskDefinition) -> &mut Self {
        self.tasks.insert(definition.name().to_string(), Arc::new(definition));
        self
    }

    /// Resolve a task by name.
    pub fn get(&self, name: &str) -> Result<Arc<TaskDefinition>> {
        self.tasks
            .get(name)
            .cloned()
            .ok_or_else(|| CadenceError::TaskNotFound(name.to_string()))
    }

    /// Names of all registered tasks, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tasks.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn generate_task() -> TaskDefinition {
        TaskDefinition::new(
            "generate",
            json!({
                "type": "object",
                "properties": { "draft": { "type": "string" } },
                "required": ["draft"]
            }),
            |input, ctx| {
                TaskDescriptor::new(&ctx.agent, "Produce a draft")
                    .with_context(input.clone())
            },
        )
        .unwrap()
    }

    #[test]
    fn test_definition_builds_descriptor() {
        let def = generate_task();
        let ctx = ExecutionContext::new("run-1", "writer");
        let desc = def.descriptor(&json!({"topic": "storage"}), &ctx);

        assert_eq!(desc.agent, "writer");
        assert_eq!(desc.context["topic"], "storage");
    }

    #[test]
    fn test_validate_output_accepts_conforming_payload() {
        let def = generate_task();
        assert!(def.validate_output(&json!({"draft": "text"})).is_ok());
    }

    #[test]
    fn test_validate_output_rejects_missing_field() {
        let def = generate_task();
        let err = def.validate_output(&json!({"other": 1})).unwrap_err();
        match err {
            CadenceError::SchemaViolation { task, message } => {
                assert_eq!(task, "generate");
                assert!(message.contains("draft"));
            }
            other => panic!("expected SchemaViolation, got {:?}", other),
        }
    }

    #[test]
    fn test_registry_register_and_get() {
        let mut registry = TaskRegistry::new();
        registry.register(generate_task());

        assert_eq!(registry.len(), 1);
        let def = registry.get("generate").unwrap();
        assert_eq!(def.name(), "generate");
    }

    #[test]
    fn test_registry_unknown_task() {
        let registry = TaskRegistry::new();
        let err = registry.get("missing").unwrap_err();
        assert!(matches!(err, CadenceError::TaskNotFound(_)));
    }

    #[test]
    fn test_registry_names_sorted() {
        let mut registry = TaskRegistry::new();
        registry.register(
            TaskDefinition::new("zeta", json!({"type": "object"}), |_, ctx| {
                TaskDescriptor::new(&ctx.agent, "z")
            })
            .unwrap(),
        );
        registry.register(generate_task());

        assert_eq!(registry.names(), vec!["generate", "zeta"]);
    }

    #[test]
    fn test_registry_last_registration_wins() {
        let mut registry = TaskRegistry::new();
        registry.register(generate_task());
        registry.register(
            TaskDefinition::new("generate", json!({"type": "object"}), |_, ctx| {
                TaskDescriptor::new(&ctx.agent, "replacement")
            })
            .unwrap(),
        );

        let def = registry.get("generate").unwrap();
        let ctx = ExecutionContext::new("run-1", "writer");
        assert_eq!(def.descriptor(&json!({}), &ctx).instructions, "replacement");
    }
}
