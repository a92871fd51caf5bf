//! Mock agent client for tests and offline demos.
//!
//! Routes each invocation through a programmable handler keyed on the
//! descriptor, with optional simulated latency and full call accounting, so
//! tests can assert memoization (call counts), ordering (latency skew), and
//! fail-fast behavior (handler errors for specific inputs).

use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::agent::{AgentClient, AgentError, TaskDescriptor};

type Handler = Box<dyn Fn(&TaskDescriptor) -> std::result::Result<Value, AgentError> + Send + Sync>;
type DelayFn = Box<dyn Fn(&TaskDescriptor) -> Duration + Send + Sync>;

/// Programmable in-memory agent client
pub struct MockAgentClient {
    handler: Handler,
    delay: DelayFn,
    calls: AtomicU32,
    seen: Mutex<Vec<TaskDescriptor>>,
}

impl MockAgentClient {
    /// Client that answers every invocation with the same payload
    pub fn returning(payload: Value) -> Self {
        Self::with_handler(move |_| Ok(payload.clone()))
    }

    /// Client that fails every invocation with a transport error
    pub fn failing(message: impl Into<String>) -> Self {
        let message = message.into();
        Self::with_handler(move |_| Err(AgentError::Transport(message.clone())))
    }

    /// Client with a custom handler
    pub fn with_handler<F>(handler: F) -> Self
    where
        F: Fn(&TaskDescriptor) -> std::result::Result<Value, AgentError> + Send + Sync + 'static,
    {
        Self {
            handler: Box::new(handler),
            delay: Box::new(|_| Duration::ZERO),
            calls: AtomicU32::new(0),
            seen: Mutex::new(Vec::new()),
        }
    }

    /// Add simulated latency, computed per descriptor
    pub fn with_delay<F>(mut self, delay: F) -> Self
    where
        F: Fn(&TaskDescriptor) -> Duration + Send + Sync + 'static,
    {
        self.delay = Box::new(delay);
        self
    }

    /// Number of invocations so far
    pub fn call_count(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    /// Descriptors received, in call order
    pub fn seen(&self) -> Vec<TaskDescriptor> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl AgentClient for MockAgentClient {
    async fn invoke(&self, descriptor: &TaskDescriptor) -> std::result::Result<Value, AgentError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen.lock().unwrap().push(descriptor.clone());

        let delay = (self.delay)(descriptor);
        if delay > Duration::ZERO {
            tokio::time::sleep(delay).await;
        }

        (self.handler)(descriptor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_returning_client() {
        let client = MockAgentClient::returning(json!({"answer": 42}));
        let desc = TaskDescriptor::new("worker", "compute");

        let out = client.invoke(&desc).await.unwrap();
        assert_eq!(out["answer"], 42);
        assert_eq!(client.call_count(), 1);
    }

    #[tokio::test]
    async fn test_failing_client() {
        let client = MockAgentClient::failing("boom");
        let desc = TaskDescriptor::new("worker", "compute");

        let err = client.invoke(&desc).await.unwrap_err();
        assert!(matches!(err, AgentError::Transport(_)));
    }

    #[tokio::test]
    async fn test_handler_routes_on_descriptor() {
        let client = MockAgentClient::with_handler(|desc| {
            if desc.instructions.contains("fail") {
                Err(AgentError::Refused("no".to_string()))
            } else {
                Ok(json!({"ok": true}))
            }
        });

        let good = TaskDescriptor::new("worker", "do the thing");
        let bad = TaskDescriptor::new("worker", "fail the thing");

        assert!(client.invoke(&good).await.is_ok());
        assert!(client.invoke(&bad).await.is_err());
        assert_eq!(client.call_count(), 2);
    }

    #[tokio::test]
    async fn test_seen_records_call_order() {
        let client = MockAgentClient::returning(json!({}));
        client.invoke(&TaskDescriptor::new("a", "first")).await.unwrap();
        client.invoke(&TaskDescriptor::new("b", "second")).await.unwrap();

        let seen = client.seen();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].instructions, "first");
        assert_eq!(seen[1].instructions, "second");
    }

    #[tokio::test]
    async fn test_delay_is_applied() {
        let client = MockAgentClient::returning(json!({}))
            .with_delay(|_| Duration::from_millis(20));
        let desc = TaskDescriptor::new("worker", "slow");

        let start = std::time::Instant::now();
        client.invoke(&desc).await.unwrap();
        assert!(start.elapsed() >= Duration::from_millis(20));
    }
}
