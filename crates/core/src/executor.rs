// Executor capability and the registry that maps executor kinds to implementations

use crate::types::Task;
use anyhow::Result;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Performs the actual work for a task (model call, retrieval, planning, ...)
#[async_trait::async_trait]
pub trait TaskExecutor: Send + Sync {
    /// Execute the task and return it with its result filled in.
    ///
    /// Long-running executors should watch `cancel` and stop early once it fires.
    async fn execute(&self, task: Task, cancel: CancellationToken) -> Result<Task>;
}

/// Adapter that lets a plain async closure act as an executor
pub struct FnExecutor<F> {
    f: F,
}

impl<F> FnExecutor<F> {
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait::async_trait]
impl<F, Fut> TaskExecutor for FnExecutor<F>
where
    F: Fn(Task, CancellationToken) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Task>> + Send + 'static,
{
    async fn execute(&self, task: Task, cancel: CancellationToken) -> Result<Task> {
        (self.f)(task, cancel).await
    }
}

/// Wrap a closure as a shareable executor
pub fn executor_fn<F, Fut>(f: F) -> Arc<dyn TaskExecutor>
where
    F: Fn(Task, CancellationToken) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Task>> + Send + 'static,
{
    Arc::new(FnExecutor::new(f))
}

/// Registry of executors keyed by executor kind
#[derive(Clone)]
pub struct ExecutorRegistry {
    executors: HashMap<String, Arc<dyn TaskExecutor>>,
}

impl ExecutorRegistry {
    pub fn new() -> Self {
        Self {
            executors: HashMap::new(),
        }
    }

    /// Register an executor, replacing any previous one of the same kind
    pub fn register(&mut self, kind: impl Into<String>, executor: Arc<dyn TaskExecutor>) {
        self.executors.insert(kind.into(), executor);
    }

    /// Register a closure as an executor
    pub fn register_fn<F, Fut>(&mut self, kind: impl Into<String>, f: F)
    where
        F: Fn(Task, CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Task>> + Send + 'static,
    {
        self.register(kind, executor_fn(f));
    }

    /// Get an executor by kind
    pub fn get(&self, kind: &str) -> Option<Arc<dyn TaskExecutor>> {
        self.executors.get(kind).cloned()
    }

    /// Check if an executor kind is registered
    pub fn contains(&self, kind: &str) -> bool {
        self.executors.contains_key(kind)
    }

    /// Registered kinds, sorted
    pub fn kinds(&self) -> Vec<String> {
        let mut kinds: Vec<String> = self.executors.keys().cloned().collect();
        kinds.sort();
        kinds
    }

    pub fn len(&self) -> usize {
        self.executors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.executors.is_empty()
    }
}

impl Default for ExecutorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{NodeId, Payload};
    use serde_json::json;

    struct Upper;

    #[async_trait::async_trait]
    impl TaskExecutor for Upper {
        async fn execute(&self, mut task: Task, _cancel: CancellationToken) -> Result<Task> {
            let text = task
                .payload
                .get("text")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_uppercase();
            let mut result = Payload::new();
            result.insert("text".to_string(), json!(text));
            task.complete(result);
            Ok(task)
        }
    }

    fn task_with_text(text: &str) -> Task {
        let mut payload = Payload::new();
        payload.insert("text".to_string(), json!(text));
        Task::new(NodeId::new("n"), "N", payload)
    }

    #[tokio::test]
    async fn test_registry_lookup() {
        let mut registry = ExecutorRegistry::new();
        registry.register("upper", Arc::new(Upper));
        registry.register_fn("noop", |task, _cancel| async move { Ok::<_, anyhow::Error>(task) });

        assert_eq!(registry.len(), 2);
        assert!(registry.contains("upper"));
        assert!(!registry.contains("llm"));
        assert!(registry.get("llm").is_none());
        assert_eq!(registry.kinds(), vec!["noop".to_string(), "upper".to_string()]);

        let executor = registry.get("upper").unwrap();
        let task = executor
            .execute(task_with_text("hello"), CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(task.result["text"], json!("HELLO"));
    }

    #[tokio::test]
    async fn test_fn_executor_propagates_error() {
        let executor = executor_fn(|_task, _cancel| async move {
            Err::<Task, _>(anyhow::anyhow!("retriever offline"))
        });

        let err = executor
            .execute(task_with_text("x"), CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "retriever offline");
    }

    #[tokio::test]
    async fn test_register_replaces_kind() {
        let mut registry = ExecutorRegistry::default();
        registry.register_fn("x", |_task, _cancel| async move {
            Err::<Task, _>(anyhow::anyhow!("old"))
        });
        registry.register_fn("x", |task, _cancel| async move { Ok::<_, anyhow::Error>(task) });

        assert_eq!(registry.len(), 1);
        let result = registry
            .get("x")
            .unwrap()
            .execute(task_with_text("x"), CancellationToken::new())
            .await;
        assert!(result.is_ok());
    }
}
