// Built-in executors available to workflows run from the command line

use anyhow::{bail, Context, Result};
use loom_core::{ExecutorRegistry, Payload, Task, TaskExecutor};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Returns its payload as the result
pub struct EchoExecutor;

#[async_trait::async_trait]
impl TaskExecutor for EchoExecutor {
    async fn execute(&self, mut task: Task, _cancel: CancellationToken) -> Result<Task> {
        let payload = task.payload.clone();
        task.complete(payload);
        Ok(task)
    }
}

/// Returns the node's config entries as the result
pub struct ConstantExecutor;

#[async_trait::async_trait]
impl TaskExecutor for ConstantExecutor {
    async fn execute(&self, mut task: Task, _cancel: CancellationToken) -> Result<Task> {
        let result: Payload = task
            .config
            .iter()
            .map(|(k, v)| (k.clone(), serde_json::Value::String(v.clone())))
            .collect();
        task.complete(result);
        Ok(task)
    }
}

/// Waits `config.ms` milliseconds, then echoes its payload
pub struct DelayExecutor;

#[async_trait::async_trait]
impl TaskExecutor for DelayExecutor {
    async fn execute(&self, mut task: Task, cancel: CancellationToken) -> Result<Task> {
        let ms: u64 = match task.config.get("ms") {
            Some(raw) => raw
                .parse()
                .with_context(|| format!("invalid delay {:?} for node {}", raw, task.node_id))?,
            None => 0,
        };

        tokio::select! {
            _ = cancel.cancelled() => bail!("delay interrupted by cancellation"),
            _ = tokio::time::sleep(Duration::from_millis(ms)) => {}
        }

        let payload = task.payload.clone();
        task.complete(payload);
        Ok(task)
    }
}

/// Always fails with `config.message`
pub struct FailExecutor;

#[async_trait::async_trait]
impl TaskExecutor for FailExecutor {
    async fn execute(&self, task: Task, _cancel: CancellationToken) -> Result<Task> {
        let message = task
            .config
            .get("message")
            .cloned()
            .unwrap_or_else(|| "node failed".to_string());
        bail!(message)
    }
}

/// Registry with every built-in executor
pub fn builtin_registry() -> ExecutorRegistry {
    let mut registry = ExecutorRegistry::new();
    registry.register("echo", Arc::new(EchoExecutor));
    registry.register("constant", Arc::new(ConstantExecutor));
    registry.register("delay", Arc::new(DelayExecutor));
    registry.register("fail", Arc::new(FailExecutor));
    registry
}
