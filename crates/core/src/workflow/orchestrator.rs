use super::graph::Graph;
use crate::config::OrchestratorConfig;
use crate::error::{Error, PoolError, Result};
use crate::executor::{ExecutorRegistry, TaskExecutor};
use crate::types::{NodeId, Payload, RunId, RunStatus, Task, Workflow, WorkflowNode};
use crate::worker::{Worker, WorkerPool};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

/// Completed tasks of one run, keyed by node ID
type ResultStore = Arc<RwLock<HashMap<NodeId, Task>>>;

/// Everything a successful run produced
#[derive(Debug, Clone)]
pub struct RunReport {
    pub run_id: RunId,
    pub status: RunStatus,
    /// Topological order the run was planned in
    pub order: Vec<NodeId>,
    pub tasks: HashMap<NodeId, Task>,
    /// Result of the last node in `order`
    pub output: Payload,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}

/// Runs a workflow's nodes in dependency order against registered executors
pub struct Orchestrator {
    workflow_id: String,
    graph: Arc<Graph>,
    registry: Arc<ExecutorRegistry>,
    pool: Arc<WorkerPool>,
    config: OrchestratorConfig,
}

impl Orchestrator {
    pub fn new(
        workflow: &Workflow,
        registry: ExecutorRegistry,
        config: OrchestratorConfig,
    ) -> Result<Self> {
        let graph = Graph::build(workflow)?;
        let pool = WorkerPool::new(config.effective_max_workers());

        Ok(Self {
            workflow_id: workflow.id.clone(),
            graph: Arc::new(graph),
            registry: Arc::new(registry),
            pool: Arc::new(pool),
            config,
        })
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    pub fn registry(&self) -> &ExecutorRegistry {
        &self.registry
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Execute the workflow and return the final node's result
    pub async fn run(&self, cancel: &CancellationToken, initial_payload: Payload) -> Result<Payload> {
        Ok(self.execute(cancel, initial_payload).await?.output)
    }

    /// Execute the workflow and return every task it produced.
    ///
    /// Each call starts from scratch with its own result store; nothing is
    /// carried over from earlier or concurrent runs.
    pub async fn execute(
        &self,
        cancel: &CancellationToken,
        initial_payload: Payload,
    ) -> Result<RunReport> {
        let run_id = RunId::new();
        let span = tracing::info_span!(
            "workflow_run",
            run_id = %run_id,
            workflow_id = %self.workflow_id
        );

        self.execute_run(run_id, cancel, initial_payload)
            .instrument(span)
            .await
    }

    async fn execute_run(
        &self,
        run_id: RunId,
        cancel: &CancellationToken,
        initial_payload: Payload,
    ) -> Result<RunReport> {
        let started_at = Utc::now();
        tracing::info!("Starting workflow run: run_id={}", run_id);

        let results: ResultStore = Arc::new(RwLock::new(HashMap::with_capacity(self.graph.len())));
        let order = match self.walk(&results, cancel, &initial_payload).await {
            Ok(order) => order,
            Err(e) => {
                match e.run_status() {
                    RunStatus::Cancelled => {
                        tracing::warn!("Workflow run cancelled: run_id={}", run_id)
                    }
                    _ => tracing::error!("Workflow run failed: run_id={}, error={}", run_id, e),
                }
                return Err(e);
            }
        };

        let last = order
            .last()
            .cloned()
            .unwrap_or_else(|| self.graph.entry_point().clone());
        let tasks = std::mem::take(&mut *results.write().await);
        let output = match tasks.get(&last) {
            Some(task) => task.result.clone(),
            None => {
                tracing::error!("Final node {} left no result: run_id={}", last, run_id);
                return Err(Error::NoResult(last));
            }
        };

        let completed_at = Utc::now();
        tracing::info!(
            "Workflow run completed: run_id={}, nodes={}, duration_ms={}",
            run_id,
            tasks.len(),
            (completed_at - started_at).num_milliseconds()
        );

        Ok(RunReport {
            run_id,
            status: RunStatus::Completed,
            order,
            tasks,
            output,
            started_at,
            completed_at,
        })
    }

    /// Plan the run and dispatch every node, returning the planned order
    async fn walk(
        &self,
        results: &ResultStore,
        cancel: &CancellationToken,
        initial_payload: &Payload,
    ) -> Result<Vec<NodeId>> {
        let order = self.graph.topological_order()?;

        if self.config.concurrent {
            self.dispatch_concurrent(&order, results, cancel, initial_payload)
                .await?;
        } else {
            self.dispatch_sequential(&order, results, cancel, initial_payload)
                .await?;
        }

        Ok(order)
    }

    /// Run nodes one at a time in topological order
    async fn dispatch_sequential(
        &self,
        order: &[NodeId],
        results: &ResultStore,
        cancel: &CancellationToken,
        initial_payload: &Payload,
    ) -> Result<()> {
        for node_id in order {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }

            let (executor, task) = {
                let store = results.read().await;
                self.prepare(node_id, &store, initial_payload)?
            };

            tracing::debug!("Dispatching node {} as task {}", node_id, task.id);
            let worker = Worker::new(format!("{}-worker", task.id), executor);
            let done = worker
                .run(task, cancel.clone())
                .await
                .map_err(|source| execution_error(node_id.clone(), source, cancel))?;

            results.write().await.insert(node_id.clone(), done);
        }

        Ok(())
    }

    /// Run every ready node through the worker pool as soon as its inputs are stored
    async fn dispatch_concurrent(
        &self,
        order: &[NodeId],
        results: &ResultStore,
        cancel: &CancellationToken,
        initial_payload: &Payload,
    ) -> Result<()> {
        let position: HashMap<&NodeId, usize> =
            order.iter().enumerate().map(|(i, id)| (id, i)).collect();

        let mut waiting: HashMap<&NodeId, usize> = HashMap::with_capacity(order.len());
        for node_id in order {
            waiting.insert(node_id, self.graph.dependencies(node_id)?.len());
        }

        // Cancels whatever is still in flight once this function returns
        let frontier = cancel.child_token();
        let _frontier_guard = frontier.clone().drop_guard();
        let mut in_flight: JoinSet<(NodeId, std::result::Result<Task, PoolError>)> = JoinSet::new();

        let mut ready: Vec<&NodeId> = order.iter().filter(|id| waiting[id] == 0).collect();

        loop {
            for node_id in ready.drain(..) {
                if cancel.is_cancelled() {
                    return Err(Error::Cancelled);
                }

                let (executor, task) = {
                    let store = results.read().await;
                    self.prepare(node_id, &store, initial_payload)?
                };

                tracing::debug!("Submitting node {} as task {}", node_id, task.id);
                let pool = self.pool.clone();
                let token = frontier.clone();
                let id = node_id.clone();
                in_flight.spawn(async move {
                    let outcome = pool.submit(executor, task, token).await;
                    (id, outcome)
                });
            }

            let joined = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(Error::Cancelled),
                joined = in_flight.join_next() => joined,
            };
            let Some(joined) = joined else {
                break;
            };

            let (node_id, outcome) = joined.map_err(|e| Error::Join(e.to_string()))?;
            let done = match outcome {
                Ok(task) => task,
                Err(PoolError::Cancelled) => return Err(Error::Cancelled),
                Err(PoolError::Execution(source)) => {
                    return Err(execution_error(node_id, source, cancel));
                }
            };

            results.write().await.insert(node_id.clone(), done);

            let mut unlocked = Vec::new();
            for next in self.graph.dependents(&node_id) {
                if let Some(count) = waiting.get_mut(next) {
                    *count -= 1;
                    if *count == 0 {
                        unlocked.push(next);
                    }
                }
            }
            unlocked.sort_by_key(|id| position.get(id).copied().unwrap_or(usize::MAX));
            ready.extend(unlocked);
        }

        Ok(())
    }

    /// Resolve the executor and build the pending task for a node
    fn prepare(
        &self,
        node_id: &NodeId,
        results: &HashMap<NodeId, Task>,
        initial_payload: &Payload,
    ) -> Result<(Arc<dyn TaskExecutor>, Task)> {
        let node = self
            .graph
            .node(node_id)
            .ok_or_else(|| Error::NodeNotFound(node_id.clone()))?;

        let executor = self
            .registry
            .get(&node.executor)
            .ok_or_else(|| Error::ExecutorNotFound {
                node: node_id.clone(),
                kind: node.executor.clone(),
            })?;

        let payload = build_payload(node, results, initial_payload)?;
        Ok((executor, Task::for_node(node, payload)))
    }
}

/// Input payload for a node.
///
/// Nodes without inputs receive the run's initial payload verbatim. Every
/// other node receives one entry per input, keyed by the input's node ID and
/// holding that node's full result.
fn build_payload(
    node: &WorkflowNode,
    results: &HashMap<NodeId, Task>,
    initial_payload: &Payload,
) -> Result<Payload> {
    if node.inputs.is_empty() {
        return Ok(initial_payload.clone());
    }

    let mut payload = Payload::new();
    for input in &node.inputs {
        let upstream = results
            .get(input)
            .ok_or_else(|| Error::DependencyNotReady {
                node: node.id.clone(),
                dependency: input.clone(),
            })?;
        payload.insert(
            input.to_string(),
            serde_json::Value::Object(upstream.result.clone()),
        );
    }

    Ok(payload)
}

/// Attribute an executor failure to its node, unless the run was cancelled
fn execution_error(node: NodeId, source: anyhow::Error, cancel: &CancellationToken) -> Error {
    if cancel.is_cancelled() {
        return Error::Cancelled;
    }
    tracing::error!("Node {} failed: {:#}", node, source);
    Error::Execution { node, source }
}
