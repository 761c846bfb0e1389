//! Error types for workflow construction and execution.

use crate::types::{NodeId, RunStatus};

/// Result type for orchestrator operations.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// A workflow definition that cannot be turned into a graph.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// The entry point does not name any node.
    #[error("entry point not found: {0}")]
    EntryPointNotFound(NodeId),

    /// Two nodes share an ID.
    #[error("duplicate node id: {0}")]
    DuplicateNode(NodeId),

    /// A node lists an input that is not a node of the workflow.
    #[error("node {node} references unknown input {input}")]
    DanglingInput { node: NodeId, input: NodeId },

    /// A node lists the same input more than once.
    #[error("node {node} lists input {input} more than once")]
    DuplicateInput { node: NodeId, input: NodeId },
}

/// Errors raised while ordering or running a workflow.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Malformed workflow definition.
    #[error("invalid workflow: {0}")]
    Config(#[from] ConfigError),

    /// The graph cannot be ordered.
    #[error("workflow contains cycle among nodes {}", join_ids(.nodes))]
    Cycle { nodes: Vec<NodeId> },

    /// Lookup of a node that is not in the graph.
    #[error("node not found: {0}")]
    NodeNotFound(NodeId),

    /// A node references an executor kind with no registration.
    #[error("executor {kind:?} not found for node {node}")]
    ExecutorNotFound { node: NodeId, kind: String },

    /// A dependency's result was read before it was stored.
    #[error("dependency {dependency} of node {node} not yet executed")]
    DependencyNotReady { node: NodeId, dependency: NodeId },

    /// The run was cancelled before or during dispatch.
    #[error("workflow run cancelled")]
    Cancelled,

    /// The executor reported failure for a node's task.
    #[error("node {node}: {source}")]
    Execution {
        node: NodeId,
        #[source]
        source: anyhow::Error,
    },

    /// The final node left no result behind.
    #[error("no result from final node {0}")]
    NoResult(NodeId),

    /// A spawned dispatch panicked or was aborted unexpectedly.
    #[error("dispatch task failed: {0}")]
    Join(String),
}

impl Error {
    /// The node this error is attributed to, if any.
    pub fn node_id(&self) -> Option<&NodeId> {
        match self {
            Self::Config(ConfigError::EntryPointNotFound(node))
            | Self::Config(ConfigError::DuplicateNode(node))
            | Self::Config(ConfigError::DanglingInput { node, .. })
            | Self::Config(ConfigError::DuplicateInput { node, .. })
            | Self::NodeNotFound(node)
            | Self::ExecutorNotFound { node, .. }
            | Self::DependencyNotReady { node, .. }
            | Self::Execution { node, .. }
            | Self::NoResult(node) => Some(node),
            Self::Cycle { .. } | Self::Cancelled | Self::Join(_) => None,
        }
    }

    /// Terminal state of a run that ended with this error.
    pub fn run_status(&self) -> RunStatus {
        match self {
            Self::Cancelled => RunStatus::Cancelled,
            _ => RunStatus::Failed,
        }
    }
}

/// Errors from submitting work to a [`crate::worker::WorkerPool`].
#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    /// Cancelled while waiting for a slot.
    #[error("cancelled while waiting for a worker slot")]
    Cancelled,

    /// The executor failed; the cause is passed through unchanged.
    #[error(transparent)]
    Execution(#[from] anyhow::Error),
}

fn join_ids(ids: &[NodeId]) -> String {
    let names: Vec<&str> = ids.iter().map(NodeId::as_str).collect();
    format!("[{}]", names.join(", "))
}
