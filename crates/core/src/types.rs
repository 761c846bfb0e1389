use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Input and output shape of a task: string keys to opaque JSON values
pub type Payload = serde_json::Map<String, serde_json::Value>;

/// Unique identifier for a workflow run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunId(pub Uuid);

impl RunId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a single task dispatch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskId(pub Uuid);

impl TaskId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a workflow node
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub String);

impl NodeId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for NodeId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for NodeId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Status of a workflow run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    NotStarted,
    Running,
    Completed,
    Failed,
    Cancelled,
}

/// Lifecycle state of a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    /// Completed, failed and cancelled tasks never change state again
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// A step in the workflow graph, bound to an executor kind
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowNode {
    pub id: NodeId,
    pub name: String,
    /// Registry key of the executor, e.g. "llm", "retriever", "planner"
    pub executor: String,
    /// IDs of nodes whose output feeds this node
    #[serde(default)]
    pub inputs: Vec<NodeId>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub config: HashMap<String, String>,
    /// Reserved for conditional execution; carried but never evaluated
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conditional: Option<String>,
}

impl WorkflowNode {
    pub fn new(id: impl Into<String>, name: impl Into<String>, executor: impl Into<String>) -> Self {
        Self {
            id: NodeId::new(id),
            name: name.into(),
            executor: executor.into(),
            inputs: Vec::new(),
            config: HashMap::new(),
            conditional: None,
        }
    }

    pub fn with_inputs<I, S>(mut self, inputs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<NodeId>,
    {
        self.inputs = inputs.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_config(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.config.insert(key.into(), value.into());
        self
    }

    pub fn with_conditional(mut self, expression: impl Into<String>) -> Self {
        self.conditional = Some(expression.into());
        self
    }
}

/// A directed graph of workflow steps
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workflow {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub entry_point: NodeId,
    pub nodes: Vec<WorkflowNode>,
}

impl Workflow {
    pub fn new(id: impl Into<String>, entry_point: impl Into<NodeId>, nodes: Vec<WorkflowNode>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            entry_point: entry_point.into(),
            nodes,
        }
    }

    pub fn from_json_str(content: &str) -> anyhow::Result<Self> {
        Ok(serde_json::from_str(content)?)
    }

    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(content)?)
    }
}

/// Runtime record of one node invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub node_id: NodeId,
    pub name: String,
    pub status: TaskStatus,
    #[serde(default, skip_serializing_if = "Payload::is_empty")]
    pub payload: Payload,
    #[serde(default, skip_serializing_if = "Payload::is_empty")]
    pub result: Payload,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub config: HashMap<String, String>,
    /// Node IDs whose results make up the payload
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<NodeId>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl Task {
    /// Create a pending task for a node with a fresh task ID
    pub fn new(node_id: NodeId, name: impl Into<String>, payload: Payload) -> Self {
        Self {
            id: TaskId::new(),
            node_id,
            name: name.into(),
            status: TaskStatus::Pending,
            payload,
            result: Payload::new(),
            error: None,
            config: HashMap::new(),
            dependencies: Vec::new(),
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    /// Build the pending task that dispatches `node` with `payload`
    pub fn for_node(node: &WorkflowNode, payload: Payload) -> Self {
        let mut task = Self::new(node.id.clone(), node.name.clone(), payload);
        task.dependencies = node.inputs.clone();
        task.config = node.config.clone();
        task
    }

    pub fn mark_running(&mut self) {
        self.status = TaskStatus::Running;
        self.started_at = Some(Utc::now());
    }

    pub fn complete(&mut self, result: Payload) {
        self.result = result;
        self.status = TaskStatus::Completed;
        self.completed_at = Some(Utc::now());
    }

    pub fn fail(&mut self, error: impl Into<String>) {
        self.error = Some(error.into());
        self.status = TaskStatus::Failed;
        self.completed_at = Some(Utc::now());
    }

    pub fn cancel(&mut self) {
        self.status = TaskStatus::Cancelled;
        self.completed_at = Some(Utc::now());
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Serialize the payload to JSON
    pub fn marshal_payload(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(&self.payload)
    }
}
