use serde::{Deserialize, Serialize};

/// Orchestrator settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Upper bound on simultaneously executing nodes in concurrent mode
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,

    /// Dispatch every ready node through the worker pool instead of walking
    /// the topological order one node at a time
    #[serde(default)]
    pub concurrent: bool,
}

fn default_max_workers() -> usize {
    4
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_workers: default_max_workers(),
            concurrent: false,
        }
    }
}

impl OrchestratorConfig {
    pub fn sequential() -> Self {
        Self::default()
    }

    pub fn concurrent(max_workers: usize) -> Self {
        Self {
            max_workers,
            concurrent: true,
        }
    }

    /// Worker bound actually used; zero falls back to the default
    pub fn effective_max_workers(&self) -> usize {
        if self.max_workers == 0 {
            default_max_workers()
        } else {
            self.max_workers
        }
    }
}
