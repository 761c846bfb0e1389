use anyhow::{Context, Result};
use loom_core::{OrchestratorConfig, Workflow};
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CliConfig {
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
}

impl CliConfig {
    pub fn load(config_path: &Path) -> Result<Self> {
        // Load config file if it exists, otherwise use defaults
        if !config_path.exists() {
            tracing::info!(
                "Configuration file {} not found, using defaults",
                config_path.display()
            );
            return Ok(Self::default());
        }

        let content =
            std::fs::read_to_string(config_path).context("Failed to read configuration file")?;
        toml::from_str(&content).context("Failed to parse configuration file")
    }

    /// Apply command-line overrides on top of the file values
    pub fn with_overrides(mut self, max_workers: Option<usize>, concurrent: bool) -> Self {
        if let Some(max_workers) = max_workers {
            self.orchestrator.max_workers = max_workers;
        }
        if concurrent {
            self.orchestrator.concurrent = true;
        }
        self
    }
}

/// Load a workflow definition; `.toml` files are read as TOML, anything else as JSON
pub fn load_workflow(path: &Path) -> Result<Workflow> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read workflow file {}", path.display()))?;

    let is_toml = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));

    let workflow = if is_toml {
        Workflow::from_toml_str(&content)
    } else {
        Workflow::from_json_str(&content)
    };

    workflow.with_context(|| format!("Failed to parse workflow file {}", path.display()))
}
