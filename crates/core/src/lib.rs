// Core of the Loom DAG workflow orchestrator

pub mod config;
pub mod error;
pub mod executor;
pub mod types;
pub mod worker;
pub mod workflow;

pub use config::OrchestratorConfig;
pub use error::{ConfigError, Error, PoolError, Result};
pub use executor::{executor_fn, ExecutorRegistry, FnExecutor, TaskExecutor};
pub use types::*;
pub use worker::{Worker, WorkerPool};
pub use workflow::{Graph, Orchestrator, RunReport};

pub use tokio_util::sync::CancellationToken;
