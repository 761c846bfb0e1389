pub mod graph;
pub mod orchestrator;

pub use graph::Graph;
pub use orchestrator::{Orchestrator, RunReport};
