//! Application state shared by CLI commands and REST handlers.

use std::sync::Arc;

use insightflow_core::collaborator::Collaborators;
use insightflow_core::workflow::WorkflowEngine;
use insightflow_types::config::EngineConfig;

use crate::sample::sample_collaborators;

/// The engine plus the collaborators every run is handed.
///
/// Cheap to clone; axum clones it per request.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<WorkflowEngine>,
    pub collaborators: Collaborators,
}

impl AppState {
    /// Wire the engine with the built-in catalog and sample collaborators.
    pub fn new(config: EngineConfig) -> Self {
        let collaborators = sample_collaborators(&config, Vec::new());
        Self {
            engine: Arc::new(WorkflowEngine::new(config)),
            collaborators,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        self.engine.config()
    }
}
