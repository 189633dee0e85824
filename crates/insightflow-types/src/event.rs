//! Events broadcast during workflow execution.
//!
//! `WorkflowEvent` is published on the engine's event bus so that CLIs,
//! servers and tests can follow an execution without polling its status.
//! All variants are Clone + Send + Sync for use with tokio broadcast channels.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::workflow::StepKind;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkflowEvent {
    /// The scheduler began dispatching an execution.
    ExecutionStarted {
        execution_id: Uuid,
        template_id: String,
        total_steps: usize,
    },

    /// A ready-frontier batch is about to be dispatched.
    BatchDispatched {
        execution_id: Uuid,
        batch: usize,
        step_ids: Vec<String>,
    },

    StepStarted {
        execution_id: Uuid,
        step_id: String,
        kind: StepKind,
    },

    StepCompleted {
        execution_id: Uuid,
        step_id: String,
        elapsed_ms: u64,
    },

    StepFailed {
        execution_id: Uuid,
        step_id: String,
        error: String,
    },

    /// A step can never run because upstream steps failed.
    StepBlocked {
        execution_id: Uuid,
        step_id: String,
        failed_dependencies: Vec<String>,
    },

    ExecutionCompleted {
        execution_id: Uuid,
        completed: usize,
        failed: usize,
        blocked: usize,
        duration_ms: u64,
    },

    ExecutionFailed { execution_id: Uuid, error: String },

    ExecutionCancelled { execution_id: Uuid },
}

impl WorkflowEvent {
    /// The execution this event belongs to.
    pub fn execution_id(&self) -> Uuid {
        match self {
            WorkflowEvent::ExecutionStarted { execution_id, .. }
            | WorkflowEvent::BatchDispatched { execution_id, .. }
            | WorkflowEvent::StepStarted { execution_id, .. }
            | WorkflowEvent::StepCompleted { execution_id, .. }
            | WorkflowEvent::StepFailed { execution_id, .. }
            | WorkflowEvent::StepBlocked { execution_id, .. }
            | WorkflowEvent::ExecutionCompleted { execution_id, .. }
            | WorkflowEvent::ExecutionFailed { execution_id, .. }
            | WorkflowEvent::ExecutionCancelled { execution_id } => *execution_id,
        }
    }
}
