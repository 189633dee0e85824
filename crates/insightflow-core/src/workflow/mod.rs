//! Workflow engine core: dependency graph, scheduling, step dispatch and synthesis.
//!
//! - `dag` -- dependency graph, cycle detection, ready frontier, blocked steps
//! - `catalog` -- built-in templates and deep-copy customization
//! - `step_runner` -- kind -> handler dispatch with timing and optional timeout
//! - `handlers` -- one handler per step kind
//! - `scheduler` -- ready-frontier loop with concurrent batch dispatch
//! - `synthesizer` -- summary insights over a finished execution
//! - `engine` -- create/run/status/cancel operations and execution history

pub mod catalog;
pub mod dag;
pub mod engine;
pub mod handlers;
pub mod scheduler;
pub mod step_runner;
pub mod synthesizer;

pub use catalog::TemplateCatalog;
pub use engine::{EngineError, WorkflowEngine};
pub use step_runner::{StepError, StepHandler, StepRunner};
