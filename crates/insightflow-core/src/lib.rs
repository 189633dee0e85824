//! Workflow engine for insightflow.
//!
//! This crate owns the dependency graph, the ready-frontier scheduler, the
//! per-kind step handlers and the engine operations. It reaches data and
//! statistics only through the collaborator traits in `collaborator` and
//! never depends on `insightflow-api` or any I/O crate.

pub mod collaborator;
pub mod event;
pub mod workflow;
