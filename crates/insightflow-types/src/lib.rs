//! Shared domain types for insightflow.
//!
//! This crate contains the types used across the workspace: workflow
//! templates and executions, collaborator payloads, engine events,
//! configuration and the configuration-error taxonomy.
//!
//! Zero infrastructure dependencies -- only serde, uuid, chrono, thiserror.

pub mod analytics;
pub mod config;
pub mod error;
pub mod event;
pub mod workflow;
