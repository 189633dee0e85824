//! REST API handlers, one module per resource.

pub mod executions;
pub mod templates;
