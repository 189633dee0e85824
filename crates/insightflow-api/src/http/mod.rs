//! HTTP/REST API layer for insightflow.
//!
//! Axum-based REST API at `/api/v1/` exposing the engine operations, with an
//! envelope response format and CORS support.

pub mod error;
pub mod handlers;
pub mod response;
pub mod router;
