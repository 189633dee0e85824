//! Built-in step handlers, one per `StepKind`.
//!
//! - `query` -- builds and executes a data query, attaches sample-size validation
//! - `statistical` -- runs a test over the combined rows of all dependencies
//! - `analysis` -- correlation scans and percentile-based expansion opportunities
//! - `comparison` -- cross-group comparison of one measure
//! - `aggregation` -- sum/mean/min/max/count rollups, optionally grouped
//! - `insight` -- findings from all ancestors, phrased as insight strings
//! - `stats` -- numeric helpers shared by the handlers above

pub mod aggregation;
pub mod analysis;
pub mod comparison;
pub mod insight;
pub mod query;
pub mod statistical;
pub mod stats;
