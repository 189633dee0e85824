//! Collaborator trait definitions.
//!
//! The engine reaches the query layer, the statistical tester and the optional
//! insight writer only through these traits. Implementations live outside this
//! crate (the `iflow` binary ships deterministic sample implementations).
//!
//! The traits are object-safe (boxed futures) so a `Collaborators` bundle can
//! be cloned cheaply into every spawned step task.

use std::sync::Arc;

use futures_util::future::BoxFuture;
use serde_json::Value;

use insightflow_types::analytics::{
    Finding, QueryPlan, QueryRequest, QueryResult, TestOutcome, ValidationReport,
};
use insightflow_types::error::CollaboratorError;

/// Builds and executes data queries.
pub trait QueryBuilder: Send + Sync {
    /// Turn a request into an executable plan. Pure; no I/O.
    fn build(&self, request: &QueryRequest) -> Result<QueryPlan, CollaboratorError>;

    /// Execute a plan against the data backend.
    fn execute<'a>(
        &'a self,
        plan: &'a QueryPlan,
    ) -> BoxFuture<'a, Result<QueryResult, CollaboratorError>>;
}

/// Statistical validation and hypothesis testing.
pub trait StatisticalTester: Send + Sync {
    /// Check sample sizes per dimension value and report warnings.
    fn validate(&self, result: &QueryResult, dimensions: &[String]) -> ValidationReport;

    /// Run a test of `comparison_type` over combined rows.
    fn run_test<'a>(
        &'a self,
        data: &'a [Value],
        comparison_type: &'a str,
        dimensions: &'a [String],
        measures: &'a [String],
    ) -> BoxFuture<'a, Result<TestOutcome, CollaboratorError>>;
}

/// Optional natural-language phrasing of structured findings.
pub trait InsightWriter: Send + Sync {
    fn phrase<'a>(
        &'a self,
        findings: &'a [Finding],
    ) -> BoxFuture<'a, Result<Vec<String>, CollaboratorError>>;
}

/// The set of collaborators handed to a run.
#[derive(Clone)]
pub struct Collaborators {
    pub query: Arc<dyn QueryBuilder>,
    pub tester: Arc<dyn StatisticalTester>,
    pub writer: Option<Arc<dyn InsightWriter>>,
}

impl Collaborators {
    pub fn new(query: Arc<dyn QueryBuilder>, tester: Arc<dyn StatisticalTester>) -> Self {
        Self {
            query,
            tester,
            writer: None,
        }
    }

    pub fn with_writer(mut self, writer: Arc<dyn InsightWriter>) -> Self {
        self.writer = Some(writer);
        self
    }
}

impl std::fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collaborators")
            .field("has_writer", &self.writer.is_some())
            .finish()
    }
}
