//! Capabilities the workflow consumes from outside collaborators
//!
//! - **Generator**: turns a question (or a prior candidate plus feedback)
//!   into a candidate query
//! - **Executor**: runs an approved query and reports what happened
//! - **SchemaSource**: supplies the opaque schema context handed to the
//!   generator
//!
//! The workflow never looks inside these; it only sequences the calls.

mod http;
mod schema;

pub use http::{HttpExecutor, HttpGenerator};
pub use schema::{FileSchemaSource, StaticSchema};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::approval::Confidence;
use crate::Result;

/// A generated candidate and its metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    /// The query itself
    pub artifact: String,
    /// Why the generator thinks this answers the question
    #[serde(default)]
    pub explanation: String,
    #[serde(default)]
    pub confidence: Confidence,
    /// Tables/entities the query touches
    #[serde(default)]
    pub referenced_entities: Vec<String>,
}

/// Outcome of one execution attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionReport {
    pub succeeded: bool,
    /// Result metadata (row counts, job ids, ...)
    #[serde(default)]
    pub metadata: serde_json::Value,
    #[serde(default)]
    pub error: Option<String>,
}

impl ExecutionReport {
    pub fn success(metadata: serde_json::Value) -> Self {
        Self {
            succeeded: true,
            metadata,
            error: None,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            succeeded: false,
            metadata: serde_json::Value::Null,
            error: Some(error.into()),
        }
    }
}

/// Query generation service
#[async_trait]
pub trait Generator: Send + Sync {
    /// Produce a first candidate for `question`
    async fn generate(&self, question: &str, schema_context: &str) -> Result<Candidate>;

    /// Revise `prior` according to the approver's `feedback`
    async fn refine(&self, prior: &str, feedback: &str, schema_context: &str)
        -> Result<Candidate>;
}

/// Query execution service. Called at most once per approved candidate.
#[async_trait]
pub trait Executor: Send + Sync {
    async fn execute(&self, artifact: &str) -> Result<ExecutionReport>;
}

/// Source of the schema/catalog context
#[async_trait]
pub trait SchemaSource: Send + Sync {
    async fn fetch(&self) -> Result<String>;
}
