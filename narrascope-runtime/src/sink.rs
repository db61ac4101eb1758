//! The result sink seam.

use async_trait::async_trait;
use narrascope_core::{AggregatedResult, TraceHandle};

use crate::error::SinkError;

/// What a sink did with one result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkOutcome {
    /// Number of records written.
    Persisted(usize),
    /// Nothing to do, with the reason. Not an error.
    Skipped(String),
}

/// A destination for aggregated evaluation results.
///
/// Sinks are independent: the coordinator calls each one regardless of how
/// the others fared.
#[async_trait]
pub trait ResultSink: Send + Sync {
    fn name(&self) -> &str;

    async fn persist(
        &self,
        result: &AggregatedResult,
        trace: Option<&TraceHandle>,
    ) -> Result<SinkOutcome, SinkError>;
}
