//! Fire-and-forget evaluation scheduling.
//!
//! The narrative pipeline hands a finished narrative to
//! [`AsyncEvaluationCoordinator::submit`] and carries on. Scoring and
//! persistence run on a background task; whatever goes wrong there is logged
//! and never reaches the caller.

use chrono::NaiveDate;
use futures::FutureExt;
use narrascope_core::{
    AggregatedResult, EngineConfig, EvaluationRequest, GroundTruthContext, LlmProvider,
    ScoreAggregator, TraceHandle,
};
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, Instant};
use tokio::runtime::Handle;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::{CoordinatorError, SinkError};
use crate::sink::{ResultSink, SinkOutcome};
use crate::sqlite::SqliteScoreStore;
use crate::trace::TraceFeedbackSink;

/// Result of a submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// Evaluation scheduled under this id.
    Scheduled(Uuid),
    /// The coordinator is shutting down.
    Rejected,
}

/// What happened to in-flight work during shutdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShutdownReport {
    /// True when every evaluation finished before the timeout.
    pub drained: bool,
    /// Evaluations still running when the timeout elapsed.
    pub abandoned: usize,
    pub elapsed: Duration,
}

/// The single integration point for the narrative pipeline.
pub struct AsyncEvaluationCoordinator {
    aggregator: Arc<ScoreAggregator>,
    sinks: Arc<[Arc<dyn ResultSink>]>,
    handle: Handle,
    tracker: TaskTracker,
    /// Submissions hold it shared; shutdown takes it exclusively to close the
    /// tracker, so a submission is either scheduled and tracked or rejected.
    admission: RwLock<()>,
}

impl AsyncEvaluationCoordinator {
    /// `handle` is the runtime that runs scheduled work, so `submit` can be
    /// called from synchronous code.
    pub fn new(
        aggregator: Arc<ScoreAggregator>,
        sinks: Vec<Arc<dyn ResultSink>>,
        handle: Handle,
    ) -> Self {
        Self {
            aggregator,
            sinks: sinks.into(),
            handle,
            tracker: TaskTracker::new(),
            admission: RwLock::new(()),
        }
    }

    /// Wire the aggregator and the enabled sinks from configuration.
    pub fn from_config(
        config: &EngineConfig,
        judge_provider: Option<Arc<dyn LlmProvider>>,
        handle: Handle,
    ) -> Result<Self, SinkError> {
        let aggregator = Arc::new(ScoreAggregator::from_config(config, judge_provider));
        let mut sinks: Vec<Arc<dyn ResultSink>> = Vec::new();
        if config.store.enabled {
            sinks.push(Arc::new(SqliteScoreStore::from_config(&config.store)?));
        }
        if config.trace.enabled {
            sinks.push(Arc::new(TraceFeedbackSink::from_config(&config.trace)?));
        }
        info!(
            sinks = sinks.len(),
            dimensions = aggregator.registry().len(),
            judge = aggregator.has_judge(),
            "Evaluation coordinator ready"
        );
        Ok(Self::new(aggregator, sinks, handle))
    }

    /// Schedule evaluation of `request` and return immediately.
    pub fn submit(&self, request: EvaluationRequest, trace: Option<TraceHandle>) -> SubmitOutcome {
        let _admitted = self.admission.read().unwrap_or_else(PoisonError::into_inner);
        if self.tracker.is_closed() {
            warn!(ticker = %request.ticker, date = %request.date, "Submission rejected: coordinator shut down");
            return SubmitOutcome::Rejected;
        }
        let id = Uuid::new_v4();
        debug!(%id, ticker = %request.ticker, date = %request.date, "Evaluation scheduled");

        let aggregator = Arc::clone(&self.aggregator);
        let sinks = Arc::clone(&self.sinks);
        let ticker = request.ticker.clone();
        let date = request.date;
        let work = AssertUnwindSafe(run_evaluation(aggregator, sinks, request, trace));

        self.tracker.spawn_on(
            async move {
                match work.catch_unwind().await {
                    Ok(Ok(result)) => {
                        debug!(%id, ticker = %ticker, %date, dimensions = result.scores.len(), "Evaluation complete");
                    }
                    Ok(Err(e)) => {
                        warn!(%id, ticker = %ticker, %date, error = %e, "Evaluation completed with errors");
                    }
                    Err(payload) => {
                        let e = CoordinatorError::Panicked(panic_message(payload.as_ref()));
                        error!(%id, ticker = %ticker, %date, error = %e, "Evaluation aborted");
                    }
                }
            },
            &self.handle,
        );
        SubmitOutcome::Scheduled(id)
    }

    /// Convenience form of [`submit`](Self::submit) taking the request parts.
    pub fn submit_narrative(
        &self,
        narrative: impl Into<String>,
        context: GroundTruthContext,
        ticker: impl Into<String>,
        date: NaiveDate,
        trace: Option<TraceHandle>,
    ) -> SubmitOutcome {
        self.submit(EvaluationRequest::new(narrative, context, ticker, date), trace)
    }

    /// Evaluations scheduled and not yet finished.
    pub fn in_flight(&self) -> usize {
        self.tracker.len()
    }

    pub fn is_shut_down(&self) -> bool {
        self.tracker.is_closed()
    }

    /// Stop accepting work and wait up to `timeout` for in-flight evaluations.
    ///
    /// Work still running afterwards is abandoned: it is no longer waited on
    /// and only finishes if the runtime stays alive long enough.
    pub async fn shutdown(&self, timeout: Duration) -> ShutdownReport {
        {
            let _closing = self.admission.write().unwrap_or_else(PoisonError::into_inner);
            self.tracker.close();
        }
        let started = Instant::now();
        let drained = tokio::time::timeout(timeout, self.tracker.wait())
            .await
            .is_ok();
        let report = ShutdownReport {
            drained,
            abandoned: if drained { 0 } else { self.tracker.len() },
            elapsed: started.elapsed(),
        };
        if report.drained {
            info!(elapsed_ms = report.elapsed.as_millis() as u64, "Coordinator drained");
        } else {
            warn!(
                abandoned = report.abandoned,
                timeout_secs = timeout.as_secs_f64(),
                "Coordinator shutdown timed out; abandoning in-flight evaluations"
            );
        }
        report
    }
}

/// Aggregate, then hand the result to every sink. Each sink call is its own
/// failure domain: an error or panic in one never skips the sinks after it.
async fn run_evaluation(
    aggregator: Arc<ScoreAggregator>,
    sinks: Arc<[Arc<dyn ResultSink>]>,
    request: EvaluationRequest,
    trace: Option<TraceHandle>,
) -> Result<AggregatedResult, CoordinatorError> {
    let result = aggregator.evaluate(Arc::new(request)).await;

    let mut failed = 0;
    for sink in sinks.iter() {
        let attempt = AssertUnwindSafe(sink.persist(&result, trace.as_ref()))
            .catch_unwind()
            .await;
        match attempt {
            Ok(Ok(SinkOutcome::Persisted(records))) => {
                debug!(sink = sink.name(), ticker = %result.ticker, records, "Result persisted");
            }
            Ok(Ok(SinkOutcome::Skipped(reason))) => {
                debug!(sink = sink.name(), ticker = %result.ticker, %reason, "Sink skipped");
            }
            Ok(Err(e)) => {
                failed += 1;
                warn!(sink = sink.name(), ticker = %result.ticker, date = %result.date, error = %e, "Sink failed");
            }
            Err(payload) => {
                failed += 1;
                error!(
                    sink = sink.name(),
                    ticker = %result.ticker,
                    date = %result.date,
                    panic = %panic_message(payload.as_ref()),
                    "Sink panicked"
                );
            }
        }
    }

    if failed > 0 {
        return Err(CoordinatorError::Sinks {
            failed,
            total: sinks.len(),
        });
    }
    Ok(result)
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
