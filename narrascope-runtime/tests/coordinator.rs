//! Coordinator behaviour: non-blocking submission, sink isolation, shutdown.

use async_trait::async_trait;
use chrono::NaiveDate;
use narrascope_core::{
    AggregatedResult, Dimension, DimensionScore, DimensionScorer, EvaluationRequest,
    FaithfulnessScorer, GroundTruthContext, ScoreAggregator, ScorerError, ScorerRegistry,
    TraceHandle,
};
use narrascope_runtime::{
    AsyncEvaluationCoordinator, ResultSink, SinkError, SinkOutcome, SqliteScoreStore,
    SubmitOutcome,
};
use std::collections::BTreeMap;
use std::sync::mpsc::{Receiver, Sender, channel};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::runtime::Handle;

/// Blocks inside `score` until the test releases it.
struct GatedScorer {
    gate: Mutex<Receiver<()>>,
}

impl GatedScorer {
    fn new() -> (Self, Sender<()>) {
        let (tx, rx) = channel();
        (Self { gate: Mutex::new(rx) }, tx)
    }
}

impl DimensionScorer for GatedScorer {
    fn dimension(&self) -> Dimension {
        Dimension::Completeness
    }

    fn score(&self, _request: &EvaluationRequest) -> Result<DimensionScore, ScorerError> {
        let gate = self.gate.lock().unwrap();
        gate.recv().map_err(|_| ScorerError::failed(Dimension::Completeness, "gate dropped"))?;
        Ok(DimensionScore {
            dimension: Dimension::Completeness,
            overall: 100.0,
            sub_scores: BTreeMap::from([("gate".to_string(), 100.0)]),
            weights: BTreeMap::from([("gate".to_string(), 1.0)]),
            violations: vec![],
            strengths: vec![],
            details: BTreeMap::new(),
            failure: None,
        })
    }
}

#[derive(Default)]
struct RecordingSink {
    seen: Mutex<Vec<(AggregatedResult, Option<TraceHandle>)>>,
}

impl RecordingSink {
    fn count(&self) -> usize {
        self.seen.lock().unwrap().len()
    }
}

#[async_trait]
impl ResultSink for RecordingSink {
    fn name(&self) -> &str {
        "recording"
    }

    async fn persist(
        &self,
        result: &AggregatedResult,
        trace: Option<&TraceHandle>,
    ) -> Result<SinkOutcome, SinkError> {
        self.seen
            .lock()
            .unwrap()
            .push((result.clone(), trace.cloned()));
        Ok(SinkOutcome::Persisted(result.scores.len()))
    }
}

struct FailingSink;

#[async_trait]
impl ResultSink for FailingSink {
    fn name(&self) -> &str {
        "failing"
    }

    async fn persist(
        &self,
        _result: &AggregatedResult,
        _trace: Option<&TraceHandle>,
    ) -> Result<SinkOutcome, SinkError> {
        Err(SinkError::Storage("disk full".into()))
    }
}

struct PanickingSink;

#[async_trait]
impl ResultSink for PanickingSink {
    fn name(&self) -> &str {
        "panicking"
    }

    async fn persist(
        &self,
        _result: &AggregatedResult,
        _trace: Option<&TraceHandle>,
    ) -> Result<SinkOutcome, SinkError> {
        panic!("sink blew up");
    }
}

fn request(ticker: &str) -> EvaluationRequest {
    EvaluationRequest::new(
        "📊 Snapshot\nACME closed at $42.00 today.",
        GroundTruthContext::default(),
        ticker,
        NaiveDate::from_ymd_opt(2025, 4, 1).unwrap(),
    )
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn submit_returns_before_scoring_finishes() {
    let (scorer, release) = GatedScorer::new();
    let registry = ScorerRegistry::new().with(Arc::new(scorer));
    let sink = Arc::new(RecordingSink::default());
    let coordinator = AsyncEvaluationCoordinator::new(
        Arc::new(ScoreAggregator::new(registry)),
        vec![sink.clone()],
        Handle::current(),
    );

    let started = Instant::now();
    let outcome = coordinator.submit(request("ACME"), Some(TraceHandle::new("tr-9")));
    assert!(matches!(outcome, SubmitOutcome::Scheduled(_)));
    assert!(started.elapsed() < Duration::from_secs(1));

    // The scorer is still parked on its gate, so nothing reached the sink.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(sink.count(), 0);
    assert_eq!(coordinator.in_flight(), 1);

    release.send(()).unwrap();
    let report = coordinator.shutdown(Duration::from_secs(5)).await;
    assert!(report.drained);
    assert_eq!(sink.count(), 1);
    let seen = sink.seen.lock().unwrap();
    assert_eq!(seen[0].1, Some(TraceHandle::new("tr-9")));
    assert_eq!(seen[0].0.scores[&Dimension::Completeness].overall, 100.0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn shutdown_abandons_work_past_the_timeout() {
    let (scorer, release) = GatedScorer::new();
    let coordinator = AsyncEvaluationCoordinator::new(
        Arc::new(ScoreAggregator::new(ScorerRegistry::new().with(Arc::new(scorer)))),
        vec![],
        Handle::current(),
    );
    coordinator.submit(request("ACME"), None);

    let report = coordinator.shutdown(Duration::from_millis(50)).await;
    assert!(!report.drained);
    assert_eq!(report.abandoned, 1);
    assert_eq!(
        coordinator.submit(request("ACME"), None),
        SubmitOutcome::Rejected
    );

    // Let the blocking thread finish so the runtime can stop.
    release.send(()).unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn failing_sink_does_not_block_the_others() {
    let recording = Arc::new(RecordingSink::default());
    let coordinator = AsyncEvaluationCoordinator::new(
        Arc::new(ScoreAggregator::new(
            ScorerRegistry::new().with(Arc::new(FaithfulnessScorer::default())),
        )),
        vec![Arc::new(FailingSink), recording.clone()],
        Handle::current(),
    );
    coordinator.submit(request("ACME"), None);
    assert!(coordinator.shutdown(Duration::from_secs(5)).await.drained);
    assert_eq!(recording.count(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn panics_in_scheduled_work_stay_contained() {
    let recording = Arc::new(RecordingSink::default());
    let coordinator = AsyncEvaluationCoordinator::new(
        Arc::new(ScoreAggregator::new(
            ScorerRegistry::new().with(Arc::new(FaithfulnessScorer::default())),
        )),
        vec![recording.clone(), Arc::new(PanickingSink)],
        Handle::current(),
    );
    for ticker in ["ACME", "GLOBEX"] {
        assert!(matches!(
            coordinator.submit(request(ticker), None),
            SubmitOutcome::Scheduled(_)
        ));
    }
    assert!(coordinator.shutdown(Duration::from_secs(5)).await.drained);
    assert_eq!(recording.count(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn panicking_sink_does_not_skip_later_sinks() {
    let recording = Arc::new(RecordingSink::default());
    let coordinator = AsyncEvaluationCoordinator::new(
        Arc::new(ScoreAggregator::new(
            ScorerRegistry::new().with(Arc::new(FaithfulnessScorer::default())),
        )),
        vec![Arc::new(PanickingSink), Arc::new(FailingSink), recording.clone()],
        Handle::current(),
    );
    coordinator.submit(request("ACME"), Some(TraceHandle::new("tr-1")));
    assert!(coordinator.shutdown(Duration::from_secs(5)).await.drained);
    assert_eq!(recording.count(), 1);
    assert_eq!(
        recording.seen.lock().unwrap()[0].1,
        Some(TraceHandle::new("tr-1"))
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn submissions_racing_shutdown_are_run_or_rejected() {
    let recording = Arc::new(RecordingSink::default());
    let coordinator = Arc::new(AsyncEvaluationCoordinator::new(
        Arc::new(ScoreAggregator::new(
            ScorerRegistry::new().with(Arc::new(FaithfulnessScorer::default())),
        )),
        vec![recording.clone()],
        Handle::current(),
    ));
    let submitters: Vec<_> = (0..4)
        .map(|_| {
            let coordinator = Arc::clone(&coordinator);
            std::thread::spawn(move || {
                let mut scheduled = 0usize;
                for _ in 0..200 {
                    match coordinator.submit(request("ACME"), None) {
                        SubmitOutcome::Scheduled(_) => scheduled += 1,
                        SubmitOutcome::Rejected => break,
                    }
                    std::thread::sleep(Duration::from_millis(1));
                }
                scheduled
            })
        })
        .collect();

    tokio::time::sleep(Duration::from_millis(20)).await;
    let report = coordinator.shutdown(Duration::from_secs(10)).await;
    let scheduled: usize = submitters.into_iter().map(|h| h.join().unwrap()).sum();

    assert!(report.drained);
    assert_eq!(recording.count(), scheduled);
    assert_eq!(coordinator.submit(request("ACME"), None), SubmitOutcome::Rejected);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn concurrent_submissions_upsert_last_write_wins() {
    let dir = tempfile::TempDir::new().unwrap();
    let store = Arc::new(
        SqliteScoreStore::open(dir.path().join("scores.db"), Duration::from_secs(5)).unwrap(),
    );
    let coordinator = AsyncEvaluationCoordinator::new(
        Arc::new(ScoreAggregator::new(
            ScorerRegistry::new().with(Arc::new(FaithfulnessScorer::default())),
        )),
        vec![store.clone()],
        Handle::current(),
    );
    for _ in 0..4 {
        coordinator.submit(request("ACME"), None);
    }
    assert!(coordinator.shutdown(Duration::from_secs(10)).await.drained);

    let history = store
        .history(Dimension::Faithfulness, "ACME")
        .await
        .unwrap();
    assert_eq!(history.len(), 1);
}

#[test]
fn submit_works_from_synchronous_code() {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(1)
        .enable_all()
        .build()
        .unwrap();
    let recording = Arc::new(RecordingSink::default());
    let coordinator = AsyncEvaluationCoordinator::new(
        Arc::new(ScoreAggregator::new(
            ScorerRegistry::new().with(Arc::new(FaithfulnessScorer::default())),
        )),
        vec![recording.clone()],
        runtime.handle().clone(),
    );

    let outcome = coordinator.submit(request("ACME"), None);
    assert!(matches!(outcome, SubmitOutcome::Scheduled(_)));
    let report = runtime.block_on(coordinator.shutdown(Duration::from_secs(5)));
    assert!(report.drained);
    assert_eq!(recording.count(), 1);
}
