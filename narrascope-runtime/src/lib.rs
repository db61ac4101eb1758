//! # Narrascope Runtime
//!
//! Background execution for narrative evaluation: the
//! [`AsyncEvaluationCoordinator`] the pipeline submits to, the [`ResultSink`]s
//! that persist scores locally and attach them to remote traces, and the
//! tracing bootstrap.

pub mod coordinator;
pub mod error;
pub mod logging;
pub mod sink;
pub mod sqlite;
pub mod trace;

pub use coordinator::{AsyncEvaluationCoordinator, ShutdownReport, SubmitOutcome};
pub use error::{CoordinatorError, SinkError};
pub use logging::init_logging;
pub use sink::{ResultSink, SinkOutcome};
pub use sqlite::{SqliteScoreStore, StoredScore};
pub use trace::{ScorePayload, TraceFeedbackSink};
