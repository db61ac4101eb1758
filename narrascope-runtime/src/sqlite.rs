//! Local durable score store backed by SQLite.
//!
//! One table per dimension, keyed by `(ticker, date)`. Writes are upserts, so
//! re-evaluating the same narrative overwrites the previous row. All database
//! work runs on the blocking pool.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use narrascope_core::config::StoreConfig;
use narrascope_core::{AggregatedResult, Dimension, JudgeVerdict, TraceHandle};
use rusqlite::{Connection, OptionalExtension, params};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, info};

use crate::error::SinkError;
use crate::sink::{ResultSink, SinkOutcome};

const DATE_FORMAT: &str = "%Y-%m-%d";

/// One persisted dimension score.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredScore {
    pub ticker: String,
    pub date: NaiveDate,
    pub overall: f64,
    pub sub_scores: BTreeMap<String, f64>,
    pub violations: Vec<String>,
    pub strengths: Vec<String>,
    pub details: BTreeMap<String, f64>,
    pub failure: Option<String>,
    pub evaluated_at: DateTime<Utc>,
}

struct RawRow {
    ticker: String,
    date: String,
    overall: f64,
    sub_scores: String,
    violations: String,
    strengths: String,
    details: String,
    failure: Option<String>,
    evaluated_at: String,
}

impl RawRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            ticker: row.get(0)?,
            date: row.get(1)?,
            overall: row.get(2)?,
            sub_scores: row.get(3)?,
            violations: row.get(4)?,
            strengths: row.get(5)?,
            details: row.get(6)?,
            failure: row.get(7)?,
            evaluated_at: row.get(8)?,
        })
    }

    fn decode(self) -> Result<StoredScore, SinkError> {
        Ok(StoredScore {
            date: parse_date(&self.date)?,
            evaluated_at: DateTime::parse_from_rfc3339(&self.evaluated_at)
                .map_err(|e| {
                    SinkError::Storage(format!("bad evaluated_at '{}': {e}", self.evaluated_at))
                })?
                .with_timezone(&Utc),
            ticker: self.ticker,
            overall: self.overall,
            sub_scores: serde_json::from_str(&self.sub_scores)?,
            violations: serde_json::from_str(&self.violations)?,
            strengths: serde_json::from_str(&self.strengths)?,
            details: serde_json::from_str(&self.details)?,
            failure: self.failure,
        })
    }
}

fn parse_date(raw: &str) -> Result<NaiveDate, SinkError> {
    NaiveDate::parse_from_str(raw, DATE_FORMAT)
        .map_err(|e| SinkError::Storage(format!("bad date '{raw}': {e}")))
}

/// SQLite-backed [`ResultSink`].
#[derive(Clone)]
pub struct SqliteScoreStore {
    conn: Arc<Mutex<Connection>>,
    path: PathBuf,
}

impl SqliteScoreStore {
    /// Open (or create) the store at `path` and ensure the schema exists.
    pub fn open(path: impl AsRef<Path>, busy_timeout: Duration) -> Result<Self, SinkError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| {
                SinkError::Storage(format!("cannot create {}: {e}", parent.display()))
            })?;
        }
        let conn = Connection::open(&path)?;
        conn.busy_timeout(busy_timeout)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        Self::create_schema(&conn)?;
        info!(path = %path.display(), "Score store opened");
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path,
        })
    }

    pub fn from_config(config: &StoreConfig) -> Result<Self, SinkError> {
        Self::open(&config.path, Duration::from_millis(config.busy_timeout_ms))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn create_schema(conn: &Connection) -> Result<(), SinkError> {
        for dimension in Dimension::ALL {
            conn.execute_batch(&format!(
                "CREATE TABLE IF NOT EXISTS {table} (
                    ticker          TEXT NOT NULL,
                    date            TEXT NOT NULL,
                    overall_score   REAL NOT NULL,
                    sub_scores_json TEXT NOT NULL,
                    violations_json TEXT NOT NULL,
                    strengths_json  TEXT NOT NULL,
                    details_json    TEXT NOT NULL,
                    failure         TEXT,
                    evaluated_at    TEXT NOT NULL,
                    PRIMARY KEY (ticker, date)
                );",
                table = dimension.table_name()
            ))?;
        }
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS judge_verdicts (
                ticker                TEXT NOT NULL,
                date                  TEXT NOT NULL,
                score                 REAL NOT NULL,
                confidence            REAL NOT NULL,
                hallucinations_json   TEXT NOT NULL,
                validated_claims_json TEXT NOT NULL,
                reasoning             TEXT NOT NULL,
                agreement_level       TEXT,
                agreement_delta       REAL,
                evaluated_at          TEXT NOT NULL,
                PRIMARY KEY (ticker, date)
            );",
        )?;
        Ok(())
    }

    fn lock(conn: &Mutex<Connection>) -> Result<MutexGuard<'_, Connection>, SinkError> {
        conn.lock()
            .map_err(|_| SinkError::Storage("connection lock poisoned".to_string()))
    }

    fn write(conn: &mut Connection, result: &AggregatedResult) -> Result<usize, SinkError> {
        let date = result.date.format(DATE_FORMAT).to_string();
        let evaluated_at = result.evaluated_at.to_rfc3339();
        let tx = conn.transaction()?;
        let mut written = 0;
        for (dimension, score) in &result.scores {
            tx.execute(
                &format!(
                    "INSERT INTO {table} (ticker, date, overall_score, sub_scores_json, violations_json,
                        strengths_json, details_json, failure, evaluated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                     ON CONFLICT(ticker, date) DO UPDATE SET
                        overall_score = excluded.overall_score,
                        sub_scores_json = excluded.sub_scores_json,
                        violations_json = excluded.violations_json,
                        strengths_json = excluded.strengths_json,
                        details_json = excluded.details_json,
                        failure = excluded.failure,
                        evaluated_at = excluded.evaluated_at",
                    table = dimension.table_name()
                ),
                params![
                    result.ticker,
                    date,
                    score.overall,
                    serde_json::to_string(&score.sub_scores)?,
                    serde_json::to_string(&score.violations)?,
                    serde_json::to_string(&score.strengths)?,
                    serde_json::to_string(&score.details)?,
                    score.failure,
                    evaluated_at,
                ],
            )?;
            written += 1;
        }
        if let Some(verdict) = &result.judge {
            let level = result
                .agreement
                .map(|a| serde_json::to_value(a.level))
                .transpose()?
                .and_then(|v| v.as_str().map(str::to_string));
            tx.execute(
                "INSERT INTO judge_verdicts (ticker, date, score, confidence, hallucinations_json,
                    validated_claims_json, reasoning, agreement_level, agreement_delta, evaluated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
                 ON CONFLICT(ticker, date) DO UPDATE SET
                    score = excluded.score,
                    confidence = excluded.confidence,
                    hallucinations_json = excluded.hallucinations_json,
                    validated_claims_json = excluded.validated_claims_json,
                    reasoning = excluded.reasoning,
                    agreement_level = excluded.agreement_level,
                    agreement_delta = excluded.agreement_delta,
                    evaluated_at = excluded.evaluated_at",
                params![
                    result.ticker,
                    date,
                    verdict.score,
                    verdict.confidence,
                    serde_json::to_string(&verdict.hallucinations)?,
                    serde_json::to_string(&verdict.validated_claims)?,
                    verdict.reasoning,
                    level,
                    result.agreement.map(|a| a.delta),
                    evaluated_at,
                ],
            )?;
            written += 1;
        }
        tx.commit()?;
        Ok(written)
    }

    /// Upsert every score in `result`. Returns the number of rows written.
    pub async fn upsert(&self, result: &AggregatedResult) -> Result<usize, SinkError> {
        let conn = Arc::clone(&self.conn);
        let result = result.clone();
        tokio::task::spawn_blocking(move || -> Result<usize, SinkError> {
            let mut guard = Self::lock(&conn)?;
            Self::write(&mut guard, &result)
        })
        .await?
    }

    /// The stored score for one dimension on one day.
    pub async fn fetch(
        &self,
        dimension: Dimension,
        ticker: &str,
        date: NaiveDate,
    ) -> Result<Option<StoredScore>, SinkError> {
        let conn = Arc::clone(&self.conn);
        let ticker = ticker.to_string();
        let date = date.format(DATE_FORMAT).to_string();
        tokio::task::spawn_blocking(move || -> Result<Option<StoredScore>, SinkError> {
            let guard = Self::lock(&conn)?;
            let raw = guard
                .query_row(
                    &format!(
                        "SELECT ticker, date, overall_score, sub_scores_json, violations_json,
                            strengths_json, details_json, failure, evaluated_at
                         FROM {} WHERE ticker = ?1 AND date = ?2",
                        dimension.table_name()
                    ),
                    params![ticker, date],
                    RawRow::from_row,
                )
                .optional()?;
            raw.map(RawRow::decode).transpose()
        })
        .await?
    }

    /// All stored scores for one dimension and ticker, oldest first.
    pub async fn history(
        &self,
        dimension: Dimension,
        ticker: &str,
    ) -> Result<Vec<StoredScore>, SinkError> {
        let conn = Arc::clone(&self.conn);
        let ticker = ticker.to_string();
        tokio::task::spawn_blocking(move || -> Result<Vec<StoredScore>, SinkError> {
            let guard = Self::lock(&conn)?;
            let mut stmt = guard.prepare(&format!(
                "SELECT ticker, date, overall_score, sub_scores_json, violations_json,
                    strengths_json, details_json, failure, evaluated_at
                 FROM {} WHERE ticker = ?1 ORDER BY date ASC",
                dimension.table_name()
            ))?;
            let rows = stmt
                .query_map(params![ticker], RawRow::from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            rows.into_iter().map(RawRow::decode).collect()
        })
        .await?
    }

    /// The stored judge verdict for one day, if the judge ran.
    pub async fn fetch_verdict(
        &self,
        ticker: &str,
        date: NaiveDate,
    ) -> Result<Option<JudgeVerdict>, SinkError> {
        let conn = Arc::clone(&self.conn);
        let ticker = ticker.to_string();
        let date = date.format(DATE_FORMAT).to_string();
        tokio::task::spawn_blocking(move || -> Result<Option<JudgeVerdict>, SinkError> {
            let guard = Self::lock(&conn)?;
            let raw = guard
                .query_row(
                    "SELECT score, confidence, hallucinations_json, validated_claims_json, reasoning
                     FROM judge_verdicts WHERE ticker = ?1 AND date = ?2",
                    params![ticker, date],
                    |row| {
                        Ok((
                            row.get::<_, f64>(0)?,
                            row.get::<_, f64>(1)?,
                            row.get::<_, String>(2)?,
                            row.get::<_, String>(3)?,
                            row.get::<_, String>(4)?,
                        ))
                    },
                )
                .optional()?;
            raw.map(|(score, confidence, hallucinations, validated, reasoning)| {
                Ok(JudgeVerdict {
                    score,
                    confidence,
                    hallucinations: serde_json::from_str(&hallucinations)?,
                    validated_claims: serde_json::from_str(&validated)?,
                    reasoning,
                })
            })
            .transpose()
        })
        .await?
    }
}

#[async_trait]
impl ResultSink for SqliteScoreStore {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn persist(
        &self,
        result: &AggregatedResult,
        _trace: Option<&TraceHandle>,
    ) -> Result<SinkOutcome, SinkError> {
        let written = self.upsert(result).await?;
        debug!(ticker = %result.ticker, date = %result.date, rows = written, "Scores upserted");
        Ok(SinkOutcome::Persisted(written))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use narrascope_core::DimensionScore;
    use tempfile::TempDir;

    fn score(dimension: Dimension, overall: f64) -> DimensionScore {
        DimensionScore {
            dimension,
            overall,
            sub_scores: BTreeMap::from([("check".to_string(), overall)]),
            weights: BTreeMap::from([("check".to_string(), 1.0)]),
            violations: vec![],
            strengths: vec!["fine".into()],
            details: BTreeMap::new(),
            failure: None,
        }
    }

    fn result(overall: f64) -> AggregatedResult {
        AggregatedResult {
            ticker: "ACME".into(),
            date: NaiveDate::from_ymd_opt(2025, 3, 14).unwrap(),
            scores: BTreeMap::from([
                (Dimension::Faithfulness, score(Dimension::Faithfulness, overall)),
                (
                    Dimension::Compliance,
                    DimensionScore::placeholder(Dimension::Compliance, "boom"),
                ),
            ]),
            judge: None,
            agreement: None,
            evaluated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_open_creates_parent_dirs() {
        let dir = TempDir::new().unwrap();
        let store = SqliteScoreStore::open(dir.path().join("nested/scores.db"), Duration::from_secs(1))
            .unwrap();
        assert!(store.path().exists());
    }

    #[tokio::test]
    async fn test_persist_and_fetch() {
        let dir = TempDir::new().unwrap();
        let store = SqliteScoreStore::open(dir.path().join("scores.db"), Duration::from_secs(1)).unwrap();
        let r = result(82.5);
        assert_eq!(store.persist(&r, None).await.unwrap(), SinkOutcome::Persisted(2));

        let stored = store
            .fetch(Dimension::Faithfulness, "ACME", r.date)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.overall, 82.5);
        assert_eq!(stored.strengths, vec!["fine".to_string()]);

        let failed = store
            .fetch(Dimension::Compliance, "ACME", r.date)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(failed.failure.as_deref(), Some("boom"));
        assert!(
            store
                .fetch(Dimension::Qos, "ACME", r.date)
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn test_judge_verdict_row() {
        let dir = TempDir::new().unwrap();
        let store = SqliteScoreStore::open(dir.path().join("scores.db"), Duration::from_secs(1)).unwrap();
        let mut r = result(70.0);
        r.judge = Some(JudgeVerdict {
            score: 64.0,
            confidence: 80.0,
            hallucinations: vec!["merger".into()],
            validated_claims: vec![],
            reasoning: "one invented event".into(),
        });
        assert_eq!(store.upsert(&r).await.unwrap(), 3);
        let verdict = store.fetch_verdict("ACME", r.date).await.unwrap().unwrap();
        assert_eq!(verdict, r.judge.unwrap());
    }
}
