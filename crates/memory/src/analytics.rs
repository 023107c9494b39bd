//! Retrieval telemetry and health assessment.
//!
//! Every context build and note search logs a [`QueryMetrics`] record.
//! Records are append-only; [`RetrievalAnalytics`] aggregates a time window
//! into [`AggregatedMetrics`] and classifies it with fixed thresholds.
//!
//! Logging never waits on storage: records are handed to a background writer
//! task, and reads flush that writer first.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use parley_common::Result;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};
use uuid::Uuid;

/// Mean latency above this degrades health.
pub const MAX_MEAN_LATENCY_MS: f64 = 500.0;
/// 95th percentile latency above this degrades health.
pub const MAX_P95_LATENCY_MS: f64 = 1000.0;
/// Mean relevance below this degrades health, given enough samples.
pub const MIN_MEAN_RELEVANCE: f64 = 0.5;
/// Cache hit rate (percent) below this only warns.
pub const MIN_CACHE_HIT_RATE: f64 = 30.0;
/// Queries needed before relevance and hit rate are judged.
pub const MIN_SAMPLES: usize = 10;

/// Records queued for the writer before new ones are dropped.
const PENDING_RECORDS: usize = 1024;

/// Size at which the JSON-lines log is rotated.
pub const DEFAULT_METRICS_ROTATE_BYTES: u64 = 8 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryType {
    /// Relevant-history retrieval while building a conversation context
    Context,
    NoteSearch,
}

/// Timing and quality of one retrieval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryMetrics {
    pub query_id: Uuid,
    pub user_id: String,
    pub query_type: QueryType,
    pub timestamp: DateTime<Utc>,
    pub latency_ms: f64,
    pub embedding_ms: f64,
    pub search_ms: f64,
    pub result_count: usize,
    /// Query embedding (or whole result) served from cache
    pub cache_hit: bool,
    /// Mean score of returned results, absent when nothing was returned
    pub relevance_score: Option<f32>,
}

impl QueryMetrics {
    pub fn new(user_id: impl Into<String>, query_type: QueryType) -> Self {
        Self {
            query_id: Uuid::new_v4(),
            user_id: user_id.into(),
            query_type,
            timestamp: Utc::now(),
            latency_ms: 0.0,
            embedding_ms: 0.0,
            search_ms: 0.0,
            result_count: 0,
            cache_hit: false,
            relevance_score: None,
        }
    }

    /// Record result count and mean relevance from result scores.
    pub fn with_scores(mut self, scores: &[f32]) -> Self {
        self.result_count = scores.len();
        self.relevance_score = if scores.is_empty() {
            None
        } else {
            Some(scores.iter().sum::<f32>() / scores.len() as f32)
        };
        self
    }
}

/// Aggregate over a time window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregatedMetrics {
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    pub total_queries: usize,
    pub avg_latency_ms: f64,
    pub p95_latency_ms: f64,
    /// Percentage of queries served from cache
    pub cache_hit_rate: f64,
    pub avg_result_count: f64,
    /// Mean over queries that reported a relevance score
    pub avg_relevance_score: Option<f64>,
    pub relevance_samples: usize,
    pub queries_by_type: BTreeMap<QueryType, usize>,
}

impl AggregatedMetrics {
    pub fn empty(period_start: DateTime<Utc>, period_end: DateTime<Utc>) -> Self {
        Self {
            period_start,
            period_end,
            total_queries: 0,
            avg_latency_ms: 0.0,
            p95_latency_ms: 0.0,
            cache_hit_rate: 0.0,
            avg_result_count: 0.0,
            avg_relevance_score: None,
            relevance_samples: 0,
            queries_by_type: BTreeMap::new(),
        }
    }

    /// Aggregate `records`. Records outside the window are not filtered here.
    pub fn from_records(period_start: DateTime<Utc>, period_end: DateTime<Utc>, records: &[QueryMetrics]) -> Self {
        let mut aggregated = Self::empty(period_start, period_end);
        if records.is_empty() {
            return aggregated;
        }

        let n = records.len() as f64;
        let mut latencies: Vec<f64> = records.iter().map(|m| m.latency_ms).collect();
        latencies.sort_by(f64::total_cmp);

        // Nearest-rank percentile
        let rank = ((0.95 * latencies.len() as f64).ceil() as usize).max(1);
        let relevance: Vec<f64> = records
            .iter()
            .filter_map(|m| m.relevance_score.map(f64::from))
            .collect();

        aggregated.total_queries = records.len();
        aggregated.avg_latency_ms = latencies.iter().sum::<f64>() / n;
        aggregated.p95_latency_ms = latencies[rank - 1];
        aggregated.cache_hit_rate = records.iter().filter(|m| m.cache_hit).count() as f64 / n * 100.0;
        aggregated.avg_result_count = records.iter().map(|m| m.result_count as f64).sum::<f64>() / n;
        aggregated.relevance_samples = relevance.len();
        aggregated.avg_relevance_score = if relevance.is_empty() {
            None
        } else {
            Some(relevance.iter().sum::<f64>() / relevance.len() as f64)
        };
        for record in records {
            *aggregated.queries_by_type.entry(record.query_type).or_insert(0) += 1;
        }

        aggregated
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    /// Threshold violations that degrade status
    pub issues: Vec<String>,
    /// Observations that do not affect status
    pub warnings: Vec<String>,
}

impl HealthReport {
    pub fn is_healthy(&self) -> bool {
        self.status == HealthStatus::Healthy
    }
}

/// Append-only storage for query metrics.
#[async_trait]
pub trait MetricsStore: Send + Sync {
    async fn append(&self, metrics: &QueryMetrics) -> Result<()>;

    /// Records with `start <= timestamp < end`, optionally for one user.
    async fn query(&self, start: DateTime<Utc>, end: DateTime<Utc>, user_id: Option<&str>) -> Result<Vec<QueryMetrics>>;
}

fn in_window(m: &QueryMetrics, start: DateTime<Utc>, end: DateTime<Utc>, user_id: Option<&str>) -> bool {
    m.timestamp >= start && m.timestamp < end && user_id.map_or(true, |u| m.user_id == u)
}

/// Bounded in-memory ring; the oldest records are dropped first.
pub struct MemoryMetricsStore {
    records: Mutex<VecDeque<QueryMetrics>>,
    capacity: usize,
}

impl MemoryMetricsStore {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            records: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
            capacity,
        }
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }
}

#[async_trait]
impl MetricsStore for MemoryMetricsStore {
    async fn append(&self, metrics: &QueryMetrics) -> Result<()> {
        let mut records = self.records.lock();
        if records.len() == self.capacity {
            records.pop_front();
        }
        records.push_back(metrics.clone());
        Ok(())
    }

    async fn query(&self, start: DateTime<Utc>, end: DateTime<Utc>, user_id: Option<&str>) -> Result<Vec<QueryMetrics>> {
        Ok(self
            .records
            .lock()
            .iter()
            .filter(|m| in_window(m, start, end, user_id))
            .cloned()
            .collect())
    }
}

/// JSON-lines file, one record per line.
///
/// Once the file reaches `rotate_bytes` it is renamed to `<path>.1`,
/// replacing the previous generation, so reads cover at most two files.
pub struct JsonlMetricsStore {
    path: PathBuf,
    rotated: PathBuf,
    rotate_bytes: u64,
    write_lock: tokio::sync::Mutex<()>,
}

impl JsonlMetricsStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        let mut rotated = path.clone().into_os_string();
        rotated.push(".1");
        Self {
            path,
            rotated: PathBuf::from(rotated),
            rotate_bytes: DEFAULT_METRICS_ROTATE_BYTES,
            write_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn with_rotate_bytes(mut self, bytes: u64) -> Self {
        self.rotate_bytes = bytes.max(1);
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn rotate_if_full(&self) -> Result<()> {
        match fs::metadata(&self.path).await {
            Ok(meta) if meta.len() >= self.rotate_bytes => {
                fs::rename(&self.path, &self.rotated).await?;
                debug!(path = %self.path.display(), "Rotated metrics log");
                Ok(())
            }
            Ok(_) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn read_lines(path: &Path) -> Result<Option<String>> {
        match fs::read_to_string(path).await {
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl MetricsStore for JsonlMetricsStore {
    async fn append(&self, metrics: &QueryMetrics) -> Result<()> {
        let mut line = serde_json::to_string(metrics)?;
        line.push('\n');

        let _guard = self.write_lock.lock().await;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await?;
        }
        self.rotate_if_full().await?;
        let mut file = OpenOptions::new().create(true).append(true).open(&self.path).await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }

    async fn query(&self, start: DateTime<Utc>, end: DateTime<Utc>, user_id: Option<&str>) -> Result<Vec<QueryMetrics>> {
        let mut records = Vec::new();
        for path in [&self.rotated, &self.path] {
            let Some(contents) = Self::read_lines(path).await? else {
                continue;
            };
            for (line_no, line) in contents.lines().enumerate() {
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<QueryMetrics>(line) {
                    Ok(m) if in_window(&m, start, end, user_id) => records.push(m),
                    Ok(_) => {}
                    Err(e) => warn!(
                        path = %path.display(),
                        line = line_no + 1,
                        error = %e,
                        "Skipping malformed metrics line"
                    ),
                }
            }
        }
        Ok(records)
    }
}

enum WriterCommand {
    Record(QueryMetrics),
    Flush(oneshot::Sender<()>),
}

async fn record(store: &dyn MetricsStore, metrics: &QueryMetrics) {
    match store.append(metrics).await {
        Ok(()) => debug!(
            query_id = %metrics.query_id,
            query_type = ?metrics.query_type,
            latency_ms = metrics.latency_ms,
            results = metrics.result_count,
            cache_hit = metrics.cache_hit,
            "Logged retrieval metrics"
        ),
        Err(e) => warn!(error = %e, "Failed to record retrieval metrics"),
    }
}

async fn run_writer(store: Arc<dyn MetricsStore>, mut commands: mpsc::Receiver<WriterCommand>) {
    while let Some(command) = commands.recv().await {
        match command {
            WriterCommand::Record(metrics) => record(store.as_ref(), &metrics).await,
            WriterCommand::Flush(done) => {
                let _ = done.send(());
            }
        }
    }
}

/// Logs query metrics and reports on them.
pub struct RetrievalAnalytics {
    store: Arc<dyn MetricsStore>,
    writer: OnceLock<mpsc::Sender<WriterCommand>>,
}

impl RetrievalAnalytics {
    pub fn new(store: Arc<dyn MetricsStore>) -> Self {
        Self {
            store,
            writer: OnceLock::new(),
        }
    }

    /// The writer task's queue, spawned on first use inside a runtime.
    fn writer(&self) -> Option<&mpsc::Sender<WriterCommand>> {
        if let Some(writer) = self.writer.get() {
            return Some(writer);
        }
        let runtime = tokio::runtime::Handle::try_current().ok()?;
        Some(self.writer.get_or_init(|| {
            let (tx, rx) = mpsc::channel(PENDING_RECORDS);
            runtime.spawn(run_writer(self.store.clone(), rx));
            tx
        }))
    }

    /// Queue one query record and return immediately.
    ///
    /// Storage failures and a full queue are logged, never returned.
    pub fn log_query(&self, metrics: QueryMetrics) {
        let Some(writer) = self.writer() else {
            warn!(query_id = %metrics.query_id, "No async runtime; retrieval metrics dropped");
            return;
        };
        if let Err(e) = writer.try_send(WriterCommand::Record(metrics)) {
            warn!(error = %e, "Retrieval metrics dropped");
        }
    }

    /// Wait until every record queued so far has reached the store.
    pub async fn flush(&self) {
        let Some(writer) = self.writer.get() else {
            return;
        };
        let (done, written) = oneshot::channel();
        if writer.send(WriterCommand::Flush(done)).await.is_ok() {
            let _ = written.await;
        }
    }

    /// Aggregate metrics for `start <= t < end`. An unreadable store yields an empty aggregate.
    pub async fn get_metrics_for_period(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        user_id: Option<&str>,
    ) -> AggregatedMetrics {
        self.flush().await;
        match self.store.query(start, end, user_id).await {
            Ok(records) => AggregatedMetrics::from_records(start, end, &records),
            Err(e) => {
                warn!(error = %e, "Failed to read retrieval metrics");
                AggregatedMetrics::empty(start, end)
            }
        }
    }

    /// Aggregate the trailing `minutes`.
    pub async fn recent(&self, minutes: i64, user_id: Option<&str>) -> AggregatedMetrics {
        let end = Utc::now();
        let start = end - chrono::Duration::minutes(minutes.max(1));
        // Include records logged in the same instant as `end`
        self.get_metrics_for_period(start, end + chrono::Duration::milliseconds(1), user_id)
            .await
    }

    /// Classify aggregated metrics against the fixed thresholds.
    pub fn assess_health(metrics: &AggregatedMetrics) -> HealthReport {
        let mut issues = Vec::new();
        let mut warnings = Vec::new();
        let enough_samples = metrics.total_queries >= MIN_SAMPLES;

        if metrics.avg_latency_ms > MAX_MEAN_LATENCY_MS {
            issues.push(format!(
                "Mean latency {:.0}ms exceeds {:.0}ms",
                metrics.avg_latency_ms, MAX_MEAN_LATENCY_MS
            ));
        }
        if metrics.p95_latency_ms > MAX_P95_LATENCY_MS {
            issues.push(format!(
                "P95 latency {:.0}ms exceeds {:.0}ms",
                metrics.p95_latency_ms, MAX_P95_LATENCY_MS
            ));
        }
        if let Some(relevance) = metrics.avg_relevance_score {
            if enough_samples && relevance < MIN_MEAN_RELEVANCE {
                issues.push(format!(
                    "Mean relevance {relevance:.2} below {MIN_MEAN_RELEVANCE:.2}"
                ));
            }
        }
        if enough_samples && metrics.cache_hit_rate < MIN_CACHE_HIT_RATE {
            warnings.push(format!(
                "Cache hit rate {:.1}% below {:.0}%",
                metrics.cache_hit_rate, MIN_CACHE_HIT_RATE
            ));
        }

        HealthReport {
            status: if issues.is_empty() {
                HealthStatus::Healthy
            } else {
                HealthStatus::Degraded
            },
            issues,
            warnings,
        }
    }
}
