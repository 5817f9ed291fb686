//! Chunked, retrying multi-path updates against the tree store.
//!
//! A large set of independent `path -> value` writes is split into ordered
//! batches; each batch goes to the store as one multi-location update and is
//! retried with backoff on failure. Outcomes are reported in a [`RunSummary`],
//! never raised: callers check `chunks_fail` to detect partial failure.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use std::env;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::UpdateSettings;
use crate::path::{sanitize_key, sanitize_path, StorePath};
use crate::store::TreeStore;

const DRY_RUN_PREVIEW: usize = 10;
const MAX_CHUNK_DETAILS: usize = 200;
const PREVIEW_VALUE_CHARS: usize = 220;

/// Ordered set of store writes keyed by sanitized path.
///
/// Inserting a path twice keeps the original position and the latest value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpdateSet {
    entries: Map<String, Value>,
}

impl UpdateSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a write. The path and every object key inside `value` are sanitized.
    pub fn insert(&mut self, path: impl AsRef<str>, value: impl Into<Value>) {
        let path = sanitize_path(path.as_ref());
        self.entries.insert(path, sanitize_value_keys(value.into()));
    }

    pub fn insert_at(&mut self, path: &StorePath, value: impl Into<Value>) {
        self.entries
            .insert(path.to_string(), sanitize_value_keys(value.into()));
    }

    pub fn extend(&mut self, other: UpdateSet) {
        for (k, v) in other.entries {
            self.entries.insert(k, v);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, path: &str) -> Option<&Value> {
        self.entries.get(path)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.entries.iter()
    }

    /// Split into batches of at most `size` pairs, preserving insertion order.
    pub fn chunks(&self, size: usize) -> Vec<Map<String, Value>> {
        let size = size.max(1);
        let mut out = Vec::with_capacity(self.entries.len().div_ceil(size));
        let mut current = Map::new();
        for (k, v) in &self.entries {
            current.insert(k.clone(), v.clone());
            if current.len() == size {
                out.push(std::mem::take(&mut current));
            }
        }
        if !current.is_empty() {
            out.push(current);
        }
        out
    }

    /// `path => value` lines for the first `limit` pairs, long values truncated.
    pub fn preview_lines(&self, limit: usize) -> Vec<String> {
        self.entries
            .iter()
            .take(limit)
            .map(|(k, v)| {
                let rendered = match v {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                if rendered.chars().count() > PREVIEW_VALUE_CHARS {
                    let cut: String = rendered.chars().take(PREVIEW_VALUE_CHARS).collect();
                    format!("{} => {}...", k, cut)
                } else {
                    format!("{} => {}", k, rendered)
                }
            })
            .collect()
    }
}

impl<K: AsRef<str>, V: Into<Value>> FromIterator<(K, V)> for UpdateSet {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut set = UpdateSet::new();
        for (k, v) in iter {
            set.insert(k, v);
        }
        set
    }
}

fn sanitize_value_keys(value: Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(k, v)| (sanitize_key(Some(&k)), sanitize_value_keys(v)))
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.into_iter().map(sanitize_value_keys).collect()),
        other => other,
    }
}

/// Per-call overrides of the engine settings.
#[derive(Debug, Clone, Default)]
pub struct UpdateOptions {
    pub chunk_size: Option<usize>,
    pub dry_run: bool,
    pub metrics_path: Option<String>,
    pub continue_on_error: Option<bool>,
}

impl UpdateOptions {
    pub fn dry_run(dry_run: bool) -> Self {
        Self {
            dry_run,
            ..Self::default()
        }
    }
}

/// Outcome of one batch.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChunkResult {
    pub chunk_index: usize,
    pub keys: usize,
    pub attempts: u32,
    pub duration_s: f64,
    pub ok: bool,
    pub error: Option<String>,
}

/// CI variables recorded with each run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CiEnv {
    #[serde(rename = "GITHUB_RUN_ID")]
    pub run_id: Option<String>,
    #[serde(rename = "GITHUB_RUN_NUMBER")]
    pub run_number: Option<String>,
    #[serde(rename = "GITHUB_WORKFLOW")]
    pub workflow: Option<String>,
    #[serde(rename = "GITHUB_JOB")]
    pub job: Option<String>,
    #[serde(rename = "GITHUB_SHA")]
    pub sha: Option<String>,
    #[serde(rename = "GITHUB_REF")]
    pub git_ref: Option<String>,
    #[serde(rename = "GITHUB_REPOSITORY")]
    pub repository: Option<String>,
}

impl CiEnv {
    pub fn from_env() -> Self {
        let var = |k: &str| env::var(k).ok().filter(|v| !v.is_empty());
        Self {
            run_id: var("GITHUB_RUN_ID"),
            run_number: var("GITHUB_RUN_NUMBER"),
            workflow: var("GITHUB_WORKFLOW"),
            job: var("GITHUB_JOB"),
            sha: var("GITHUB_SHA"),
            git_ref: var("GITHUB_REF"),
            repository: var("GITHUB_REPOSITORY"),
        }
    }
}

/// Where and when a run happened.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunContext {
    pub run_id: Uuid,
    pub hostname: String,
    pub pid: u32,
    pub time_utc: DateTime<Utc>,
    pub env: CiEnv,
}

impl RunContext {
    pub fn capture() -> Self {
        Self {
            run_id: Uuid::new_v4(),
            hostname: hostname(),
            pid: std::process::id(),
            time_utc: Utc::now(),
            env: CiEnv::from_env(),
        }
    }

    /// External job id when running in CI, otherwise a local timestamp id.
    pub fn job_id(&self) -> String {
        match &self.env.run_id {
            Some(id) => id.clone(),
            None => format!("local-{}", self.time_utc.timestamp()),
        }
    }
}

fn hostname() -> String {
    env::var("HOSTNAME")
        .or_else(|_| env::var("COMPUTERNAME"))
        .ok()
        .or_else(|| std::fs::read_to_string("/etc/hostname").ok())
        .map(|h| h.trim().to_string())
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| "unknown-host".to_string())
}

/// Aggregate over all batches of one `update_multi` call.
///
/// `chunks_ok + chunks_fail == chunks_total` and
/// `retries_used == sum(attempts - 1)` hold for every summary.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunSummary {
    pub keys_total: usize,
    pub keys_written: usize,
    pub chunk_size: usize,
    pub chunks_total: usize,
    pub chunks_ok: usize,
    pub chunks_fail: usize,
    pub retries_used: u32,
    pub duration_s: f64,
    pub dry_run: bool,
    /// Batches a dry run would have sent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chunks_planned: Option<usize>,
    /// Remaining batches were skipped after a failure.
    pub aborted: bool,
    pub time_utc: DateTime<Utc>,
    pub context: Option<RunContext>,
    #[serde(skip)]
    pub chunk_metrics: Vec<ChunkResult>,
    #[serde(skip)]
    pub preview: Vec<String>,
}

impl RunSummary {
    /// Zero-valued summary for an empty update set.
    pub fn empty() -> Self {
        Self {
            keys_total: 0,
            keys_written: 0,
            chunk_size: 0,
            chunks_total: 0,
            chunks_ok: 0,
            chunks_fail: 0,
            retries_used: 0,
            duration_s: 0.0,
            dry_run: false,
            chunks_planned: None,
            aborted: false,
            time_utc: Utc::now(),
            context: None,
            chunk_metrics: Vec::new(),
            preview: Vec::new(),
        }
    }

    fn from_chunks(
        keys_total: usize,
        chunk_size: usize,
        chunk_metrics: Vec<ChunkResult>,
        aborted: bool,
        duration_s: f64,
        context: RunContext,
    ) -> Self {
        let chunks_ok = chunk_metrics.iter().filter(|c| c.ok).count();
        Self {
            keys_total,
            keys_written: chunk_metrics.iter().filter(|c| c.ok).map(|c| c.keys).sum(),
            chunk_size,
            chunks_total: chunk_metrics.len(),
            chunks_ok,
            chunks_fail: chunk_metrics.len() - chunks_ok,
            retries_used: chunk_metrics.iter().map(|c| c.attempts.saturating_sub(1)).sum(),
            duration_s: round3(duration_s),
            dry_run: false,
            chunks_planned: None,
            aborted,
            time_utc: Utc::now(),
            context: Some(context),
            chunk_metrics,
            preview: Vec::new(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.chunks_fail == 0 && !self.aborted
    }
}

fn round3(x: f64) -> f64 {
    (x * 1000.0).round() / 1000.0
}

/// Applies update sets to a tree store in bounded, retried batches.
pub struct UpdateEngine {
    store: Arc<dyn TreeStore>,
    settings: UpdateSettings,
}

impl UpdateEngine {
    pub fn new(store: Arc<dyn TreeStore>, settings: UpdateSettings) -> Self {
        Self { store, settings }
    }

    pub fn settings(&self) -> &UpdateSettings {
        &self.settings
    }

    /// Write `updates` to the store root in batches and report what happened.
    pub async fn update_multi(&self, updates: &UpdateSet, options: UpdateOptions) -> RunSummary {
        if updates.is_empty() {
            info!("update_multi: no updates to write");
            return RunSummary::empty();
        }

        let n = updates.len();
        let chunk_size = options
            .chunk_size
            .filter(|c| *c > 0)
            .unwrap_or(self.settings.chunk_size)
            .max(1);
        let metrics_path = options
            .metrics_path
            .unwrap_or_else(|| self.settings.metrics_path.clone());
        let continue_on_error = options
            .continue_on_error
            .unwrap_or(self.settings.continue_on_error);

        if options.dry_run {
            return self.dry_run_summary(updates, chunk_size, &metrics_path);
        }

        let context = RunContext::capture();
        let started = Instant::now();
        let chunks = updates.chunks(chunk_size);
        let total_chunks = chunks.len();
        if total_chunks > 1 {
            info!(
                "Splitting into {} chunks (chunk_size={}), total keys={}",
                total_chunks, chunk_size, n
            );
        }

        let mut chunk_metrics = Vec::with_capacity(total_chunks);
        let mut aborted = false;
        for (idx, chunk) in chunks.iter().enumerate() {
            let result = self.write_chunk(chunk, idx, total_chunks).await;
            let failed = !result.ok;
            chunk_metrics.push(result);
            if failed && !continue_on_error {
                aborted = idx + 1 < total_chunks;
                if aborted {
                    warn!(
                        "Stopping after chunk {}/{} failed (continue_on_error=false)",
                        idx + 1,
                        total_chunks
                    );
                }
                break;
            }
        }

        let summary = RunSummary::from_chunks(
            n,
            chunk_size,
            chunk_metrics,
            aborted,
            started.elapsed().as_secs_f64(),
            context,
        );
        info!(
            "update_multi summary: keys={}, chunks={} (ok={}, fail={}), retries={}, took {:.2}s",
            n,
            summary.chunks_total,
            summary.chunks_ok,
            summary.chunks_fail,
            summary.retries_used,
            summary.duration_s
        );

        if !metrics_path.is_empty() {
            self.write_metrics(&metrics_path, &summary).await;
        }
        summary
    }

    fn dry_run_summary(&self, updates: &UpdateSet, chunk_size: usize, metrics_path: &str) -> RunSummary {
        let n = updates.len();
        info!(
            "[DRY RUN] update_multi: total keys={} | chunk_size={} | metrics_path={}",
            n,
            chunk_size,
            if metrics_path.is_empty() { "-" } else { metrics_path }
        );
        let preview = updates.preview_lines(DRY_RUN_PREVIEW);
        for line in &preview {
            info!("  {}", line);
        }
        RunSummary {
            keys_total: n,
            chunk_size,
            dry_run: true,
            chunks_planned: Some(n.div_ceil(chunk_size)),
            context: Some(RunContext::capture()),
            preview,
            ..RunSummary::empty()
        }
    }

    async fn write_chunk(&self, chunk: &Map<String, Value>, idx: usize, total: usize) -> ChunkResult {
        let started = Instant::now();
        let policy = &self.settings.backoff;
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            match self.store.multi_update(chunk).await {
                Ok(()) => {
                    let duration = started.elapsed().as_secs_f64();
                    if total > 1 {
                        info!(
                            "Chunk {}/{} written: keys={} in {:.2}s (attempts={})",
                            idx + 1,
                            total,
                            chunk.len(),
                            duration,
                            attempt
                        );
                    }
                    return ChunkResult {
                        chunk_index: idx,
                        keys: chunk.len(),
                        attempts: attempt,
                        duration_s: round3(duration),
                        ok: true,
                        error: None,
                    };
                }
                Err(e) => {
                    warn!(
                        "Chunk {}/{} failed attempt {}/{}: {}",
                        idx + 1,
                        total,
                        attempt,
                        policy.max_attempts,
                        e
                    );
                    if !policy.should_retry(attempt) {
                        return ChunkResult {
                            chunk_index: idx,
                            keys: chunk.len(),
                            attempts: attempt,
                            duration_s: round3(started.elapsed().as_secs_f64()),
                            ok: false,
                            error: Some(e.to_string()),
                        };
                    }
                    policy.wait(attempt).await;
                }
            }
        }
    }

    /// Best effort: failures are logged and never affect the run outcome.
    async fn write_metrics(&self, metrics_path: &str, summary: &RunSummary) {
        let Some(context) = &summary.context else {
            return;
        };
        let node = StorePath::parse(metrics_path)
            .child(summary.time_utc.format("%Y-%m-%d").to_string())
            .child(context.job_id());

        let summary_json = match serde_json::to_value(summary) {
            Ok(v) => v,
            Err(e) => {
                warn!("Failed to serialize run metrics: {}", e);
                return;
            }
        };
        let details: Map<String, Value> = summary
            .chunk_metrics
            .iter()
            .take(MAX_CHUNK_DETAILS)
            .filter_map(|c| Some((c.chunk_index.to_string(), serde_json::to_value(c).ok()?)))
            .collect();

        let node_path = node.to_string();
        let chunks_path = node.clone().child("chunks").to_string();
        let result = async {
            self.store.write(&node_path, &summary_json).await?;
            self.store.write(&chunks_path, &Value::Object(details)).await
        }
        .await;

        match result {
            Ok(()) => info!("Run metrics written at {}", node_path),
            Err(e) => warn!("Failed to write run metrics at {}: {}", node_path, e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn set_of(n: usize) -> UpdateSet {
        (0..n).map(|i| (format!("k/{}", i), json!(i))).collect()
    }

    #[test]
    fn chunks_cover_every_key_once_in_order() {
        let set = set_of(7);
        let chunks = set.chunks(3);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks.iter().map(Map::len).collect::<Vec<_>>(), vec![3, 3, 1]);
        let flat: Vec<String> = chunks.iter().flat_map(|c| c.keys().cloned()).collect();
        let expected: Vec<String> = set.keys().map(String::from).collect();
        assert_eq!(flat, expected);
    }

    #[test]
    fn exact_multiple_has_no_empty_tail() {
        assert_eq!(set_of(6).chunks(3).len(), 2);
        assert_eq!(set_of(1).chunks(2000).len(), 1);
    }

    #[test]
    fn insert_sanitizes_paths_and_nested_keys() {
        let mut set = UpdateSet::new();
        set.insert("matches/39/ou/2.5", json!({"St. Pauli": {"a$b": 1}}));
        assert_eq!(
            set.get("matches/39/ou/2_5"),
            Some(&json!({"St_ Pauli": {"a_b": 1}}))
        );
    }

    #[test]
    fn reinsert_keeps_position_and_latest_value() {
        let mut set = UpdateSet::new();
        set.insert("a", 1);
        set.insert("b", 2);
        set.insert("a", 3);
        assert_eq!(set.keys().collect::<Vec<_>>(), vec!["a", "b"]);
        assert_eq!(set.get("a"), Some(&json!(3)));
    }

    #[test]
    fn preview_truncates_long_values() {
        let mut set = UpdateSet::new();
        set.insert("long", "x".repeat(500));
        let lines = set.preview_lines(5);
        assert_eq!(lines.len(), 1);
        assert!(lines[0].ends_with("..."));
        assert!(lines[0].len() < 260);
    }

    #[test]
    fn job_id_prefers_ci_run_id() {
        let mut ctx = RunContext::capture();
        ctx.env.run_id = Some("987".into());
        assert_eq!(ctx.job_id(), "987");
        ctx.env.run_id = None;
        assert!(ctx.job_id().starts_with("local-"));
    }

    #[test]
    fn summary_serializes_ci_names() {
        let mut ctx = RunContext::capture();
        ctx.env.sha = Some("abc".into());
        let v = serde_json::to_value(&ctx).unwrap();
        assert_eq!(v["env"]["GITHUB_SHA"], json!("abc"));
    }
}
