//! Per-endpoint statistics aggregation and periodic publishing (§4.5).
//!
//! Modeled on the teacher's `StreamingAggregator` — an `Arc`-shared,
//! lock-guarded accumulator fed by many concurrent reporters and drained by
//! one periodic flush task — but re-keyed per `(endpoint_type, name)` and
//! extended with the log-style histogram bucketing and error table the spec
//! requires, plus separate lifetime vs. per-interval counters.

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

/// One recorded request outcome (§3).
#[derive(Debug, Clone)]
pub enum Outcome {
    Success {
        endpoint_type: String,
        name: String,
        response_time_ms: u64,
        response_length_bytes: u64,
    },
    Failure {
        endpoint_type: String,
        name: String,
        response_time_ms: u64,
        error_message: String,
    },
}

type EndpointKey = (String, String);
type ErrorKey = (String, String, String);

/// Round a response time down to a coarse histogram bucket (§4.5):
/// values < 100ms keep their exact integer ms; 100-999ms round down to the
/// nearest 10ms; >= 1000ms round down to the nearest 100ms.
pub fn bucket_response_time(ms: u64) -> u64 {
    if ms < 100 {
        ms
    } else if ms < 1000 {
        (ms / 10) * 10
    } else {
        (ms / 100) * 100
    }
}

#[derive(Debug, Clone)]
struct EndpointState {
    method: String,
    name: String,
    num_requests: u64,
    num_failures: u64,
    total_response_time: u64,
    sum_of_squares: f64,
    max_response_time: u64,
    min_response_time: u64,
    total_content_length: u64,
    response_times: BTreeMap<u64, u64>,
    /// Per-interval requests-per-second buckets, cleared on each flush.
    num_reqs_per_sec: BTreeMap<u64, u64>,
}

impl EndpointState {
    fn new(method: &str, name: &str) -> Self {
        Self {
            method: method.to_string(),
            name: name.to_string(),
            num_requests: 0,
            num_failures: 0,
            total_response_time: 0,
            sum_of_squares: 0.0,
            max_response_time: 0,
            min_response_time: u64::MAX,
            total_content_length: 0,
            response_times: BTreeMap::new(),
            num_reqs_per_sec: BTreeMap::new(),
        }
    }

    fn record(&mut self, response_time_ms: u64, failed: bool, content_length: u64, epoch_sec: u64) {
        self.num_requests += 1;
        if failed {
            self.num_failures += 1;
        }
        self.total_response_time += response_time_ms;
        self.sum_of_squares += (response_time_ms as f64).powi(2);
        if response_time_ms > self.max_response_time {
            self.max_response_time = response_time_ms;
        }
        if response_time_ms < self.min_response_time {
            self.min_response_time = response_time_ms;
        }
        self.total_content_length += content_length;
        *self
            .response_times
            .entry(bucket_response_time(response_time_ms))
            .or_insert(0) += 1;
        *self.num_reqs_per_sec.entry(epoch_sec).or_insert(0) += 1;
    }

    fn clear_interval(&mut self) {
        self.num_reqs_per_sec.clear();
    }

    fn to_snapshot(&self) -> EndpointSnapshot {
        EndpointSnapshot {
            name: self.name.clone(),
            method: self.method.clone(),
            num_requests: self.num_requests,
            num_failures: self.num_failures,
            total_response_time: self.total_response_time,
            max_response_time: self.max_response_time,
            min_response_time: if self.min_response_time == u64::MAX {
                0
            } else {
                self.min_response_time
            },
            total_content_length: self.total_content_length,
            response_times: self.response_times.clone(),
            num_reqs_per_sec: self.num_reqs_per_sec.clone(),
        }
    }

}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct EndpointSnapshot {
    pub name: String,
    pub method: String,
    pub num_requests: u64,
    pub num_failures: u64,
    pub total_response_time: u64,
    pub max_response_time: u64,
    pub min_response_time: u64,
    pub total_content_length: u64,
    pub response_times: BTreeMap<u64, u64>,
    pub num_reqs_per_sec: BTreeMap<u64, u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ErrorSnapshot {
    pub count: u64,
    pub method: String,
    pub name: String,
    pub error: String,
}

/// Periodic snapshot emitted via `on_data` (§4.5). `user_count` starts at
/// zero here — the runner fills it in before wrapping the snapshot in a
/// `stats` frame.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct StatsSnapshot {
    pub stats: Vec<EndpointSnapshot>,
    pub stats_total: EndpointSnapshot,
    pub errors: HashMap<String, ErrorSnapshot>,
    pub user_count: u64,
}

struct Inner {
    endpoints: HashMap<EndpointKey, EndpointState>,
    errors: HashMap<ErrorKey, u64>,
}

impl Inner {
    fn new() -> Self {
        Self {
            endpoints: HashMap::new(),
            errors: HashMap::new(),
        }
    }
}

/// Thread-safe handle to the aggregator. Cheap to clone (wraps an `Arc`);
/// virtual clients hold a clone in their [`crate::prototype::ExecutionContext`]
/// and call `report` once per iteration.
#[derive(Clone)]
pub struct StatsAggregator {
    inner: Arc<Mutex<Inner>>,
}

/// Alias used where a reporting-only capability is handed to task bodies.
pub type StatsHandle = StatsAggregator;

impl StatsAggregator {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner::new())),
        }
    }

    /// Record one outcome. Never blocks on I/O and never loses a record
    /// under normal operation (§4.5).
    pub fn report(&self, outcome: Outcome) {
        let epoch_sec = chrono::Utc::now().timestamp().max(0) as u64;
        let mut inner = self.inner.lock().expect("stats mutex poisoned");
        match outcome {
            Outcome::Success {
                endpoint_type,
                name,
                response_time_ms,
                response_length_bytes,
            } => {
                let key = (endpoint_type.clone(), name.clone());
                let entry = inner
                    .endpoints
                    .entry(key)
                    .or_insert_with(|| EndpointState::new(&endpoint_type, &name));
                entry.record(response_time_ms, false, response_length_bytes, epoch_sec);
            }
            Outcome::Failure {
                endpoint_type,
                name,
                response_time_ms,
                error_message,
            } => {
                let key = (endpoint_type.clone(), name.clone());
                let entry = inner
                    .endpoints
                    .entry(key)
                    .or_insert_with(|| EndpointState::new(&endpoint_type, &name));
                entry.record(response_time_ms, true, 0, epoch_sec);
                let err_key = (endpoint_type, name, error_message);
                *inner.errors.entry(err_key).or_insert(0) += 1;
            }
        }
    }

    /// Reset all lifetime and interval state. Called on transitions into
    /// HATCHING (§4.7).
    pub fn clear_all(&self) {
        let mut inner = self.inner.lock().expect("stats mutex poisoned");
        inner.endpoints.clear();
        inner.errors.clear();
    }

    /// Build a snapshot of current cumulative state and reset per-interval
    /// counters. Called by the flush loop on each tick.
    pub fn snapshot_and_reset_interval(&self) -> StatsSnapshot {
        let mut inner = self.inner.lock().expect("stats mutex poisoned");
        let mut total = EndpointSnapshot::default();
        let mut stats = Vec::with_capacity(inner.endpoints.len());
        for state in inner.endpoints.values() {
            let snap = state.to_snapshot();
            state_merge(&snap, &mut total);
            stats.push(snap);
        }
        stats.sort_by(|a, b| (a.method.as_str(), a.name.as_str()).cmp(&(b.method.as_str(), b.name.as_str())));

        let errors = inner
            .errors
            .iter()
            .map(|((method, name, error), &count)| {
                let key = format!("{method}:{name}:{error}");
                (
                    key,
                    ErrorSnapshot {
                        count,
                        method: method.clone(),
                        name: name.clone(),
                        error: error.clone(),
                    },
                )
            })
            .collect();

        for state in inner.endpoints.values_mut() {
            state.clear_interval();
        }

        StatsSnapshot {
            stats,
            stats_total: total,
            errors,
            user_count: 0,
        }
    }

    /// Spawn the periodic flush task. Stops when `cancel` fires.
    pub fn spawn_flush_loop<F>(
        &self,
        interval: Duration,
        cancel: CancellationToken,
        on_data: F,
    ) -> tokio::task::JoinHandle<()>
    where
        F: Fn(StatsSnapshot) + Send + Sync + 'static,
    {
        let aggregator = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let snapshot = aggregator.snapshot_and_reset_interval();
                        on_data(snapshot);
                    }
                    _ = cancel.cancelled() => break,
                }
            }
        })
    }
}

impl Default for StatsAggregator {
    fn default() -> Self {
        Self::new()
    }
}

fn state_merge(snap: &EndpointSnapshot, total: &mut EndpointSnapshot) {
    total.num_requests += snap.num_requests;
    total.num_failures += snap.num_failures;
    total.total_response_time += snap.total_response_time;
    total.total_content_length += snap.total_content_length;
    if snap.max_response_time > total.max_response_time {
        total.max_response_time = snap.max_response_time;
    }
    if total.min_response_time == 0 || (snap.min_response_time > 0 && snap.min_response_time < total.min_response_time) {
        total.min_response_time = snap.min_response_time;
    }
    for (&bucket, &count) in &snap.response_times {
        *total.response_times.entry(bucket).or_insert(0) += count;
    }
    for (&sec, &count) in &snap.num_reqs_per_sec {
        *total.num_reqs_per_sec.entry(sec).or_insert(0) += count;
    }
}
