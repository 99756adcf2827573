//! In-process client metrics: session pool gauges, per-method operation and
//! attempt counts with latency summaries, and GFE latency read from the
//! `server-timing` response header.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::hash::Hasher;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, RwLock};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use regex::Regex;
use serde::Serialize;
use siphasher::sip::SipHasher13;
use tonic::metadata::MetadataMap;
use tonic::Code;
use uuid::Uuid;

use crate::error::CodeName;
use crate::transport::SERVER_TIMING_HEADER;

const DEFAULT_HISTORY_SIZE: usize = 200;
const CLIENT_HASH_PREFIX_BITS: u32 = 10;

/// Handle to the metric store of one client. Cloning is cheap; a
/// [`Metrics::noop`] handle accepts every call and records nothing.
#[derive(Clone)]
pub struct Metrics {
    inner: Option<Arc<MetricsInner>>,
}

struct MetricsInner {
    started_at: Instant,
    started_at_ms: u64,
    history_size: usize,
    attributes: MetricAttributes,
    open_sessions: AtomicU64,
    in_use_sessions: AtomicU64,
    max_allowed_sessions: AtomicU64,
    get_session_timeouts: AtomicU64,
    acquired_sessions: AtomicU64,
    released_sessions: AtomicU64,
    in_flight_operations: AtomicU64,
    gfe_header_missing: AtomicU64,
    operations: RwLock<HashMap<String, MethodStats>>,
    attempts: RwLock<HashMap<String, MethodStats>>,
    gfe_latencies: RwLock<VecDeque<u64>>,
}

#[derive(Default)]
struct MethodStats {
    count: u64,
    by_code: BTreeMap<String, u64>,
    latencies: VecDeque<u64>,
}

/// Attributes attached to every metric of a client.
#[derive(Clone, Debug, Serialize)]
pub struct MetricAttributes {
    pub database: String,
    pub client_id: String,
    pub client_hash: String,
}

#[derive(Clone, Serialize)]
pub struct MetricsSnapshot {
    pub started_at_ms: u64,
    pub uptime_ms: u64,
    pub attributes: MetricAttributes,
    pub sessions: SessionCountsSnapshot,
    pub in_flight_operations: u64,
    pub operations: Vec<MethodSnapshot>,
    pub attempts: Vec<MethodSnapshot>,
    pub gfe_latency: LatencySummarySnapshot,
    pub gfe_header_missing: u64,
    pub history_size: usize,
}

#[derive(Clone, Serialize)]
pub struct SessionCountsSnapshot {
    pub open: u64,
    pub in_use: u64,
    pub max_allowed: u64,
    pub get_session_timeouts: u64,
    pub acquired: u64,
    pub released: u64,
}

#[derive(Clone, Serialize)]
pub struct MethodSnapshot {
    pub method: String,
    pub count: u64,
    pub by_code: BTreeMap<String, u64>,
    pub latency: LatencySummarySnapshot,
}

#[derive(Clone, Serialize)]
pub struct LatencySummarySnapshot {
    pub count: usize,
    pub avg_ms: u64,
    pub p50_ms: u64,
    pub p95_ms: u64,
    pub p99_ms: u64,
    pub max_ms: u64,
}

/// Tracks one operation from start to finish; dropping it without
/// [`OperationTimer::finish`] only releases the in-flight slot.
pub struct OperationTimer {
    inner: Option<Arc<MetricsInner>>,
    method: &'static str,
    started: Instant,
}

impl OperationTimer {
    pub fn finish(self, code: Code) {
        if let Some(inner) = &self.inner {
            record_method(
                &inner.operations,
                self.method,
                code,
                self.started.elapsed(),
                inner.history_size,
            );
        }
    }
}

impl Drop for OperationTimer {
    fn drop(&mut self) {
        if let Some(inner) = &self.inner {
            inner.in_flight_operations.fetch_sub(1, Ordering::Relaxed);
        }
    }
}

impl Metrics {
    pub fn new(database: &str, client_id: &str, history_size: usize) -> Self {
        let history_size = if history_size == 0 {
            DEFAULT_HISTORY_SIZE
        } else {
            history_size
        };
        Self {
            inner: Some(Arc::new(MetricsInner {
                started_at: Instant::now(),
                started_at_ms: now_millis(),
                history_size,
                attributes: MetricAttributes {
                    database: database.to_string(),
                    client_id: client_id.to_string(),
                    client_hash: generate_client_hash(process_uid()),
                },
                open_sessions: AtomicU64::new(0),
                in_use_sessions: AtomicU64::new(0),
                max_allowed_sessions: AtomicU64::new(0),
                get_session_timeouts: AtomicU64::new(0),
                acquired_sessions: AtomicU64::new(0),
                released_sessions: AtomicU64::new(0),
                in_flight_operations: AtomicU64::new(0),
                gfe_header_missing: AtomicU64::new(0),
                operations: RwLock::new(HashMap::new()),
                attempts: RwLock::new(HashMap::new()),
                gfe_latencies: RwLock::new(VecDeque::with_capacity(history_size)),
            })),
        }
    }

    pub fn noop() -> Self {
        Self { inner: None }
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.is_some()
    }

    pub fn set_session_counts(&self, open: u64, in_use: u64, max_allowed: u64) {
        if let Some(inner) = &self.inner {
            inner.open_sessions.store(open, Ordering::Relaxed);
            inner.in_use_sessions.store(in_use, Ordering::Relaxed);
            inner.max_allowed_sessions.store(max_allowed, Ordering::Relaxed);
        }
    }

    pub fn record_get_session_timeout(&self) {
        self.bump(|inner| &inner.get_session_timeouts);
    }

    pub fn record_session_acquired(&self) {
        self.bump(|inner| &inner.acquired_sessions);
    }

    pub fn record_session_released(&self) {
        self.bump(|inner| &inner.released_sessions);
    }

    pub fn start_operation(&self, method: &'static str) -> OperationTimer {
        if let Some(inner) = &self.inner {
            inner.in_flight_operations.fetch_add(1, Ordering::Relaxed);
        }
        OperationTimer {
            inner: self.inner.clone(),
            method,
            started: Instant::now(),
        }
    }

    pub fn record_attempt(&self, method: &str, code: Code, duration: Duration) {
        if let Some(inner) = &self.inner {
            record_method(&inner.attempts, method, code, duration, inner.history_size);
        }
    }

    /// Records the GFE latency carried by `headers`, or counts the response
    /// as missing the header.
    pub fn record_gfe_latency(&self, headers: &MetadataMap) {
        let Some(inner) = &self.inner else {
            return;
        };
        let parsed = headers
            .get(SERVER_TIMING_HEADER)
            .and_then(|value| value.to_str().ok())
            .and_then(parse_gfe_latency);
        match parsed {
            Some(latency) => {
                let mut ring = inner
                    .gfe_latencies
                    .write()
                    .unwrap_or_else(|poisoned| poisoned.into_inner());
                push_ring(&mut ring, latency.as_millis() as u64, inner.history_size);
            }
            None => {
                inner.gfe_header_missing.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// `None` for a disabled handle.
    pub fn snapshot(&self) -> Option<MetricsSnapshot> {
        let inner = self.inner.as_ref()?;
        let gfe = inner
            .gfe_latencies
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .iter()
            .copied()
            .collect::<Vec<_>>();
        Some(MetricsSnapshot {
            started_at_ms: inner.started_at_ms,
            uptime_ms: inner.started_at.elapsed().as_millis() as u64,
            attributes: inner.attributes.clone(),
            sessions: SessionCountsSnapshot {
                open: inner.open_sessions.load(Ordering::Relaxed),
                in_use: inner.in_use_sessions.load(Ordering::Relaxed),
                max_allowed: inner.max_allowed_sessions.load(Ordering::Relaxed),
                get_session_timeouts: inner.get_session_timeouts.load(Ordering::Relaxed),
                acquired: inner.acquired_sessions.load(Ordering::Relaxed),
                released: inner.released_sessions.load(Ordering::Relaxed),
            },
            in_flight_operations: inner.in_flight_operations.load(Ordering::Relaxed),
            operations: snapshot_methods(&inner.operations),
            attempts: snapshot_methods(&inner.attempts),
            gfe_latency: summarize_latencies(gfe),
            gfe_header_missing: inner.gfe_header_missing.load(Ordering::Relaxed),
            history_size: inner.history_size,
        })
    }

    fn bump(&self, counter: impl Fn(&MetricsInner) -> &AtomicU64) {
        if let Some(inner) = &self.inner {
            counter(inner).fetch_add(1, Ordering::Relaxed);
        }
    }
}

fn record_method(
    target: &RwLock<HashMap<String, MethodStats>>,
    method: &str,
    code: Code,
    duration: Duration,
    history_size: usize,
) {
    let mut methods = target
        .write()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    let stats = methods.entry(method.to_string()).or_default();
    stats.count = stats.count.saturating_add(1);
    *stats.by_code.entry(CodeName(code).to_string()).or_insert(0) += 1;
    push_ring(
        &mut stats.latencies,
        duration.as_millis() as u64,
        history_size,
    );
}

fn snapshot_methods(target: &RwLock<HashMap<String, MethodStats>>) -> Vec<MethodSnapshot> {
    let methods = target
        .read()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    let mut out = methods
        .iter()
        .map(|(method, stats)| MethodSnapshot {
            method: method.clone(),
            count: stats.count,
            by_code: stats.by_code.clone(),
            latency: summarize_latencies(stats.latencies.iter().copied().collect()),
        })
        .collect::<Vec<_>>();
    out.sort_unstable_by(|a, b| a.method.cmp(&b.method));
    out
}

fn push_ring<T>(target: &mut VecDeque<T>, value: T, max: usize) {
    if target.len() >= max {
        target.pop_front();
    }
    target.push_back(value);
}

fn summarize_latencies(values: Vec<u64>) -> LatencySummarySnapshot {
    if values.is_empty() {
        return LatencySummarySnapshot {
            count: 0,
            avg_ms: 0,
            p50_ms: 0,
            p95_ms: 0,
            p99_ms: 0,
            max_ms: 0,
        };
    }

    let count = values.len();
    let sum: u64 = values.iter().sum();
    let avg_ms = sum / count as u64;

    let mut sorted = values;
    sorted.sort_unstable();
    let max_ms = *sorted.last().unwrap_or(&0);

    LatencySummarySnapshot {
        count,
        avg_ms,
        p50_ms: percentile(&sorted, 0.50),
        p95_ms: percentile(&sorted, 0.95),
        p99_ms: percentile(&sorted, 0.99),
        max_ms,
    }
}

fn percentile(sorted: &[u64], quantile: f64) -> u64 {
    if sorted.is_empty() {
        return 0;
    }
    let rank = (quantile * (sorted.len() as f64 - 1.0)).round() as usize;
    sorted[rank.min(sorted.len() - 1)]
}

fn gfe_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"gfet4t7;\s*dur=(\d+(?:\.\d+)?)").ok())
        .as_ref()
}

/// Extracts `dur` of the `gfet4t7` entry, in milliseconds.
fn parse_gfe_latency(server_timing: &str) -> Option<Duration> {
    let caps = gfe_regex()?.captures(server_timing)?;
    let millis: f64 = caps.get(1)?.as_str().parse().ok()?;
    Some(Duration::from_micros((millis * 1_000.0).round() as u64))
}

/// Random id of this process, shared by every client it creates.
fn process_uid() -> &'static str {
    static UID: OnceLock<String> = OnceLock::new();
    UID.get_or_init(|| Uuid::new_v4().to_string())
}

/// Top bits of a 64-bit hash of `uid`, as six hex digits. Coarse enough to
/// group clients without identifying a process.
fn generate_client_hash(uid: &str) -> String {
    let mut hasher = SipHasher13::new_with_key(&[0u8; 16]);
    hasher.write(uid.as_bytes());
    let sig = hasher.finish() >> (64 - CLIENT_HASH_PREFIX_BITS);
    format!("{sig:06x}")
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_else(|_| Duration::from_secs(0))
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn noop_metrics_record_nothing() {
        let metrics = Metrics::noop();
        metrics.record_session_acquired();
        metrics.start_operation("Commit").finish(Code::Ok);
        assert!(!metrics.is_enabled());
        assert!(metrics.snapshot().is_none());
    }

    #[test]
    fn operations_are_grouped_by_method_and_code() {
        let metrics = Metrics::new("projects/p/instances/i/databases/d", "client-1", 4);
        metrics.start_operation("Commit").finish(Code::Ok);
        metrics.start_operation("Commit").finish(Code::Aborted);
        metrics.record_attempt("Commit", Code::Aborted, Duration::from_millis(7));
        {
            let _pending = metrics.start_operation("ExecuteStreamingSql");
            assert_eq!(metrics.snapshot().unwrap().in_flight_operations, 1);
        }

        let snapshot = metrics.snapshot().unwrap();
        assert_eq!(snapshot.in_flight_operations, 0);
        assert_eq!(snapshot.operations.len(), 1);
        let commit = &snapshot.operations[0];
        assert_eq!(commit.count, 2);
        assert_eq!(commit.by_code.get("ABORTED"), Some(&1));
        assert_eq!(commit.by_code.get("OK"), Some(&1));
        assert_eq!(snapshot.attempts[0].latency.max_ms, 7);
        assert_eq!(snapshot.attributes.client_id, "client-1");
    }

    #[test]
    fn session_counters_and_gauges() {
        let metrics = Metrics::new("db", "client-2", 0);
        metrics.set_session_counts(5, 2, 10);
        metrics.record_session_acquired();
        metrics.record_session_released();
        metrics.record_get_session_timeout();
        let sessions = metrics.snapshot().unwrap().sessions;
        assert_eq!((sessions.open, sessions.in_use, sessions.max_allowed), (5, 2, 10));
        assert_eq!(sessions.acquired, 1);
        assert_eq!(sessions.released, 1);
        assert_eq!(sessions.get_session_timeouts, 1);
    }

    #[test]
    fn gfe_latency_is_parsed_from_server_timing() {
        assert_eq!(
            parse_gfe_latency("gfet4t7; dur=123"),
            Some(Duration::from_millis(123))
        );
        assert_eq!(
            parse_gfe_latency("other;dur=1, gfet4t7;dur=2.5"),
            Some(Duration::from_micros(2_500))
        );
        assert!(parse_gfe_latency("other;dur=1").is_none());

        let metrics = Metrics::new("db", "client-3", 8);
        let mut headers = MetadataMap::new();
        headers.insert(SERVER_TIMING_HEADER, "gfet4t7; dur=40".parse().unwrap());
        metrics.record_gfe_latency(&headers);
        metrics.record_gfe_latency(&MetadataMap::new());
        let snapshot = metrics.snapshot().unwrap();
        assert_eq!(snapshot.gfe_latency.count, 1);
        assert_eq!(snapshot.gfe_latency.max_ms, 40);
        assert_eq!(snapshot.gfe_header_missing, 1);
    }

    #[test]
    fn client_hash_is_stable_and_short() {
        let a = generate_client_hash("uid-1");
        assert_eq!(a, generate_client_hash("uid-1"));
        assert_eq!(a.len(), 6);
        assert!(u64::from_str_radix(&a, 16).unwrap() < 1 << CLIENT_HASH_PREFIX_BITS);
    }

    #[test]
    fn summarize_latencies_handles_empty_and_percentiles() {
        assert_eq!(summarize_latencies(vec![]).count, 0);
        let summary = summarize_latencies(vec![100, 10, 30, 20]);
        assert_eq!(summary.avg_ms, 40);
        assert_eq!(summary.p50_ms, 30);
        assert_eq!(summary.p99_ms, 100);
    }
}
