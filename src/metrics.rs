use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::error::{ApiError, ErrorKind};
use crate::util::lock_unpoisoned;

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ClientMetricsSnapshot {
    pub requests_started: u64,
    pub requests_succeeded: u64,
    pub requests_failed: u64,
    pub requests_cancelled: u64,
    pub retries: u64,
    pub in_flight: u64,
    pub latency_samples: u64,
    pub latency_total_ms: u64,
    pub latency_avg_ms: f64,
    /// Failed calls keyed by [`ErrorKind::as_str`]; cancellations are counted too.
    pub error_counts: BTreeMap<&'static str, u64>,
}

#[derive(Clone, Debug, Default)]
pub(crate) struct ClientMetrics {
    inner: Arc<ClientMetricsInner>,
}

#[derive(Debug, Default)]
struct ClientMetricsInner {
    requests_started: AtomicU64,
    requests_succeeded: AtomicU64,
    requests_failed: AtomicU64,
    requests_cancelled: AtomicU64,
    retries: AtomicU64,
    in_flight: AtomicU64,
    latency_total_ms: AtomicU64,
    latency_samples: AtomicU64,
    error_counts: Mutex<BTreeMap<ErrorKind, u64>>,
}

pub(crate) struct InFlightGuard {
    metrics: ClientMetrics,
}

impl ClientMetrics {
    pub(crate) fn record_request_started(&self) {
        self.inner.requests_started.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn enter_in_flight(&self) -> InFlightGuard {
        self.inner.in_flight.fetch_add(1, Ordering::Relaxed);
        InFlightGuard {
            metrics: self.clone(),
        }
    }

    pub(crate) fn record_retry(&self) {
        self.inner.retries.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_request_completed<T>(&self, result: &Result<T, ApiError>, latency: Duration) {
        match result {
            Ok(_) => {
                self.inner
                    .requests_succeeded
                    .fetch_add(1, Ordering::Relaxed);
            }
            Err(error) if error.is_cancelled() => {
                self.inner
                    .requests_cancelled
                    .fetch_add(1, Ordering::Relaxed);
                self.add_error_count(error.kind());
                return;
            }
            Err(error) => {
                self.inner.requests_failed.fetch_add(1, Ordering::Relaxed);
                self.add_error_count(error.kind());
            }
        }
        self.record_latency(latency);
    }

    pub(crate) fn snapshot(&self) -> ClientMetricsSnapshot {
        let latency_samples = self.inner.latency_samples.load(Ordering::Relaxed);
        let latency_total_ms = self.inner.latency_total_ms.load(Ordering::Relaxed);
        let latency_avg_ms = if latency_samples == 0 {
            0.0
        } else {
            latency_total_ms as f64 / latency_samples as f64
        };
        let error_counts = lock_unpoisoned(&self.inner.error_counts)
            .iter()
            .map(|(kind, count)| (kind.as_str(), *count))
            .collect();

        ClientMetricsSnapshot {
            requests_started: self.inner.requests_started.load(Ordering::Relaxed),
            requests_succeeded: self.inner.requests_succeeded.load(Ordering::Relaxed),
            requests_failed: self.inner.requests_failed.load(Ordering::Relaxed),
            requests_cancelled: self.inner.requests_cancelled.load(Ordering::Relaxed),
            retries: self.inner.retries.load(Ordering::Relaxed),
            in_flight: self.inner.in_flight.load(Ordering::Relaxed),
            latency_samples,
            latency_total_ms,
            latency_avg_ms,
            error_counts,
        }
    }

    fn record_latency(&self, latency: Duration) {
        self.inner.latency_samples.fetch_add(1, Ordering::Relaxed);
        self.inner.latency_total_ms.fetch_add(
            latency.as_millis().min(u64::MAX as u128) as u64,
            Ordering::Relaxed,
        );
    }

    fn add_error_count(&self, kind: ErrorKind) {
        let mut error_counts = lock_unpoisoned(&self.inner.error_counts);
        *error_counts.entry(kind).or_insert(0) += 1;
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.metrics.inner.in_flight.fetch_sub(1, Ordering::Relaxed);
    }
}
