use std::sync::Arc;
use std::time::Duration;

use http::Method;

use crate::error::{ApiError, ErrorKind};

/// Everything a custom classifier needs to veto or allow one retry.
#[derive(Clone, Debug)]
pub struct RetryDecision {
    /// Retries already performed for this logical call.
    pub attempts_so_far: u32,
    pub max_retries: u32,
    pub method: Method,
    pub uri: String,
    pub kind: ErrorKind,
    pub code: i64,
}

pub trait RetryClassifier: Send + Sync {
    fn should_retry(&self, decision: &RetryDecision) -> bool;
}

/// Linear retry policy: retry `n` waits `base_delay * n`.
#[derive(Clone)]
pub struct RetryPolicy {
    max_retries: u32,
    base_delay: Duration,
    retry_classifier: Option<Arc<dyn RetryClassifier>>,
}

impl std::fmt::Debug for RetryPolicy {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("RetryPolicy")
            .field("max_retries", &self.max_retries)
            .field("base_delay", &self.base_delay)
            .field("retry_classifier", &self.retry_classifier.is_some())
            .finish()
    }
}

impl RetryPolicy {
    pub fn disabled() -> Self {
        Self {
            max_retries: 0,
            base_delay: Duration::from_millis(1000),
            retry_classifier: None,
        }
    }

    pub fn standard() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(1000),
            retry_classifier: None,
        }
    }

    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    pub fn retry_classifier(mut self, retry_classifier: Arc<dyn RetryClassifier>) -> Self {
        self.retry_classifier = Some(retry_classifier);
        self
    }

    pub fn configured_max_retries(&self) -> u32 {
        self.max_retries
    }

    pub fn configured_base_delay(&self) -> Duration {
        self.base_delay
    }

    pub fn should_retry(&self, error: &ApiError, attempts_so_far: u32) -> bool {
        error.retryable() && attempts_so_far < self.max_retries
    }

    /// The classifier may veto a retry the error allows, or allow one the error forbids,
    /// but cancelled calls and re-authentication failures are never retried.
    pub(crate) fn should_retry_decision(&self, error: &ApiError, decision: &RetryDecision) -> bool {
        if error.is_cancelled() || error.requires_reauth() {
            return false;
        }
        if decision.attempts_so_far >= self.max_retries {
            return false;
        }
        match &self.retry_classifier {
            Some(retry_classifier) => retry_classifier.should_retry(decision),
            None => self.should_retry(error, decision.attempts_so_far),
        }
    }

    /// Delay before retry number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(attempt.max(1))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::standard()
    }
}
