use std::sync::Arc;
use std::time::Duration;

use serde_json::{Map, Value};

use crate::admission::AdmissionControl;
use crate::error::{ApiError, ConfigError};
use crate::retry::RetryPolicy;

const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(1000);
pub(crate) const DEFAULT_SUCCESS_MESSAGE: &str = "Request succeeded";

pub type SuccessHook<A, T> = Arc<dyn Fn(&T, &A) + Send + Sync>;
pub type ErrorHook<A> = Arc<dyn Fn(&ApiError, &A) + Send + Sync>;

/// Behaviour of a [`RequestTask`](crate::RequestTask).
pub struct TaskOptions<A, T> {
    pub manual: bool,
    pub show_loading: bool,
    pub show_error: bool,
    pub show_success: bool,
    pub success_message: Option<String>,
    pub retries: u32,
    pub retry_delay: Duration,
    pub timeout: Option<Duration>,
    pub debounce_wait: Option<Duration>,
    pub throttle_wait: Option<Duration>,
    pub deps: Vec<Value>,
    pub refresh_deps: Vec<Value>,
    pub default_data: Option<T>,
    pub default_args: Option<A>,
    pub on_success: Option<SuccessHook<A, T>>,
    pub on_error: Option<ErrorHook<A>>,
}

impl<A, T> Default for TaskOptions<A, T> {
    fn default() -> Self {
        Self {
            manual: false,
            show_loading: false,
            show_error: true,
            show_success: false,
            success_message: None,
            retries: 0,
            retry_delay: DEFAULT_RETRY_DELAY,
            timeout: None,
            debounce_wait: None,
            throttle_wait: None,
            deps: Vec::new(),
            refresh_deps: Vec::new(),
            default_data: None,
            default_args: None,
            on_success: None,
            on_error: None,
        }
    }
}

impl<A: Clone, T: Clone> Clone for TaskOptions<A, T> {
    fn clone(&self) -> Self {
        Self {
            manual: self.manual,
            show_loading: self.show_loading,
            show_error: self.show_error,
            show_success: self.show_success,
            success_message: self.success_message.clone(),
            retries: self.retries,
            retry_delay: self.retry_delay,
            timeout: self.timeout,
            debounce_wait: self.debounce_wait,
            throttle_wait: self.throttle_wait,
            deps: self.deps.clone(),
            refresh_deps: self.refresh_deps.clone(),
            default_data: self.default_data.clone(),
            default_args: self.default_args.clone(),
            on_success: self.on_success.clone(),
            on_error: self.on_error.clone(),
        }
    }
}

impl<A: std::fmt::Debug, T: std::fmt::Debug> std::fmt::Debug for TaskOptions<A, T> {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("TaskOptions")
            .field("manual", &self.manual)
            .field("show_loading", &self.show_loading)
            .field("show_error", &self.show_error)
            .field("show_success", &self.show_success)
            .field("success_message", &self.success_message)
            .field("retries", &self.retries)
            .field("retry_delay", &self.retry_delay)
            .field("timeout", &self.timeout)
            .field("debounce_wait", &self.debounce_wait)
            .field("throttle_wait", &self.throttle_wait)
            .field("deps", &self.deps)
            .field("refresh_deps", &self.refresh_deps)
            .field("default_data", &self.default_data)
            .field("default_args", &self.default_args)
            .field("on_success", &self.on_success.is_some())
            .field("on_error", &self.on_error.is_some())
            .finish()
    }
}

impl<A, T> TaskOptions<A, T> {
    pub fn with_manual(mut self, manual: bool) -> Self {
        self.manual = manual;
        self
    }

    pub fn with_show_loading(mut self, show_loading: bool) -> Self {
        self.show_loading = show_loading;
        self
    }

    pub fn with_show_error(mut self, show_error: bool) -> Self {
        self.show_error = show_error;
        self
    }

    pub fn with_show_success(mut self, show_success: bool) -> Self {
        self.show_success = show_success;
        self
    }

    pub fn with_success_message(mut self, success_message: impl Into<String>) -> Self {
        self.success_message = Some(success_message.into());
        self
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    pub fn with_retry_delay(mut self, retry_delay: Duration) -> Self {
        self.retry_delay = retry_delay;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_debounce_wait(mut self, debounce_wait: Duration) -> Self {
        self.debounce_wait = Some(debounce_wait);
        self
    }

    pub fn with_throttle_wait(mut self, throttle_wait: Duration) -> Self {
        self.throttle_wait = Some(throttle_wait);
        self
    }

    pub fn with_deps(mut self, deps: Vec<Value>) -> Self {
        self.deps = deps;
        self
    }

    pub fn with_refresh_deps(mut self, refresh_deps: Vec<Value>) -> Self {
        self.refresh_deps = refresh_deps;
        self
    }

    pub fn with_default_data(mut self, default_data: T) -> Self {
        self.default_data = Some(default_data);
        self
    }

    pub fn with_default_args(mut self, default_args: A) -> Self {
        self.default_args = Some(default_args);
        self
    }

    pub fn with_on_success<F>(mut self, hook: F) -> Self
    where
        F: Fn(&T, &A) + Send + Sync + 'static,
    {
        self.on_success = Some(Arc::new(hook));
        self
    }

    pub fn with_on_error<F>(mut self, hook: F) -> Self
    where
        F: Fn(&ApiError, &A) + Send + Sync + 'static,
    {
        self.on_error = Some(Arc::new(hook));
        self
    }

    pub(crate) fn admission(&self) -> Result<AdmissionControl, ConfigError> {
        AdmissionControl::from_waits(self.debounce_wait, self.throttle_wait)
    }

    pub(crate) fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::standard()
            .max_retries(self.retries)
            .base_delay(self.retry_delay)
    }
}

/// Defaults for a [`PaginatedRequestTask`](crate::PaginatedRequestTask).
#[derive(Clone, Debug)]
pub struct PaginationOptions {
    pub default_page_size: u32,
    pub default_params: Map<String, Value>,
    /// Fall back to the list length when the payload carries no `total`.
    pub total_from_len: bool,
    pub page_param: String,
    pub page_size_param: String,
}

impl Default for PaginationOptions {
    fn default() -> Self {
        Self {
            default_page_size: 10,
            default_params: Map::new(),
            total_from_len: false,
            page_param: "page".to_owned(),
            page_size_param: "pageSize".to_owned(),
        }
    }
}

impl PaginationOptions {
    pub fn with_default_page_size(mut self, default_page_size: u32) -> Self {
        self.default_page_size = default_page_size.max(1);
        self
    }

    pub fn with_default_params(mut self, default_params: Map<String, Value>) -> Self {
        self.default_params = default_params;
        self
    }

    pub fn with_total_from_len(mut self, total_from_len: bool) -> Self {
        self.total_from_len = total_from_len;
        self
    }

    pub fn with_page_param(mut self, page_param: impl Into<String>) -> Self {
        self.page_param = page_param.into();
        self
    }

    pub fn with_page_size_param(mut self, page_size_param: impl Into<String>) -> Self {
        self.page_size_param = page_size_param.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::{PaginationOptions, TaskOptions};
    use crate::admission::AdmissionControl;
    use crate::error::ConfigError;

    #[test]
    fn task_defaults_show_errors_only() {
        let options = TaskOptions::<(), ()>::default();
        assert!(!options.manual);
        assert!(options.show_error);
        assert!(!options.show_loading);
        assert!(!options.show_success);
        assert_eq!(options.retries, 0);
        assert_eq!(options.admission().expect("default admission"), AdmissionControl::Immediate);
    }

    #[test]
    fn conflicting_waits_are_rejected() {
        let options = TaskOptions::<(), ()>::default()
            .with_debounce_wait(Duration::from_millis(300))
            .with_throttle_wait(Duration::from_millis(300));
        assert!(matches!(options.admission(), Err(ConfigError::ConflictingAdmission)));
    }

    #[test]
    fn retry_settings_map_to_linear_policy() {
        let policy = TaskOptions::<(), ()>::default()
            .with_retries(2)
            .with_retry_delay(Duration::from_millis(100))
            .retry_policy();
        assert_eq!(policy.configured_max_retries(), 2);
        assert_eq!(policy.delay_for(2), Duration::from_millis(200));
    }

    #[test]
    fn page_size_is_at_least_one() {
        let options = PaginationOptions::default().with_default_page_size(0);
        assert_eq!(options.default_page_size, 1);
        assert_eq!(PaginationOptions::default().default_page_size, 10);
    }
}
