use std::time::Duration;

use tracing::{error, info};

use crate::error::ApiError;
use crate::policy::RequestContext;

/// Lifecycle hooks for every attempt the client makes.
pub trait Observer: Send + Sync {
    fn on_request_start(&self, _context: &RequestContext) {}

    fn on_retry_scheduled(&self, _context: &RequestContext, _error: &ApiError, _delay: Duration) {}

    fn on_cancelled(&self, _context: &RequestContext) {}
}

/// User-facing feedback sink: loading indicator, error toasts and success messages.
pub trait Notifier: Send + Sync {
    fn loading(&self, _visible: bool) {}

    fn error(&self, _error: &ApiError) {}

    fn success(&self, _message: &str) {}

    fn notice(&self, _message: &str) {}
}

/// Routes notifications to `tracing` at info/error level.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn error(&self, api_error: &ApiError) {
        error!(
            kind = %api_error.kind(),
            code = api_error.code(),
            "{}",
            api_error.message()
        );
    }

    fn success(&self, message: &str) {
        info!("{message}");
    }

    fn notice(&self, message: &str) {
        info!("{message}");
    }
}
