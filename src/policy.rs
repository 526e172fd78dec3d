use http::{HeaderMap, Method, StatusCode};

use crate::descriptor::Fingerprint;
use crate::error::ApiError;

/// Per-attempt view of a call handed to interceptors and observers.
#[derive(Clone, Debug)]
pub struct RequestContext {
    method: Method,
    uri: String,
    fingerprint: Fingerprint,
    attempt: u32,
    max_attempts: u32,
}

impl RequestContext {
    pub(crate) fn new(
        method: Method,
        uri: String,
        fingerprint: Fingerprint,
        attempt: u32,
        max_attempts: u32,
    ) -> Self {
        Self {
            method,
            uri,
            fingerprint,
            attempt,
            max_attempts,
        }
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Redacted target uri (no credentials or query).
    pub fn uri(&self) -> &str {
        &self.uri
    }

    pub fn fingerprint(&self) -> &Fingerprint {
        &self.fingerprint
    }

    /// 1-based attempt number.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }
}

pub trait HttpInterceptor: Send + Sync {
    fn on_request(&self, _context: &RequestContext, _headers: &mut HeaderMap) {}

    fn on_response(&self, _context: &RequestContext, _status: StatusCode, _headers: &HeaderMap) {}

    fn on_error(&self, _context: &RequestContext, _error: &ApiError) {}
}
