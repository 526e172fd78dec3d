use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http::header::{CONTENT_TYPE, HeaderName, HeaderValue};
use http::{HeaderMap, Method, StatusCode, Uri};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::time::Instant;
use tracing::{Instrument, debug, info_span, warn};

use crate::auth::{
    AuthInjector, DEFAULT_UNAUTHORIZED_GRACE, MemorySessionStore, Navigator, NoopNavigator,
    SessionStore, UnauthorizedHandler,
};
use crate::body::MultipartForm;
use crate::classify::{TransportOutcome, classify};
use crate::descriptor::{Fingerprint, RequestDescriptor};
use crate::envelope::unwrap_response;
use crate::error::{ApiError, ConfigError};
use crate::hyper_transport::HyperTransport;
use crate::metrics::{ClientMetrics, ClientMetricsSnapshot};
use crate::observe::{Notifier, Observer, TracingNotifier};
use crate::policy::{HttpInterceptor, RequestContext};
use crate::registry::{CancellationHandle, PendingRequestRegistry};
use crate::request::RequestBuilder;
use crate::retry::{RetryDecision, RetryPolicy};
use crate::transport::{ProgressCallback, Transport, TransportRequest};
use crate::util::{
    merge_headers, parse_header_name, parse_header_value, redact_uri_for_logs, resolve_uri,
    validate_base_url,
};

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

pub struct TransportClientBuilder {
    base_url: String,
    default_headers: HeaderMap,
    request_timeout: Duration,
    retry_policy: RetryPolicy,
    session_store: Arc<dyn SessionStore>,
    navigator: Arc<dyn Navigator>,
    notifier: Arc<dyn Notifier>,
    observer: Option<Arc<dyn Observer>>,
    interceptors: Vec<Arc<dyn HttpInterceptor>>,
    transport: Option<Arc<dyn Transport>>,
    unauthorized_grace: Duration,
}

impl TransportClientBuilder {
    pub(crate) fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            default_headers: HeaderMap::new(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            retry_policy: RetryPolicy::standard(),
            session_store: Arc::new(MemorySessionStore::new()),
            navigator: Arc::new(NoopNavigator),
            notifier: Arc::new(TracingNotifier),
            observer: None,
            interceptors: Vec::new(),
            transport: None,
            unauthorized_grace: DEFAULT_UNAUTHORIZED_GRACE,
        }
    }

    pub fn default_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.default_headers.insert(name, value);
        self
    }

    pub fn try_default_header(self, name: &str, value: &str) -> Result<Self, ConfigError> {
        let name = parse_header_name(name)?;
        let value = parse_header_value(name.as_str(), value)?;
        Ok(self.default_header(name, value))
    }

    pub fn request_timeout(mut self, request_timeout: Duration) -> Self {
        self.request_timeout = request_timeout.max(Duration::from_millis(1));
        self
    }

    pub fn retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
        self.retry_policy = retry_policy;
        self
    }

    pub fn session_store(mut self, session_store: Arc<dyn SessionStore>) -> Self {
        self.session_store = session_store;
        self
    }

    pub fn navigator(mut self, navigator: Arc<dyn Navigator>) -> Self {
        self.navigator = navigator;
        self
    }

    pub fn notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn observer(mut self, observer: Arc<dyn Observer>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn interceptor_arc(mut self, interceptor: Arc<dyn HttpInterceptor>) -> Self {
        self.interceptors.push(interceptor);
        self
    }

    pub fn interceptor<I>(self, interceptor: I) -> Self
    where
        I: HttpInterceptor + 'static,
    {
        self.interceptor_arc(Arc::new(interceptor))
    }

    /// Replaces the default [`HyperTransport`].
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Delay between the 401 notice and the login navigation.
    pub fn unauthorized_grace(mut self, grace: Duration) -> Self {
        self.unauthorized_grace = grace;
        self
    }

    pub fn try_build(self) -> Result<TransportClient, ConfigError> {
        validate_base_url(&self.base_url)?;
        let transport = match self.transport {
            Some(transport) => transport,
            None => Arc::new(HyperTransport::builder().try_build()?),
        };
        let unauthorized = UnauthorizedHandler::new(
            Arc::clone(&self.session_store),
            self.navigator,
            Arc::clone(&self.notifier),
            self.unauthorized_grace,
        );

        Ok(TransportClient {
            inner: Arc::new(ClientInner {
                base_url: self.base_url,
                default_headers: self.default_headers,
                request_timeout: self.request_timeout,
                retry_policy: self.retry_policy,
                auth: AuthInjector::new(self.session_store),
                unauthorized,
                notifier: self.notifier,
                observer: self.observer,
                interceptors: self.interceptors,
                transport,
                registry: PendingRequestRegistry::new(),
                metrics: ClientMetrics::default(),
            }),
        })
    }

    #[track_caller]
    pub fn build(self) -> TransportClient {
        self.try_build().unwrap_or_else(|error| {
            panic!("failed to build reqflow client: {error}; use try_build() to handle configuration errors")
        })
    }
}

struct ClientInner {
    base_url: String,
    default_headers: HeaderMap,
    request_timeout: Duration,
    retry_policy: RetryPolicy,
    auth: AuthInjector,
    unauthorized: UnauthorizedHandler,
    notifier: Arc<dyn Notifier>,
    observer: Option<Arc<dyn Observer>>,
    interceptors: Vec<Arc<dyn HttpInterceptor>>,
    transport: Arc<dyn Transport>,
    registry: PendingRequestRegistry,
    metrics: ClientMetrics,
}

/// Issues enveloped API calls with dedup, cancellation, timeouts and retry.
///
/// Cheap to clone; clones share the pending-request registry and metrics.
#[derive(Clone)]
pub struct TransportClient {
    inner: Arc<ClientInner>,
}

impl std::fmt::Debug for TransportClient {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("TransportClient")
            .field("base_url", &self.inner.base_url)
            .field("request_timeout", &self.inner.request_timeout)
            .field("retry_policy", &self.inner.retry_policy)
            .field("pending", &self.inner.registry.len())
            .finish_non_exhaustive()
    }
}

struct Attempt<'a> {
    context: &'a RequestContext,
    uri: &'a Uri,
    headers: &'a HeaderMap,
    body: &'a Bytes,
    progress: Option<&'a ProgressCallback>,
    timeout: Duration,
    handle: &'a CancellationHandle,
}

impl TransportClient {
    pub fn builder(base_url: impl Into<String>) -> TransportClientBuilder {
        TransportClientBuilder::new(base_url)
    }

    pub fn request(&self, method: Method, path: impl Into<String>) -> RequestBuilder<'_> {
        RequestBuilder::new(self, RequestDescriptor::builder(method, path))
    }

    pub fn get(&self, path: impl Into<String>) -> RequestBuilder<'_> {
        self.request(Method::GET, path)
    }

    pub fn post(&self, path: impl Into<String>) -> RequestBuilder<'_> {
        self.request(Method::POST, path)
    }

    pub fn put(&self, path: impl Into<String>) -> RequestBuilder<'_> {
        self.request(Method::PUT, path)
    }

    pub fn patch(&self, path: impl Into<String>) -> RequestBuilder<'_> {
        self.request(Method::PATCH, path)
    }

    pub fn delete(&self, path: impl Into<String>) -> RequestBuilder<'_> {
        self.request(Method::DELETE, path)
    }

    /// `POST` with a multipart body; attach a progress callback on the builder.
    pub fn upload(&self, path: impl Into<String>, form: MultipartForm) -> RequestBuilder<'_> {
        RequestBuilder::new(self, RequestDescriptor::post(path).multipart(form))
    }

    pub fn base_url(&self) -> &str {
        &self.inner.base_url
    }

    /// Cancels the in-flight call with this fingerprint, if any.
    pub fn cancel(&self, fingerprint: &Fingerprint) -> bool {
        self.inner.registry.cancel(fingerprint)
    }

    pub fn cancel_all(&self) -> usize {
        self.inner.registry.cancel_all()
    }

    pub fn pending_count(&self) -> usize {
        self.inner.registry.len()
    }

    pub fn is_pending(&self, fingerprint: &Fingerprint) -> bool {
        self.inner.registry.contains(fingerprint)
    }

    /// Whether a 401 logout is waiting for its navigation.
    pub fn redirect_pending(&self) -> bool {
        self.inner.unauthorized.is_pending()
    }

    pub fn metrics_snapshot(&self) -> ClientMetricsSnapshot {
        self.inner.metrics.snapshot()
    }

    pub(crate) fn notifier(&self) -> &Arc<dyn Notifier> {
        &self.inner.notifier
    }

    /// Runs one logical call and decodes the envelope's `data` into `T`.
    ///
    /// A newer call with the same fingerprint supersedes this one, which then
    /// resolves with a `Cancelled` error.
    pub async fn execute<T>(&self, descriptor: RequestDescriptor) -> Result<T, ApiError>
    where
        T: DeserializeOwned,
    {
        let registration = self
            .inner
            .registry
            .register(descriptor.fingerprint().clone());
        let handle = registration.handle().clone();
        self.inner.metrics.record_request_started();
        let _in_flight = self.inner.metrics.enter_in_flight();
        let started = Instant::now();

        let result = self
            .execute_with_retry(&descriptor, &handle)
            .await
            .and_then(decode_data::<T>);
        registration.release();

        if let Err(error) = &result
            && error.requires_reauth()
        {
            self.inner.unauthorized.handle();
        }
        self.inner
            .metrics
            .record_request_completed(&result, started.elapsed());
        result
    }

    async fn execute_with_retry(
        &self,
        descriptor: &RequestDescriptor,
        handle: &CancellationHandle,
    ) -> Result<Value, ApiError> {
        let (uri_text, uri) = resolve_uri(&self.inner.base_url, &descriptor.target())?;
        let redacted_uri = redact_uri_for_logs(&uri_text);
        let retry_policy = descriptor
            .retry_policy()
            .cloned()
            .unwrap_or_else(|| self.inner.retry_policy.clone());
        let timeout = descriptor.timeout().unwrap_or(self.inner.request_timeout);
        let max_retries = retry_policy.configured_max_retries();
        let max_attempts = max_retries.saturating_add(1);
        let method = descriptor.method().clone();
        let fingerprint = descriptor.fingerprint();

        let (body, content_type) = descriptor.encode_body();
        let mut headers = merge_headers(&self.inner.default_headers, descriptor.headers());
        if let Some(content_type) = content_type
            && !headers.contains_key(CONTENT_TYPE)
        {
            headers.insert(CONTENT_TYPE, content_type);
        }

        let mut retries = 0_u32;
        loop {
            let attempt_number = retries.saturating_add(1);
            let span = info_span!(
                "reqflow.request",
                method = %method,
                uri = %redacted_uri,
                fingerprint = %fingerprint,
                attempt = attempt_number,
                max_attempts = max_attempts
            );
            let context = RequestContext::new(
                method.clone(),
                redacted_uri.clone(),
                fingerprint.clone(),
                attempt_number,
                max_attempts,
            );
            let attempt = Attempt {
                context: &context,
                uri: &uri,
                headers: &headers,
                body: &body,
                progress: descriptor.progress(),
                timeout,
                handle,
            };
            let error = match self.send_attempt(attempt).instrument(span.clone()).await {
                Ok(data) => return Ok(data),
                Err(error) => error,
            };

            if error.is_cancelled() {
                span.in_scope(|| debug!("request cancelled"));
                self.notify_cancelled(&context);
                return Err(error);
            }

            let decision = RetryDecision {
                attempts_so_far: retries,
                max_retries,
                method: method.clone(),
                uri: redacted_uri.clone(),
                kind: error.kind(),
                code: error.code(),
            };
            if !retry_policy.should_retry_decision(&error, &decision) {
                self.run_error_interceptors(&context, &error);
                return Err(error);
            }

            retries = attempt_number;
            let delay = retry_policy.delay_for(retries);
            span.in_scope(|| {
                warn!(
                    delay_ms = delay.as_millis() as u64,
                    error = %error,
                    "retrying request"
                )
            });
            self.inner.metrics.record_retry();
            if let Some(observer) = &self.inner.observer {
                observer.on_retry_scheduled(&context, &error, delay);
            }

            tokio::select! {
                biased;
                _ = handle.cancelled() => {
                    self.notify_cancelled(&context);
                    return Err(classify(TransportOutcome::Aborted));
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    async fn send_attempt(&self, attempt: Attempt<'_>) -> Result<Value, ApiError> {
        let Attempt {
            context,
            uri,
            headers,
            body,
            progress,
            timeout,
            handle,
        } = attempt;
        if handle.is_cancelled() {
            return Err(classify(TransportOutcome::Aborted));
        }
        if let Some(observer) = &self.inner.observer {
            observer.on_request_start(context);
        }

        let mut attempt_headers = headers.clone();
        self.inner.auth.on_request(context, &mut attempt_headers);
        self.run_request_interceptors(context, &mut attempt_headers);
        let request = TransportRequest {
            method: context.method().clone(),
            uri: uri.clone(),
            headers: attempt_headers,
            body: body.clone(),
            progress: progress.cloned(),
        };

        debug!("sending request");
        let outcome = tokio::select! {
            biased;
            _ = handle.cancelled() => return Err(classify(TransportOutcome::Aborted)),
            outcome = tokio::time::timeout(timeout, self.inner.transport.send(request)) => outcome,
        };
        // A completion that raced a cancel is still a cancellation.
        if handle.is_cancelled() {
            return Err(classify(TransportOutcome::Aborted));
        }

        let response = match outcome {
            Err(_) => return Err(classify(TransportOutcome::TimedOut { timeout })),
            Ok(Err(error)) => {
                debug!(kind = %error.kind(), "transport failed without a response");
                return Err(classify(TransportOutcome::NoResponse {
                    kind: error.kind(),
                    message: error.message().to_owned(),
                }));
            }
            Ok(Ok(response)) => response,
        };
        debug!(status = response.status.as_u16(), "received response");
        self.run_response_interceptors(context, response.status, &response.headers);
        unwrap_response(&response)
    }

    fn notify_cancelled(&self, context: &RequestContext) {
        if let Some(observer) = &self.inner.observer {
            observer.on_cancelled(context);
        }
    }

    fn run_request_interceptors(&self, context: &RequestContext, headers: &mut HeaderMap) {
        for interceptor in &self.inner.interceptors {
            interceptor.on_request(context, headers);
        }
    }

    fn run_response_interceptors(
        &self,
        context: &RequestContext,
        status: StatusCode,
        headers: &HeaderMap,
    ) {
        for interceptor in &self.inner.interceptors {
            interceptor.on_response(context, status, headers);
        }
    }

    fn run_error_interceptors(&self, context: &RequestContext, error: &ApiError) {
        for interceptor in &self.inner.interceptors {
            interceptor.on_error(context, error);
        }
    }
}

fn decode_data<T: DeserializeOwned>(data: Value) -> Result<T, ApiError> {
    T::deserialize(&data).map_err(|error| {
        ApiError::decode_failure(
            format!("failed to decode response data: {error}"),
            Some(data),
        )
    })
}
