//! `reqflow` is a request orchestration layer for JSON API clients.
//!
//! It sits on top of a raw HTTP transport and adds envelope unwrapping, error
//! classification, per-fingerprint dedup and cancellation, linear retry, and
//! stateful request tasks with debounce/throttle admission and pagination.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::time::Duration;
//! use reqflow::prelude::{RetryPolicy, TransportClient};
//! use serde::Deserialize;
//!
//! #[derive(Debug, Deserialize)]
//! struct Activity {
//!     id: u64,
//!     title: String,
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = TransportClient::builder("https://api.example.com/v1")
//!         .request_timeout(Duration::from_secs(5))
//!         .retry_policy(
//!             RetryPolicy::standard()
//!                 .max_retries(2)
//!                 .base_delay(Duration::from_millis(200)),
//!         )
//!         .try_build()?;
//!
//!     let activity: Activity = client.get("/activities/42").send().await?;
//!     println!("{} {}", activity.id, activity.title);
//!     Ok(())
//! }
//! ```
//!
//! # Request tasks
//!
//! [`RequestTask`] binds a descriptor factory to observable
//! [`RequestState`]; [`PaginatedRequestTask`] adds page/page-size bookkeeping.
//! Both spawn onto the ambient tokio runtime.

mod admission;
mod auth;
mod body;
mod classify;
mod client;
mod config;
mod content_encoding;
mod descriptor;
mod envelope;
mod error;
mod hyper_transport;
mod metrics;
mod observe;
mod paginate;
mod policy;
mod registry;
mod request;
mod retry;
mod task;
mod transport;
mod util;

pub use crate::admission::{
    AdmissionControl, AdmissionPhase, Clock, DebounceTicket, Debouncer, ThrottleAdmission,
    Throttler, TokioClock,
};
pub use crate::auth::{
    AuthInjector, MemorySessionStore, Navigator, NoopNavigator, SessionStore, session_token,
};
pub use crate::body::MultipartForm;
pub use crate::classify::{TransportOutcome, classify, status_text};
pub use crate::client::{TransportClient, TransportClientBuilder};
pub use crate::config::{ErrorHook, PaginationOptions, SuccessHook, TaskOptions};
pub use crate::descriptor::{Fingerprint, RequestBody, RequestDescriptor, RequestDescriptorBuilder};
pub use crate::envelope::{BUSINESS_SUCCESS_CODE, ResponseEnvelope};
pub use crate::error::{
    ApiError, CANCELLED_CODE, ConfigError, DECODE_FAILURE_CODE, ErrorKind, INVALID_REQUEST_CODE,
    TRANSPORT_FAILURE_CODE,
};
pub use crate::hyper_transport::{HyperTransport, HyperTransportBuilder};
pub use crate::metrics::ClientMetricsSnapshot;
pub use crate::observe::{Notifier, Observer, TracingNotifier};
pub use crate::paginate::{
    Page, PageQuery, PagedPayload, PaginatedRequestTask, PaginationState,
};
pub use crate::policy::{HttpInterceptor, RequestContext};
pub use crate::registry::{CancellationHandle, PendingRequestRegistry, Registration};
pub use crate::request::RequestBuilder;
pub use crate::retry::{RetryClassifier, RetryDecision, RetryPolicy};
pub use crate::task::{DescriptorFactory, RequestState, RequestTask, TaskPhase};
pub use crate::transport::{
    ProgressCallback, RawResponse, Transport, TransportError, TransportErrorKind,
    TransportRequest, UploadProgress,
};

pub type Result<T> = std::result::Result<T, ApiError>;

pub mod prelude {
    pub use crate::{
        ApiError, ConfigError, ErrorKind, MultipartForm, Page, PaginatedRequestTask,
        PaginationOptions, RequestDescriptor, RequestState, RequestTask, RetryPolicy, TaskOptions,
        TaskPhase, TransportClient,
    };
}
