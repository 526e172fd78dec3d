use serde_json::Value;
use thiserror::Error;

/// Code carried by errors raised when the orchestration layer cancels a call.
pub const CANCELLED_CODE: i64 = -2;
/// Code carried by transport-level failures that never produced a response.
pub const TRANSPORT_FAILURE_CODE: i64 = -1;
/// Code carried by successful responses whose payload could not be decoded.
pub const DECODE_FAILURE_CODE: i64 = -3;
/// Code carried by requests that could not be turned into a valid uri.
pub const INVALID_REQUEST_CODE: i64 = -4;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ErrorKind {
    Cancelled,
    Timeout,
    Network,
    ServerError,
    ClientError,
    Business,
}

impl ErrorKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Cancelled => "cancelled",
            Self::Timeout => "timeout",
            Self::Network => "network",
            Self::ServerError => "server_error",
            Self::ClientError => "client_error",
            Self::Business => "business",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter.write_str(self.as_str())
    }
}

/// The single error type surfaced by requests and tasks.
///
/// Built by the classifier and never mutated afterwards; retry and display
/// policy are driven entirely by `kind`, `retryable` and `silent`.
#[derive(Clone, Debug, PartialEq, Error)]
#[error("{message} ({kind}, code {code})")]
pub struct ApiError {
    kind: ErrorKind,
    code: i64,
    message: String,
    details: Option<Value>,
    retryable: bool,
    silent: bool,
    requires_reauth: bool,
}

impl ApiError {
    pub(crate) fn new(kind: ErrorKind, code: i64, message: impl Into<String>) -> Self {
        Self {
            kind,
            code,
            message: message.into(),
            details: None,
            retryable: false,
            silent: false,
            requires_reauth: false,
        }
    }

    pub(crate) fn cancelled() -> Self {
        Self::new(ErrorKind::Cancelled, CANCELLED_CODE, "request cancelled").with_silent(true)
    }

    pub(crate) fn decode_failure(message: impl Into<String>, details: Option<Value>) -> Self {
        let mut error = Self::new(ErrorKind::Business, DECODE_FAILURE_CODE, message);
        error.details = details;
        error
    }

    pub(crate) fn invalid_request(uri: &str) -> Self {
        Self::new(
            ErrorKind::ClientError,
            INVALID_REQUEST_CODE,
            format!("invalid request uri: {uri}"),
        )
    }

    pub(crate) fn with_details(mut self, details: Option<Value>) -> Self {
        self.details = details;
        self
    }

    pub(crate) fn with_retryable(mut self, retryable: bool) -> Self {
        self.retryable = retryable;
        self
    }

    pub(crate) fn with_silent(mut self, silent: bool) -> Self {
        self.silent = silent;
        self
    }

    pub(crate) fn with_requires_reauth(mut self, requires_reauth: bool) -> Self {
        self.requires_reauth = requires_reauth;
        self
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn code(&self) -> i64 {
        self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn details(&self) -> Option<&Value> {
        self.details.as_ref()
    }

    pub fn retryable(&self) -> bool {
        self.retryable
    }

    pub fn silent(&self) -> bool {
        self.silent
    }

    pub fn requires_reauth(&self) -> bool {
        self.requires_reauth
    }

    pub fn is_cancelled(&self) -> bool {
        self.kind == ErrorKind::Cancelled
    }
}

/// Misconfiguration detected while building clients, descriptors or tasks.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigError {
    #[error("invalid base url: {url}")]
    InvalidBaseUrl { url: String },
    #[error("debounce and throttle cannot both be configured for one task")]
    ConflictingAdmission,
    #[error("invalid header name {name}: {source}")]
    InvalidHeaderName {
        name: String,
        #[source]
        source: http::header::InvalidHeaderName,
    },
    #[error("invalid header value for {name}: {source}")]
    InvalidHeaderValue {
        name: String,
        #[source]
        source: http::header::InvalidHeaderValue,
    },
    #[error("failed to serialize request json: {source}")]
    Serialize {
        #[source]
        source: serde_json::Error,
    },
    #[error("request params must serialize to a json object")]
    ParamsNotObject,
    #[error("failed to read upload part {name}: {source}")]
    ReadPart {
        name: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to initialize http transport: {message}")]
    TransportInit { message: String },
}
