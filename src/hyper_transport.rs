use std::time::Duration;

use futures_util::future::BoxFuture;
use http::header::{ACCEPT_ENCODING, CONTENT_ENCODING, CONTENT_LENGTH, HeaderValue};
use hyper::body::Incoming;
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::TokioExecutor;
use tracing::debug;

use crate::body::{
    ReadBodyError, ReqBody, buffered_req_body, build_http_request, progress_req_body,
    read_all_body_limited,
};
use crate::content_encoding::{DecodeContentEncodingError, decode_body_limited, should_decode};
use crate::error::ConfigError;
use crate::transport::{RawResponse, Transport, TransportError, TransportErrorKind, TransportRequest};
use crate::util::{classify_transport_error, redact_uri_for_logs};

#[cfg(feature = "rustls")]
use hyper_rustls::{HttpsConnector, HttpsConnectorBuilder};

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(90);
const DEFAULT_POOL_MAX_IDLE_PER_HOST: usize = 8;
const DEFAULT_MAX_RESPONSE_BODY_BYTES: usize = 8 * 1024 * 1024;
const SUPPORTED_ENCODINGS: &str = "gzip, deflate";

#[cfg(feature = "rustls")]
type Connector = HttpsConnector<HttpConnector>;
#[cfg(not(feature = "rustls"))]
type Connector = HttpConnector;

/// [`Transport`] backed by a pooled hyper client.
///
/// Responses are read fully into memory (bounded by `max_response_body_bytes`)
/// and gzip/deflate bodies are inflated before they reach the envelope decoder.
#[derive(Clone)]
pub struct HyperTransport {
    client: Client<Connector, ReqBody>,
    max_response_body_bytes: usize,
}

impl std::fmt::Debug for HyperTransport {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("HyperTransport")
            .field("max_response_body_bytes", &self.max_response_body_bytes)
            .finish_non_exhaustive()
    }
}

impl HyperTransport {
    pub fn builder() -> HyperTransportBuilder {
        HyperTransportBuilder::new()
    }

    async fn execute(&self, request: TransportRequest) -> Result<RawResponse, TransportError> {
        let TransportRequest {
            method,
            uri,
            mut headers,
            body,
            progress,
        } = request;
        let redacted = redact_uri_for_logs(&uri.to_string());
        if !headers.contains_key(ACCEPT_ENCODING) {
            headers.insert(ACCEPT_ENCODING, HeaderValue::from_static(SUPPORTED_ENCODINGS));
        }
        let request_body = match progress {
            Some(callback) => {
                // Streamed bodies would otherwise go out chunked.
                if !headers.contains_key(CONTENT_LENGTH) {
                    headers.insert(CONTENT_LENGTH, HeaderValue::from(body.len()));
                }
                progress_req_body(body, callback)
            }
            None => buffered_req_body(body),
        };
        let http_request = build_http_request(method.clone(), uri, &headers, request_body)
            .map_err(|error| TransportError::new(TransportErrorKind::Other, error.to_string()))?;

        let response = self.client.request(http_request).await.map_err(|error| {
            let kind = classify_transport_error(&error);
            debug!(uri = %redacted, %kind, "transport request failed");
            TransportError::new(kind, error.to_string())
        })?;

        let (parts, body) = response.into_parts();
        let body = self.read_body(body).await?;
        let mut headers = parts.headers;
        let body = if should_decode(&method, parts.status, body.len()) {
            let decoded = decode_body_limited(body, &headers, self.max_response_body_bytes)
                .map_err(|error| match error {
                    DecodeContentEncodingError::TooLarge { .. } => {
                        TransportError::new(TransportErrorKind::Read, error.to_string())
                    }
                    DecodeContentEncodingError::Decode { .. } => {
                        TransportError::new(TransportErrorKind::Decode, error.to_string())
                    }
                })?;
            headers.remove(CONTENT_ENCODING);
            headers.remove(CONTENT_LENGTH);
            decoded
        } else {
            body
        };

        Ok(RawResponse {
            status: parts.status,
            headers,
            body,
        })
    }

    async fn read_body(&self, body: Incoming) -> Result<bytes::Bytes, TransportError> {
        read_all_body_limited(body, self.max_response_body_bytes)
            .await
            .map_err(|error| match error {
                ReadBodyError::Read(source) => {
                    TransportError::new(TransportErrorKind::Read, source.to_string())
                }
                ReadBodyError::TooLarge { actual_bytes } => TransportError::new(
                    TransportErrorKind::Read,
                    format!(
                        "response body exceeds limit of {} bytes ({actual_bytes} bytes read)",
                        self.max_response_body_bytes
                    ),
                ),
            })
    }
}

impl Transport for HyperTransport {
    fn send(&self, request: TransportRequest) -> BoxFuture<'_, Result<RawResponse, TransportError>> {
        Box::pin(self.execute(request))
    }
}

pub struct HyperTransportBuilder {
    connect_timeout: Duration,
    pool_idle_timeout: Duration,
    pool_max_idle_per_host: usize,
    http2_only: bool,
    max_response_body_bytes: usize,
}

impl HyperTransportBuilder {
    fn new() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            pool_idle_timeout: DEFAULT_POOL_IDLE_TIMEOUT,
            pool_max_idle_per_host: DEFAULT_POOL_MAX_IDLE_PER_HOST,
            http2_only: false,
            max_response_body_bytes: DEFAULT_MAX_RESPONSE_BODY_BYTES,
        }
    }

    pub fn connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout.max(Duration::from_millis(1));
        self
    }

    pub fn pool_idle_timeout(mut self, pool_idle_timeout: Duration) -> Self {
        self.pool_idle_timeout = pool_idle_timeout.max(Duration::from_millis(1));
        self
    }

    pub fn pool_max_idle_per_host(mut self, pool_max_idle_per_host: usize) -> Self {
        self.pool_max_idle_per_host = pool_max_idle_per_host.max(1);
        self
    }

    pub fn http2_only(mut self, http2_only: bool) -> Self {
        self.http2_only = http2_only;
        self
    }

    pub fn max_response_body_bytes(mut self, max_response_body_bytes: usize) -> Self {
        self.max_response_body_bytes = max_response_body_bytes.max(1);
        self
    }

    pub fn try_build(self) -> Result<HyperTransport, ConfigError> {
        let mut http = HttpConnector::new();
        http.enforce_http(false);
        http.set_connect_timeout(Some(self.connect_timeout));
        let connector = wrap_connector(http)?;
        let client = Client::builder(TokioExecutor::new())
            .pool_idle_timeout(self.pool_idle_timeout)
            .pool_max_idle_per_host(self.pool_max_idle_per_host)
            .http2_only(self.http2_only)
            .build(connector);
        Ok(HyperTransport {
            client,
            max_response_body_bytes: self.max_response_body_bytes,
        })
    }

    /// Panics when the TLS stack cannot be initialised; use
    /// [`HyperTransportBuilder::try_build`] to handle that case.
    pub fn build(self) -> HyperTransport {
        match self.try_build() {
            Ok(transport) => transport,
            Err(error) => panic!("failed to build hyper transport: {error}"),
        }
    }
}

#[cfg(feature = "rustls")]
fn wrap_connector(http: HttpConnector) -> Result<Connector, ConfigError> {
    let https = HttpsConnectorBuilder::new()
        .with_provider_and_webpki_roots(rustls::crypto::ring::default_provider())
        .map_err(|error| ConfigError::TransportInit {
            message: error.to_string(),
        })?
        .https_or_http()
        .enable_http1()
        .enable_http2()
        .wrap_connector(http);
    Ok(https)
}

#[cfg(not(feature = "rustls"))]
fn wrap_connector(http: HttpConnector) -> Result<Connector, ConfigError> {
    Ok(http)
}
