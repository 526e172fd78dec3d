use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http::header::{CONTENT_TYPE, HeaderName, HeaderValue};
use http::{HeaderMap, Method};
use serde::Serialize;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use crate::body::MultipartForm;
use crate::error::ConfigError;
use crate::retry::RetryPolicy;
use crate::transport::{ProgressCallback, UploadProgress};
use crate::util::{append_query_pairs, encode_hex_lower, parse_header_name, parse_header_value};

/// Deterministic identity of "the same logical request": method, url, params and body.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn compute(method: &Method, url: &str, params: &Map<String, Value>, body: &RequestBody) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(method.as_str().as_bytes());
        hasher.update([0_u8]);
        hasher.update(url.as_bytes());
        hasher.update([0_u8]);
        let mut canonical = String::new();
        write_canonical_object(params, &mut canonical);
        hasher.update(canonical.as_bytes());
        hasher.update([0_u8]);
        body.update_fingerprint(&mut hasher);
        Self(encode_hex_lower(&hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn short(&self) -> &str {
        &self.0[..self.0.len().min(12)]
    }
}

/// JSON text with object keys sorted at every depth, independent of the map's
/// iteration order.
fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => write_canonical_object(map, out),
        Value::Array(items) => {
            out.push('[');
            for (index, item) in items.iter().enumerate() {
                if index > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

fn write_canonical_object(map: &Map<String, Value>, out: &mut String) {
    let mut entries: Vec<(&String, &Value)> = map.iter().collect();
    entries.sort_unstable_by(|left, right| left.0.cmp(right.0));
    out.push('{');
    for (index, (key, value)) in entries.into_iter().enumerate() {
        if index > 0 {
            out.push(',');
        }
        out.push_str(&Value::String(key.clone()).to_string());
        out.push(':');
        write_canonical(value, out);
    }
    out.push('}');
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter.write_str(self.short())
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub enum RequestBody {
    #[default]
    Empty,
    Json(Value),
    Multipart(MultipartForm),
}

impl RequestBody {
    fn update_fingerprint(&self, hasher: &mut Sha256) {
        match self {
            Self::Empty => hasher.update(b"empty"),
            Self::Json(value) => {
                let mut canonical = String::new();
                write_canonical(value, &mut canonical);
                hasher.update(b"json:");
                hasher.update(canonical.as_bytes());
            }
            Self::Multipart(form) => {
                hasher.update(b"multipart:");
                form.update_fingerprint(hasher);
            }
        }
    }

    pub(crate) fn encode(&self) -> (Bytes, Option<HeaderValue>) {
        match self {
            Self::Empty => (Bytes::new(), None),
            Self::Json(value) => (
                Bytes::from(value.to_string()),
                Some(HeaderValue::from_static("application/json")),
            ),
            Self::Multipart(form) => (
                form.encode(),
                HeaderValue::from_str(&form.content_type()).ok(),
            ),
        }
    }
}

/// One fully-specified call. Immutable once built; the fingerprint is fixed at build time.
#[derive(Clone)]
pub struct RequestDescriptor {
    method: Method,
    url: String,
    params: Map<String, Value>,
    body: RequestBody,
    headers: HeaderMap,
    timeout: Option<Duration>,
    retry_policy: Option<RetryPolicy>,
    progress: Option<ProgressCallback>,
    fingerprint: Fingerprint,
}

impl std::fmt::Debug for RequestDescriptor {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("RequestDescriptor")
            .field("method", &self.method)
            .field("url", &self.url)
            .field("params", &self.params)
            .field("body", &self.body)
            .field("headers", &self.headers)
            .field("timeout", &self.timeout)
            .field("retry_policy", &self.retry_policy)
            .field("progress", &self.progress.is_some())
            .field("fingerprint", &self.fingerprint)
            .finish()
    }
}

impl RequestDescriptor {
    pub fn builder(method: Method, url: impl Into<String>) -> RequestDescriptorBuilder {
        RequestDescriptorBuilder::new(method, url.into())
    }

    pub fn get(url: impl Into<String>) -> RequestDescriptorBuilder {
        Self::builder(Method::GET, url)
    }

    pub fn post(url: impl Into<String>) -> RequestDescriptorBuilder {
        Self::builder(Method::POST, url)
    }

    pub fn put(url: impl Into<String>) -> RequestDescriptorBuilder {
        Self::builder(Method::PUT, url)
    }

    pub fn patch(url: impl Into<String>) -> RequestDescriptorBuilder {
        Self::builder(Method::PATCH, url)
    }

    pub fn delete(url: impl Into<String>) -> RequestDescriptorBuilder {
        Self::builder(Method::DELETE, url)
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn params(&self) -> &Map<String, Value> {
        &self.params
    }

    pub fn body(&self) -> &RequestBody {
        &self.body
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn retry_policy(&self) -> Option<&RetryPolicy> {
        self.retry_policy.as_ref()
    }

    pub fn fingerprint(&self) -> &Fingerprint {
        &self.fingerprint
    }

    pub(crate) fn progress(&self) -> Option<&ProgressCallback> {
        self.progress.as_ref()
    }

    /// The url with params appended as a query string.
    pub fn target(&self) -> String {
        append_query_pairs(&self.url, &query_pairs(&self.params))
    }

    pub(crate) fn with_retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
        self.retry_policy = Some(retry_policy);
        self
    }

    pub(crate) fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout.max(Duration::from_millis(1)));
        self
    }

    pub(crate) fn encode_body(&self) -> (Bytes, Option<HeaderValue>) {
        self.body.encode()
    }
}

pub struct RequestDescriptorBuilder {
    method: Method,
    url: String,
    params: Map<String, Value>,
    body: RequestBody,
    headers: HeaderMap,
    timeout: Option<Duration>,
    retry_policy: Option<RetryPolicy>,
    progress: Option<ProgressCallback>,
}

impl RequestDescriptorBuilder {
    fn new(method: Method, url: String) -> Self {
        Self {
            method,
            url,
            params: Map::new(),
            body: RequestBody::Empty,
            headers: HeaderMap::new(),
            timeout: None,
            retry_policy: None,
            progress: None,
        }
    }

    pub fn param(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(name.into(), value.into());
        self
    }

    pub fn params(mut self, params: Map<String, Value>) -> Self {
        self.params.extend(params);
        self
    }

    pub fn params_from<T>(self, params: &T) -> Result<Self, ConfigError>
    where
        T: Serialize + ?Sized,
    {
        match serde_json::to_value(params).map_err(|source| ConfigError::Serialize { source })? {
            Value::Object(map) => Ok(self.params(map)),
            Value::Null => Ok(self),
            _ => Err(ConfigError::ParamsNotObject),
        }
    }

    pub fn json(mut self, body: Value) -> Self {
        self.body = RequestBody::Json(body);
        self
    }

    pub fn json_from<T>(self, body: &T) -> Result<Self, ConfigError>
    where
        T: Serialize + ?Sized,
    {
        let body = serde_json::to_value(body).map_err(|source| ConfigError::Serialize { source })?;
        Ok(self.json(body))
    }

    pub fn multipart(mut self, form: MultipartForm) -> Self {
        self.body = RequestBody::Multipart(form);
        self
    }

    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn try_header(self, name: &str, value: &str) -> Result<Self, ConfigError> {
        let name = parse_header_name(name)?;
        let value = parse_header_value(name.as_str(), value)?;
        Ok(self.header(name, value))
    }

    pub fn content_type(self, value: HeaderValue) -> Self {
        self.header(CONTENT_TYPE, value)
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout.max(Duration::from_millis(1)));
        self
    }

    pub fn retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
        self.retry_policy = Some(retry_policy);
        self
    }

    pub fn on_progress<F>(mut self, callback: F) -> Self
    where
        F: Fn(UploadProgress) + Send + Sync + 'static,
    {
        self.progress = Some(Arc::new(callback));
        self
    }

    pub fn build(self) -> RequestDescriptor {
        let fingerprint = Fingerprint::compute(&self.method, &self.url, &self.params, &self.body);
        RequestDescriptor {
            method: self.method,
            url: self.url,
            params: self.params,
            body: self.body,
            headers: self.headers,
            timeout: self.timeout,
            retry_policy: self.retry_policy,
            progress: self.progress,
            fingerprint,
        }
    }
}

pub(crate) fn query_pairs(params: &Map<String, Value>) -> Vec<(String, String)> {
    let mut pairs = Vec::with_capacity(params.len());
    for (name, value) in params {
        match value {
            Value::Null => {}
            Value::Array(items) => {
                for item in items.iter().filter(|item| !item.is_null()) {
                    pairs.push((name.clone(), scalar_text(item)));
                }
            }
            other => pairs.push((name.clone(), scalar_text(other))),
        }
    }
    pairs
}

fn scalar_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use http::Method;
    use serde::Serialize;
    use serde_json::json;

    use serde_json::{Map, Value};

    use super::{RequestDescriptor, write_canonical};
    use crate::error::ConfigError;

    #[test]
    fn canonical_json_sorts_keys_at_every_depth() {
        let mut inner = Map::new();
        inner.insert("zone".to_owned(), json!("b"));
        inner.insert("area".to_owned(), json!(1));
        let mut outer = Map::new();
        outer.insert("tags".to_owned(), json!([Value::Object(inner), "x"]));
        outer.insert("name".to_owned(), json!("a\"b"));

        let mut out = String::new();
        write_canonical(&Value::Object(outer), &mut out);
        assert_eq!(out, r#"{"name":"a\"b","tags":[{"area":1,"zone":"b"},"x"]}"#);
    }

    #[test]
    fn json_body_fingerprint_ignores_key_insertion_order() {
        let mut first = Map::new();
        first.insert("title".to_owned(), json!("ride"));
        first.insert("capacity".to_owned(), json!({"max": 30, "min": 2}));
        let mut second = Map::new();
        second.insert("capacity".to_owned(), json!({"min": 2, "max": 30}));
        second.insert("title".to_owned(), json!("ride"));

        let a = RequestDescriptor::post("/activities").json(Value::Object(first)).build();
        let b = RequestDescriptor::post("/activities").json(Value::Object(second)).build();
        assert_eq!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn fingerprint_ignores_param_insertion_order() {
        let a = RequestDescriptor::get("/activities")
            .param("keyword", "run")
            .param("page", 1)
            .build();
        let b = RequestDescriptor::get("/activities")
            .param("page", 1)
            .param("keyword", "run")
            .build();
        assert_eq!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn fingerprint_distinguishes_method_params_and_body() {
        let get = RequestDescriptor::get("/columns").build();
        let delete = RequestDescriptor::delete("/columns").build();
        let paged = RequestDescriptor::get("/columns").param("page", 2).build();
        let with_body = RequestDescriptor::post("/columns")
            .json(json!({"name": "a"}))
            .build();
        let other_body = RequestDescriptor::post("/columns")
            .json(json!({"name": "b"}))
            .build();

        assert_ne!(get.fingerprint(), delete.fingerprint());
        assert_ne!(get.fingerprint(), paged.fingerprint());
        assert_ne!(with_body.fingerprint(), other_body.fingerprint());
    }

    #[test]
    fn headers_and_timeout_do_not_change_fingerprint() {
        let plain = RequestDescriptor::get("/records").build();
        let tuned = RequestDescriptor::get("/records")
            .try_header("x-trace-id", "abc")
            .expect("valid header")
            .timeout(std::time::Duration::from_secs(1))
            .build();
        assert_eq!(plain.fingerprint(), tuned.fingerprint());
    }

    #[test]
    fn target_appends_scalar_and_array_params() {
        let descriptor = RequestDescriptor::builder(Method::GET, "/records")
            .param("page", 2)
            .param("tags", json!(["a", null, "b"]))
            .param("skip", json!(null))
            .build();
        assert_eq!(descriptor.target(), "/records?page=2&tags=a&tags=b");
    }

    #[test]
    fn params_from_requires_object() {
        #[derive(Serialize)]
        struct Query {
            keyword: &'static str,
        }

        let descriptor = RequestDescriptor::get("/activities")
            .params_from(&Query { keyword: "x" })
            .expect("object params")
            .build();
        assert_eq!(descriptor.params().get("keyword"), Some(&json!("x")));

        let error = RequestDescriptor::get("/activities")
            .params_from(&[1, 2])
            .err()
            .expect("array params are rejected");
        assert!(matches!(error, ConfigError::ParamsNotObject));
    }
}
