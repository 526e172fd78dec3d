use std::convert::Infallible;
use std::error::Error as StdError;
use std::path::Path;

use bytes::{Bytes, BytesMut};
use futures_core::Stream;
use futures_util::StreamExt;
use futures_util::stream;
use http::{HeaderMap, Method, Request, Uri};
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Full, StreamBody};
use hyper::body::{Frame, Incoming};
use rand::RngExt;
use sha2::{Digest, Sha256};

use crate::error::ConfigError;
use crate::transport::{ProgressCallback, UploadProgress};

type BoxBodyError = Box<dyn StdError + Send + Sync>;
pub(crate) type ReqBody = BoxBody<Bytes, BoxBodyError>;

const UPLOAD_CHUNK_BYTES: usize = 16 * 1024;

#[derive(Clone, Debug, PartialEq)]
struct Part {
    name: String,
    file_name: Option<String>,
    content_type: Option<String>,
    data: Bytes,
}

/// A `multipart/form-data` body for `upload` requests.
#[derive(Clone, Debug, PartialEq)]
pub struct MultipartForm {
    boundary: String,
    parts: Vec<Part>,
}

impl Default for MultipartForm {
    fn default() -> Self {
        Self::new()
    }
}

impl MultipartForm {
    pub fn new() -> Self {
        let mut rng = rand::rng();
        let boundary = format!(
            "----reqflow-{:016x}{:016x}",
            rng.random_range(0..u64::MAX),
            rng.random_range(0..u64::MAX)
        );
        Self {
            boundary,
            parts: Vec::new(),
        }
    }

    pub fn text(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.parts.push(Part {
            name: name.into(),
            file_name: None,
            content_type: None,
            data: Bytes::from(value.into()),
        });
        self
    }

    pub fn bytes(
        mut self,
        name: impl Into<String>,
        file_name: impl Into<String>,
        content_type: impl Into<String>,
        data: impl Into<Bytes>,
    ) -> Self {
        self.parts.push(Part {
            name: name.into(),
            file_name: Some(file_name.into()),
            content_type: Some(content_type.into()),
            data: data.into(),
        });
        self
    }

    pub async fn file(self, name: impl Into<String>, path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let name = name.into();
        let path = path.as_ref();
        let data = tokio::fs::read(path)
            .await
            .map_err(|source| ConfigError::ReadPart {
                name: name.clone(),
                source,
            })?;
        let file_name = path
            .file_name()
            .map(|file_name| file_name.to_string_lossy().into_owned())
            .unwrap_or_else(|| name.clone());
        Ok(self.bytes(name, file_name, "application/octet-stream", data))
    }

    pub fn boundary(&self) -> &str {
        &self.boundary
    }

    pub fn content_type(&self) -> String {
        format!("multipart/form-data; boundary={}", self.boundary)
    }

    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    // The boundary is random per form and stays out of the fingerprint.
    pub(crate) fn update_fingerprint(&self, hasher: &mut Sha256) {
        for part in &self.parts {
            hasher.update(part.name.as_bytes());
            hasher.update([0_u8]);
            hasher.update(part.file_name.as_deref().unwrap_or_default().as_bytes());
            hasher.update([0_u8]);
            hasher.update(&part.data);
            hasher.update([0_u8]);
        }
    }

    pub(crate) fn encode(&self) -> Bytes {
        let mut encoded = BytesMut::new();
        for part in &self.parts {
            encoded.extend_from_slice(b"--");
            encoded.extend_from_slice(self.boundary.as_bytes());
            encoded.extend_from_slice(b"\r\n");
            let disposition = match &part.file_name {
                Some(file_name) => format!(
                    "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\n",
                    escape_quoted(&part.name),
                    escape_quoted(file_name)
                ),
                None => format!(
                    "Content-Disposition: form-data; name=\"{}\"\r\n",
                    escape_quoted(&part.name)
                ),
            };
            encoded.extend_from_slice(disposition.as_bytes());
            if let Some(content_type) = &part.content_type {
                encoded.extend_from_slice(format!("Content-Type: {content_type}\r\n").as_bytes());
            }
            encoded.extend_from_slice(b"\r\n");
            encoded.extend_from_slice(&part.data);
            encoded.extend_from_slice(b"\r\n");
        }
        encoded.extend_from_slice(b"--");
        encoded.extend_from_slice(self.boundary.as_bytes());
        encoded.extend_from_slice(b"--\r\n");
        encoded.freeze()
    }
}

fn escape_quoted(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace(['\r', '\n'], " ")
}

fn map_infallible_to_box_error(never: Infallible) -> BoxBodyError {
    match never {}
}

pub(crate) fn buffered_req_body(body: Bytes) -> ReqBody {
    Full::new(body).map_err(map_infallible_to_box_error).boxed()
}

/// Splits `body` into chunks and reports progress as the transport pulls each one.
pub(crate) fn progress_chunks(
    body: Bytes,
    callback: ProgressCallback,
) -> impl Stream<Item = Result<Bytes, Infallible>> + Send + Sync + 'static {
    let total = body.len() as u64;
    let mut offsets = (0..body.len()).step_by(UPLOAD_CHUNK_BYTES).collect::<Vec<_>>();
    if offsets.is_empty() {
        offsets.push(0);
    }
    stream::iter(offsets).map(move |start| {
        let end = (start + UPLOAD_CHUNK_BYTES).min(body.len());
        let chunk = body.slice(start..end);
        callback(UploadProgress {
            sent: end as u64,
            total,
        });
        Ok(chunk)
    })
}

pub(crate) fn progress_req_body(body: Bytes, callback: ProgressCallback) -> ReqBody {
    BodyExt::boxed(StreamBody::new(
        progress_chunks(body, callback).map(|item| item.map(Frame::data).map_err(map_infallible_to_box_error)),
    ))
}

pub(crate) fn build_http_request(
    method: Method,
    uri: Uri,
    headers: &HeaderMap,
    body: ReqBody,
) -> Result<Request<ReqBody>, http::Error> {
    let mut request_builder = Request::builder().method(method).uri(uri);
    for (name, value) in headers {
        request_builder = request_builder.header(name, value);
    }
    request_builder.body(body)
}

pub(crate) enum ReadBodyError {
    Read(hyper::Error),
    TooLarge { actual_bytes: usize },
}

pub(crate) async fn read_all_body_limited(
    mut body: Incoming,
    max_bytes: usize,
) -> Result<Bytes, ReadBodyError> {
    let mut collected = Vec::new();
    let mut total_len = 0_usize;

    while let Some(frame) = body.frame().await {
        let frame = frame.map_err(ReadBodyError::Read)?;
        if let Some(data) = frame.data_ref() {
            total_len = total_len.saturating_add(data.len());
            if total_len > max_bytes {
                return Err(ReadBodyError::TooLarge {
                    actual_bytes: total_len,
                });
            }
            collected.extend_from_slice(data);
        }
    }

    Ok(Bytes::from(collected))
}
