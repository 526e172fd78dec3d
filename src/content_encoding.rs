use std::io::Read;

use bytes::Bytes;
use http::header::CONTENT_ENCODING;
use http::{HeaderMap, Method, StatusCode};

#[derive(Debug, thiserror::Error)]
pub(crate) enum DecodeContentEncodingError {
    #[error("failed to decode {encoding} body: {message}")]
    Decode { encoding: String, message: String },
    #[error("decoded body exceeds limit ({actual_bytes} bytes)")]
    TooLarge { actual_bytes: usize },
}

fn read_to_end_limited<R: Read>(
    reader: &mut R,
    encoding: &str,
    max_bytes: usize,
) -> Result<Vec<u8>, DecodeContentEncodingError> {
    let mut decoded = Vec::new();
    let mut chunk = [0_u8; 8 * 1024];

    loop {
        let read = reader
            .read(&mut chunk)
            .map_err(|error| DecodeContentEncodingError::Decode {
                encoding: encoding.to_owned(),
                message: error.to_string(),
            })?;
        if read == 0 {
            return Ok(decoded);
        }
        let next_size = decoded.len().saturating_add(read);
        if next_size > max_bytes {
            return Err(DecodeContentEncodingError::TooLarge {
                actual_bytes: next_size,
            });
        }
        decoded.extend_from_slice(&chunk[..read]);
    }
}

pub(crate) fn should_decode(method: &Method, status: StatusCode, body_len: usize) -> bool {
    body_len > 0
        && *method != Method::HEAD
        && !status.is_informational()
        && status != StatusCode::NO_CONTENT
        && status != StatusCode::NOT_MODIFIED
}

/// Undoes `Content-Encoding` layers in reverse order. Only gzip, deflate and
/// identity are understood.
pub(crate) fn decode_body_limited(
    mut body: Bytes,
    headers: &HeaderMap,
    max_bytes: usize,
) -> Result<Bytes, DecodeContentEncodingError> {
    let max_bytes = max_bytes.max(1);
    let Some(content_encoding) = headers.get(CONTENT_ENCODING) else {
        return Ok(body);
    };
    let content_encoding =
        content_encoding
            .to_str()
            .map_err(|error| DecodeContentEncodingError::Decode {
                encoding: "content-encoding".to_owned(),
                message: error.to_string(),
            })?;

    for encoding in content_encoding
        .rsplit(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
    {
        let decoded = match encoding.to_ascii_lowercase().as_str() {
            "identity" => continue,
            "gzip" | "x-gzip" => {
                let mut decoder = flate2::read::GzDecoder::new(body.as_ref());
                read_to_end_limited(&mut decoder, encoding, max_bytes)?
            }
            "deflate" => {
                let mut decoder = flate2::read::ZlibDecoder::new(body.as_ref());
                read_to_end_limited(&mut decoder, encoding, max_bytes)?
            }
            other => {
                return Err(DecodeContentEncodingError::Decode {
                    encoding: other.to_owned(),
                    message: "unsupported content-encoding".to_owned(),
                });
            }
        };
        body = Bytes::from(decoded);
    }

    if body.len() > max_bytes {
        return Err(DecodeContentEncodingError::TooLarge {
            actual_bytes: body.len(),
        });
    }
    Ok(body)
}
