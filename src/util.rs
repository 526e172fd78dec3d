use std::sync::Mutex;

use http::header::{HeaderName, HeaderValue};
use http::{HeaderMap, Uri};

use crate::error::{ApiError, ConfigError};
use crate::transport::TransportErrorKind;

const MAX_ERROR_BODY_LEN: usize = 2048;

pub(crate) fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

pub(crate) fn merge_headers(default_headers: &HeaderMap, request_headers: &HeaderMap) -> HeaderMap {
    let mut merged = default_headers.clone();
    for (name, value) in request_headers {
        merged.insert(name.clone(), value.clone());
    }
    merged
}

pub(crate) fn encode_hex_lower(bytes: &[u8]) -> String {
    const HEX: &[u8; 16] = b"0123456789abcdef";
    let mut encoded = String::with_capacity(bytes.len().saturating_mul(2));
    for byte in bytes {
        encoded.push(HEX[(byte >> 4) as usize] as char);
        encoded.push(HEX[(byte & 0x0f) as usize] as char);
    }
    encoded
}

pub(crate) fn redact_uri_for_logs(uri_text: &str) -> String {
    let Ok(mut parsed) = url::Url::parse(uri_text) else {
        return uri_text.split('?').next().unwrap_or(uri_text).to_owned();
    };

    let _ = parsed.set_username("");
    let _ = parsed.set_password(None);
    parsed.set_query(None);
    parsed.set_fragment(None);
    parsed.to_string()
}

pub(crate) fn validate_base_url(base_url: &str) -> Result<(), ConfigError> {
    let parsed = url::Url::parse(base_url).map_err(|_| ConfigError::InvalidBaseUrl {
        url: base_url.to_owned(),
    })?;
    if !matches!(parsed.scheme(), "http" | "https") || parsed.host_str().is_none() {
        return Err(ConfigError::InvalidBaseUrl {
            url: base_url.to_owned(),
        });
    }
    Ok(())
}

pub(crate) fn resolve_uri(base_url: &str, path: &str) -> Result<(String, Uri), ApiError> {
    let uri_text = match path.split_once("://") {
        Some((scheme, _)) if !scheme.is_empty() && !scheme.contains(['/', '?']) => {
            if !scheme.eq_ignore_ascii_case("http") && !scheme.eq_ignore_ascii_case("https") {
                return Err(ApiError::invalid_request(path));
            }
            path.to_owned()
        }
        _ => join_base_path(base_url, path),
    };
    let uri = uri_text
        .parse()
        .map_err(|_| ApiError::invalid_request(&uri_text))?;
    Ok((uri_text, uri))
}

pub(crate) fn join_base_path(base_url: &str, path: &str) -> String {
    let base = base_url.trim_end_matches('/');
    let relative = path.trim_start_matches('/');
    match (base.is_empty(), relative.is_empty()) {
        (true, true) => String::new(),
        (true, false) => relative.to_owned(),
        (false, true) => base.to_owned(),
        (false, false) => format!("{base}/{relative}"),
    }
}

pub(crate) fn append_query_pairs(path: &str, query_pairs: &[(String, String)]) -> String {
    if query_pairs.is_empty() {
        return path.to_owned();
    }

    let (without_fragment, fragment) = match path.split_once('#') {
        Some((left, right)) => (left, Some(right)),
        None => (path, None),
    };
    let (base, existing_query) = match without_fragment.split_once('?') {
        Some((left, right)) => (left, Some(right)),
        None => (without_fragment, None),
    };

    let mut serializer = url::form_urlencoded::Serializer::new(String::new());
    if let Some(existing_query) = existing_query {
        for (name, value) in url::form_urlencoded::parse(existing_query.as_bytes()) {
            serializer.append_pair(&name, &value);
        }
    }
    for (name, value) in query_pairs {
        serializer.append_pair(name, value);
    }

    let mut merged = format!("{base}?{}", serializer.finish());
    if let Some(fragment) = fragment {
        merged.push('#');
        merged.push_str(fragment);
    }
    merged
}

pub(crate) fn classify_transport_error(
    error: &hyper_util::client::legacy::Error,
) -> TransportErrorKind {
    if error.is_connect() {
        let text = error.to_string().to_ascii_lowercase();
        if text.contains("dns")
            || text.contains("name or service not known")
            || text.contains("failed to lookup address")
        {
            return TransportErrorKind::Dns;
        }
        if text.contains("tls") || text.contains("certificate") || text.contains("handshake") {
            return TransportErrorKind::Tls;
        }
        return TransportErrorKind::Connect;
    }

    let text = error.to_string().to_ascii_lowercase();
    if text.contains("timed out") || text.contains("timeout") {
        return TransportErrorKind::Timeout;
    }
    if text.contains("read")
        || text.contains("connection reset")
        || text.contains("broken pipe")
        || text.contains("unexpected eof")
    {
        return TransportErrorKind::Read;
    }

    TransportErrorKind::Other
}

pub(crate) fn parse_header_name(name: &str) -> Result<HeaderName, ConfigError> {
    name.parse()
        .map_err(|source| ConfigError::InvalidHeaderName {
            name: name.to_owned(),
            source,
        })
}

pub(crate) fn parse_header_value(name: &str, value: &str) -> Result<HeaderValue, ConfigError> {
    value
        .parse()
        .map_err(|source| ConfigError::InvalidHeaderValue {
            name: name.to_owned(),
            source,
        })
}

pub(crate) fn truncate_body(body: &[u8]) -> String {
    let text = String::from_utf8_lossy(body);
    if text.chars().count() <= MAX_ERROR_BODY_LEN {
        return text.into_owned();
    }

    let truncated: String = text.chars().take(MAX_ERROR_BODY_LEN).collect();
    format!("{truncated}...(truncated)")
}
