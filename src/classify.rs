use std::time::Duration;

use serde_json::Value;

use crate::error::{ApiError, ErrorKind, TRANSPORT_FAILURE_CODE};
use crate::transport::TransportErrorKind;

/// What a single transport attempt produced, before any policy is applied.
#[derive(Clone, Debug, PartialEq)]
pub enum TransportOutcome {
    /// The orchestration layer (or a newer call with the same fingerprint) aborted the attempt.
    Aborted,
    TimedOut {
        timeout: Duration,
    },
    NoResponse {
        kind: TransportErrorKind,
        message: String,
    },
    /// A non-2xx HTTP status; `message` is the envelope message when the body carried one.
    Status {
        status: u16,
        message: Option<String>,
        body: Option<Value>,
    },
    /// A 2xx response whose envelope reported a business failure.
    Business {
        code: i64,
        message: Option<String>,
        data: Option<Value>,
    },
}

pub fn classify(outcome: TransportOutcome) -> ApiError {
    match outcome {
        TransportOutcome::Aborted => ApiError::cancelled(),
        TransportOutcome::TimedOut { timeout } => ApiError::new(
            ErrorKind::Timeout,
            TRANSPORT_FAILURE_CODE,
            format!("request timed out after {}ms", timeout.as_millis()),
        )
        .with_retryable(true),
        TransportOutcome::NoResponse {
            kind: TransportErrorKind::Timeout,
            message,
        } => ApiError::new(ErrorKind::Timeout, TRANSPORT_FAILURE_CODE, "request timed out")
            .with_details(Some(Value::String(message)))
            .with_retryable(true),
        TransportOutcome::NoResponse { kind, message } => ApiError::new(
            ErrorKind::Network,
            TRANSPORT_FAILURE_CODE,
            format!("network error ({kind})"),
        )
        .with_details(Some(Value::String(message)))
        .with_retryable(true),
        TransportOutcome::Status {
            status,
            message,
            body,
        } => {
            let message = resolve_message(message, i64::from(status));
            let error = if (500..600).contains(&status) {
                ApiError::new(ErrorKind::ServerError, i64::from(status), message)
                    .with_retryable(true)
            } else {
                ApiError::new(ErrorKind::ClientError, i64::from(status), message)
                    .with_requires_reauth(status == 401)
            };
            error.with_details(body)
        }
        TransportOutcome::Business {
            code,
            message,
            data,
        } => ApiError::new(ErrorKind::Business, code, resolve_message(message, code))
            .with_details(data),
    }
}

fn resolve_message(message: Option<String>, code: i64) -> String {
    if let Some(message) = message
        && !message.trim().is_empty()
    {
        return message;
    }
    if let Ok(status) = u16::try_from(code)
        && let Some(text) = status_text(status)
    {
        return text.to_owned();
    }
    format!("request failed ({code})")
}

pub fn status_text(status: u16) -> Option<&'static str> {
    let text = match status {
        400 => "Bad Request",
        401 => "Unauthorized, please sign in again",
        403 => "Forbidden",
        404 => "Not Found",
        405 => "Method Not Allowed",
        406 => "Not Acceptable",
        408 => "Request Timeout",
        409 => "Conflict",
        410 => "Gone",
        413 => "Payload Too Large",
        415 => "Unsupported Media Type",
        422 => "Unprocessable Entity",
        429 => "Too Many Requests",
        500 => "Internal Server Error",
        501 => "Not Implemented",
        502 => "Bad Gateway",
        503 => "Service Unavailable",
        504 => "Gateway Timeout",
        _ => return None,
    };
    Some(text)
}
