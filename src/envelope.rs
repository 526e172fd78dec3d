use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::classify::{TransportOutcome, classify};
use crate::error::ApiError;
use crate::transport::RawResponse;
use crate::util::truncate_body;

pub const BUSINESS_SUCCESS_CODE: i64 = 200;

/// The `{code, message, data}` wrapper every API response carries.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ResponseEnvelope<T = Value> {
    pub code: i64,
    #[serde(default, alias = "msg", skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default)]
    pub data: Option<T>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub success: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
}

impl<T> ResponseEnvelope<T> {
    /// `code == 200` or an explicit `success: true` is the only definition of business success.
    pub fn is_success(&self) -> bool {
        self.code == BUSINESS_SUCCESS_CODE || self.success == Some(true)
    }
}

pub(crate) fn decode_envelope(body: &[u8]) -> Result<ResponseEnvelope, serde_json::Error> {
    serde_json::from_slice(body)
}

/// Turns a raw response into the envelope's `data`, or the classified failure.
pub(crate) fn unwrap_response(response: &RawResponse) -> Result<Value, ApiError> {
    let status = response.status;
    if !status.is_success() {
        let (message, body) = match decode_envelope(&response.body) {
            Ok(envelope) => {
                let body = serde_json::to_value(&envelope).ok();
                (envelope.message, body)
            }
            Err(_) if response.body.is_empty() => (None, None),
            Err(_) => (None, Some(Value::String(truncate_body(&response.body)))),
        };
        return Err(classify(TransportOutcome::Status {
            status: status.as_u16(),
            message,
            body,
        }));
    }

    if response.body.is_empty() {
        return Ok(Value::Null);
    }

    let envelope = decode_envelope(&response.body).map_err(|source| {
        ApiError::decode_failure(
            format!("failed to decode response envelope: {source}"),
            Some(Value::String(truncate_body(&response.body))),
        )
    })?;
    if !envelope.is_success() {
        return Err(classify(TransportOutcome::Business {
            code: envelope.code,
            message: envelope.message,
            data: envelope.data,
        }));
    }
    Ok(envelope.data.unwrap_or(Value::Null))
}
