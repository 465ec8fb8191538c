//! Request/Reply Envelopes
//!
//! Operation requests arrive either as an envelope
//! `{"method": .., "payload": .., "correlationId": ..}` or as a bare JSON body.
//! Replies mirror the form of the request so that callers sending bare bodies
//! get bare results back.

use serde::{Deserialize, Serialize};
use serde_json::Value;

// ─────────────────────────────────────────────────────────────────────────────
// Envelope
// ─────────────────────────────────────────────────────────────────────────────

/// Self-describing message body
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub method: String,
    #[serde(default)]
    pub payload: Value,
    #[serde(
        rename = "correlationId",
        alias = "correlation_id",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub correlation_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
}

/// Machine-readable error category carried in error replies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// No handler is registered for the subject
    ServiceUnavailable,
    /// The handler returned an error or panicked
    DispatchFailed,
    /// The request body could not be decoded
    BadRequest,
}

/// Error carried in an error reply
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: ErrorCode,
    pub message: String,
}

impl ErrorBody {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Bare error document: `{"error": {"code": .., "message": ..}}`
    pub fn to_document(&self) -> Value {
        serde_json::json!({ "error": self })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Decoding
// ─────────────────────────────────────────────────────────────────────────────

/// How a request was framed on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestForm {
    Raw,
    Envelope,
}

/// Errors produced while decoding a request body
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("request body is not valid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("envelope addressed to '{found}' arrived on the subject of '{expected}'")]
    MethodMismatch { expected: String, found: String },
}

/// A decoded operation request
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedRequest {
    pub method: String,
    pub payload: Value,
    pub correlation_id: Option<String>,
    pub form: RequestForm,
}

impl DecodedRequest {
    /// Decode a request body received on the subject of `method`
    ///
    /// An empty body decodes to `null`. A JSON object carrying both a string
    /// `method` and a `payload` key is treated as an envelope.
    pub fn decode(method: &str, body: &[u8]) -> Result<Self, DecodeError> {
        if body.iter().all(|b| b.is_ascii_whitespace()) {
            return Ok(Self::raw(method, Value::Null));
        }

        let value: Value = serde_json::from_slice(body)?;
        if !is_envelope(&value) {
            return Ok(Self::raw(method, value));
        }

        let envelope: Envelope = serde_json::from_value(value)?;
        if envelope.method != method {
            return Err(DecodeError::MethodMismatch {
                expected: method.to_string(),
                found: envelope.method,
            });
        }

        Ok(Self {
            method: envelope.method,
            payload: envelope.payload,
            correlation_id: envelope.correlation_id,
            form: RequestForm::Envelope,
        })
    }

    fn raw(method: &str, payload: Value) -> Self {
        Self {
            method: method.to_string(),
            payload,
            correlation_id: None,
            form: RequestForm::Raw,
        }
    }

    /// Success reply in the same form as the request
    pub fn reply(&self, result: Value) -> Value {
        match self.form {
            RequestForm::Raw => result,
            RequestForm::Envelope => self.envelope(result, None),
        }
    }

    /// Error reply in the same form as the request
    pub fn error_reply(&self, error: ErrorBody) -> Value {
        match self.form {
            RequestForm::Raw => error.to_document(),
            RequestForm::Envelope => self.envelope(Value::Null, Some(error)),
        }
    }

    fn envelope(&self, payload: Value, error: Option<ErrorBody>) -> Value {
        let envelope = Envelope {
            method: self.method.clone(),
            payload,
            correlation_id: self.correlation_id.clone(),
            error,
        };
        serde_json::to_value(envelope).unwrap_or(Value::Null)
    }
}

fn is_envelope(value: &Value) -> bool {
    value
        .as_object()
        .map(|obj| obj.get("method").is_some_and(Value::is_string) && obj.contains_key("payload"))
        .unwrap_or(false)
}
