//! Response shapes produced by wrapped handlers.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::Error;

/// HTTP-shaped response: status, headers, serialized body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpResponse {
    /// HTTP status code
    #[serde(rename = "statusCode")]
    pub status_code: u16,
    /// Response headers
    pub headers: BTreeMap<String, String>,
    /// Serialized body
    pub body: String,
}

impl HttpResponse {
    /// Build a response with a JSON body and matching `Content-Type` header.
    pub fn json(status_code: u16, body: &Value) -> crate::Result<Self> {
        let mut headers = BTreeMap::new();
        headers.insert("Content-Type".to_string(), "application/json".to_string());
        Ok(Self {
            status_code,
            headers,
            body: serde_json::to_string(body)?,
        })
    }

    /// Build a response with a pre-serialized body and explicit content type.
    #[must_use]
    pub fn with_body(status_code: u16, content_type: &str, body: String) -> Self {
        let mut headers = BTreeMap::new();
        headers.insert("Content-Type".to_string(), content_type.to_string());
        Self {
            status_code,
            headers,
            body,
        }
    }

    /// Header lookup, case-insensitive on the header name.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// What a wrapped handler hands back to the hosting platform.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// HTTP-shaped result for HTTP-flavored functions
    Http(HttpResponse),
    /// Raw business result for queue/step-flavored functions
    Raw(Value),
}

impl Outcome {
    /// Returns the HTTP response, if this outcome is HTTP-shaped.
    #[must_use]
    pub fn as_http(&self) -> Option<&HttpResponse> {
        match self {
            Self::Http(resp) => Some(resp),
            Self::Raw(_) => None,
        }
    }

    /// Returns the raw value, if this outcome is not HTTP-shaped.
    #[must_use]
    pub fn as_raw(&self) -> Option<&Value> {
        match self {
            Self::Raw(value) => Some(value),
            Self::Http(_) => None,
        }
    }
}

/// Shape a captured error into a client-safe HTTP response.
///
/// The body is always structurally valid JSON carrying the message, any
/// per-field details, and the invocation id for correlation. Stack traces
/// and internal state never leave the process.
#[must_use]
pub fn shape_error(error: &Error, invocation_id: Uuid) -> HttpResponse {
    let details = error.details();
    let mut body = serde_json::json!({
        "error": error.to_string(),
        "requestId": invocation_id.to_string(),
    });
    if !details.is_empty() {
        body["details"] = Value::Array(details);
    }

    let mut headers = BTreeMap::new();
    headers.insert("Content-Type".to_string(), "application/json".to_string());
    HttpResponse {
        status_code: error.status_code(),
        headers,
        body: body.to_string(),
    }
}
