//! Error types for fnpipe

use serde_json::Value;
use thiserror::Error;

/// Result type alias for fnpipe
pub type Result<T> = std::result::Result<T, Error>;

/// fnpipe errors
#[derive(Error, Debug)]
pub enum Error {
    /// Pipeline assembly error, raised at registration time and fatal to startup
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Schema validation failure for an incoming event or an outgoing response
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Error returned by the caller's business function
    #[error(transparent)]
    Business(#[from] BusinessError),

    /// The pipeline produced neither a response nor an error.
    ///
    /// This is always a defect in pipeline construction, never a caller
    /// mistake, and is deliberately allowed to escape the wrapper boundary.
    #[error("pipeline invariant violated: {0}")]
    InternalInvariant(String),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Create a configuration error
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    /// HTTP status code this error maps to when shaped into a response.
    ///
    /// Event validation failures are the caller's fault (400); a response
    /// failing its own declared schema is a server defect (500), as is
    /// everything else without an explicit status hint.
    #[must_use]
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Validation(v) => match v.target {
                ValidationTarget::Event => 400,
                ValidationTarget::Response => 500,
            },
            Self::Business(b) => b.status_hint.unwrap_or(500),
            _ => 500,
        }
    }

    /// Structured detail entries for the shaped error body, if any.
    #[must_use]
    pub fn details(&self) -> Vec<Value> {
        match self {
            Self::Validation(v) => v
                .violations
                .iter()
                .map(|viol| {
                    serde_json::json!({
                        "field": viol.field,
                        "message": viol.message,
                    })
                })
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Returns `true` for schema validation failures.
    #[must_use]
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }
}

/// What a [`ValidationError`] was validating when it fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationTarget {
    /// The incoming event payload
    Event,
    /// The business function's result
    Response,
}

/// A single schema violation with the offending field and a readable message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    /// Field name that caused the violation (empty for top-level issues)
    pub field: String,
    /// Human-readable description of the problem
    pub message: String,
}

impl Violation {
    /// Create a violation
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Schema validation failure carrying every violation found.
#[derive(Error, Debug, Clone)]
#[error("{} validation failed: {}", target_label(.target), summarize(.violations))]
pub struct ValidationError {
    /// What was being validated
    pub target: ValidationTarget,
    /// All violations found, never empty
    pub violations: Vec<Violation>,
}

impl ValidationError {
    /// Create a validation error for an incoming event payload
    pub fn event(violations: Vec<Violation>) -> Self {
        Self {
            target: ValidationTarget::Event,
            violations,
        }
    }

    /// Re-target this error at the response side of the contract
    #[must_use]
    pub fn for_response(mut self) -> Self {
        self.target = ValidationTarget::Response;
        self
    }
}

fn target_label(target: &ValidationTarget) -> &'static str {
    match target {
        ValidationTarget::Event => "event",
        ValidationTarget::Response => "response",
    }
}

fn summarize(violations: &[Violation]) -> String {
    violations
        .iter()
        .map(|v| {
            if v.field.is_empty() {
                v.message.clone()
            } else {
                format!("{}: {}", v.field, v.message)
            }
        })
        .collect::<Vec<_>>()
        .join("; ")
}

/// Error returned by the caller's business function.
///
/// Carries an optional status hint recognized by the error mapper; without
/// one, HTTP flavors shape these as 500.
#[derive(Error, Debug, Clone)]
#[error("{message}")]
pub struct BusinessError {
    /// Human-readable error message
    pub message: String,
    /// Recognized HTTP status hint, if the business function attached one
    pub status_hint: Option<u16>,
}

impl BusinessError {
    /// Create a business error with no status hint
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            status_hint: None,
        }
    }

    /// Attach an HTTP status hint
    #[must_use]
    pub fn with_status(mut self, status: u16) -> Self {
        self.status_hint = Some(status);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_validation_maps_to_400() {
        let err = Error::from(ValidationError::event(vec![Violation::new(
            "what",
            "expected string",
        )]));
        assert_eq!(err.status_code(), 400);
    }

    #[test]
    fn response_validation_maps_to_500() {
        let err = Error::from(
            ValidationError::event(vec![Violation::new("what", "missing")]).for_response(),
        );
        assert_eq!(err.status_code(), 500);
    }

    #[test]
    fn business_error_uses_status_hint() {
        let err = Error::from(BusinessError::new("teapot").with_status(418));
        assert_eq!(err.status_code(), 418);
    }

    #[test]
    fn business_error_defaults_to_500() {
        let err = Error::from(BusinessError::new("boom"));
        assert_eq!(err.status_code(), 500);
    }

    #[test]
    fn validation_details_carry_field_and_message() {
        let err = Error::from(ValidationError::event(vec![
            Violation::new("a", "missing"),
            Violation::new("b", "wrong type"),
        ]));
        let details = err.details();
        assert_eq!(details.len(), 2);
        assert_eq!(details[0]["field"], "a");
        assert_eq!(details[1]["message"], "wrong type");
    }

    #[test]
    fn display_includes_violation_summary() {
        let err = ValidationError::event(vec![Violation::new("count", "must be >= 0")]);
        let text = err.to_string();
        assert!(text.contains("event validation failed"), "text: {text}");
        assert!(text.contains("count: must be >= 0"), "text: {text}");
    }
}
