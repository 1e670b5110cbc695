//! Per-invocation mutable state threaded through the pipeline.

use std::collections::HashMap;

use serde_json::Value;
use uuid::Uuid;

use crate::error::Error;
use crate::response::Outcome;

/// Well-known scratch keys used by the default steps.
pub mod scratch {
    /// Negotiated response content type
    pub const CONTENT_TYPE: &str = "content-type";
    /// Set when the incoming payload is `multipart/form-data`
    pub const MULTIPART: &str = "multipart";
    /// Resolved security descriptor for the business function
    pub const SECURITY: &str = "security";
}

/// The unit of state for a single invocation.
///
/// Created fresh per invocation and discarded once the wrapped handler
/// returns; never shared across invocations. Steps communicate through the
/// explicit `response`/`error` slots and the scratch side channel instead of
/// ambient mutable state.
pub struct InvocationRecord {
    /// Correlation id stamped into logs and shaped error bodies
    pub invocation_id: Uuid,
    /// The raw incoming event, untouched
    pub raw_event: Value,
    /// Parsed and validated event payload, once a step produced one
    pub event: Option<Value>,
    /// Produced response; presence short-circuits remaining `before` steps
    pub response: Option<Outcome>,
    /// Captured error awaiting the error phase
    pub error: Option<Error>,
    scratch: HashMap<String, Value>,
}

impl InvocationRecord {
    /// Create a fresh record for one invocation of `raw_event`.
    #[must_use]
    pub fn new(raw_event: Value) -> Self {
        Self {
            invocation_id: Uuid::new_v4(),
            raw_event,
            event: None,
            response: None,
            error: None,
            scratch: HashMap::new(),
        }
    }

    /// The payload the business function should see: the validated event if
    /// a step produced one, the raw event otherwise.
    #[must_use]
    pub fn effective_event(&self) -> &Value {
        self.event.as_ref().unwrap_or(&self.raw_event)
    }

    /// A response or a captured error is present; remaining `before` steps
    /// and the business function are skipped.
    #[must_use]
    pub fn halted(&self) -> bool {
        self.response.is_some() || self.error.is_some()
    }

    /// Read a scratch entry.
    #[must_use]
    pub fn scratch(&self, key: &str) -> Option<&Value> {
        self.scratch.get(key)
    }

    /// Write a scratch entry for later steps.
    pub fn set_scratch(&mut self, key: impl Into<String>, value: Value) {
        self.scratch.insert(key.into(), value);
    }

    /// Capture an error for the error phase.
    pub fn capture(&mut self, error: Error) {
        self.error = Some(error);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BusinessError;
    use serde_json::json;

    #[test]
    fn fresh_record_is_not_halted() {
        let record = InvocationRecord::new(json!({ "body": "{}" }));
        assert!(!record.halted());
        assert!(record.event.is_none());
    }

    #[test]
    fn captured_error_halts_the_record() {
        let mut record = InvocationRecord::new(json!({}));
        record.capture(Error::from(BusinessError::new("boom")));
        assert!(record.halted());
    }

    #[test]
    fn produced_response_halts_the_record() {
        let mut record = InvocationRecord::new(json!({}));
        record.response = Some(Outcome::Raw(json!(1)));
        assert!(record.halted());
    }

    #[test]
    fn effective_event_prefers_validated_payload() {
        let mut record = InvocationRecord::new(json!({ "raw": true }));
        assert_eq!(record.effective_event(), &json!({ "raw": true }));

        record.event = Some(json!({ "shaped": true }));
        assert_eq!(record.effective_event(), &json!({ "shaped": true }));
    }

    #[test]
    fn scratch_round_trips() {
        let mut record = InvocationRecord::new(json!({}));
        record.set_scratch(scratch::CONTENT_TYPE, json!("application/json"));
        assert_eq!(
            record.scratch(scratch::CONTENT_TYPE),
            Some(&json!("application/json"))
        );
        assert!(record.scratch(scratch::MULTIPART).is_none());
    }
}
