//! Baseline step sets for safe default pipelines.
//!
//! `build_safe_defaults` is total: whatever the combination of declared
//! schemas, content type, and security posture, it returns a structurally
//! valid phase set whose error phase is never empty. The customization
//! engine starts from this baseline (or a registered profile) and the
//! invariant checker holds every mutation to the same bar.

use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde_json::Value;
use tracing::{debug, warn};

use super::record::{InvocationRecord, scratch};
use super::step::{Phase, PhasedSteps, PipelineStep, StepOp, StepRole, tag_step};
use crate::error::{Error, Result, ValidationError, Violation};
use crate::response::{HttpResponse, Outcome, shape_error};
use crate::schema::Schema;

/// How the terminal error mapper treats captured errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapperMode {
    /// Shape every captured error into an HTTP response
    Shaped,
    /// Leave every captured error on the record for pass-through rethrow
    Passthrough,
    /// Shape business errors only; validation failures stay fatal
    Strict,
}

/// Baseline pipeline for HTTP-flavored functions.
///
/// Fixed relative order: content negotiation, multipart detection, body
/// parsing, input validation, security stamping in `before`; output
/// validation then serialization in `after`; the terminal error mapper in
/// the sentinel slot of the error phase.
#[must_use]
pub fn build_safe_defaults(
    content_type: &str,
    event_schema: Option<Arc<dyn Schema>>,
    response_schema: Option<Arc<dyn Schema>>,
    security: Option<Value>,
) -> PhasedSteps {
    build_http_baseline(
        content_type,
        event_schema,
        response_schema,
        security,
        MapperMode::Shaped,
    )
}

/// The HTTP baseline with a strict terminal mapper: validation failures are
/// not recovered into 4xx responses, they surface as hard errors.
#[must_use]
pub fn build_strict_defaults(
    content_type: &str,
    event_schema: Option<Arc<dyn Schema>>,
    response_schema: Option<Arc<dyn Schema>>,
    security: Option<Value>,
) -> PhasedSteps {
    build_http_baseline(
        content_type,
        event_schema,
        response_schema,
        security,
        MapperMode::Strict,
    )
}

fn build_http_baseline(
    content_type: &str,
    event_schema: Option<Arc<dyn Schema>>,
    response_schema: Option<Arc<dyn Schema>>,
    security: Option<Value>,
    mode: MapperMode,
) -> PhasedSteps {
    let mut steps = PhasedSteps::default();

    steps.before.push(tag_step(
        "content-negotiation",
        Phase::Before,
        StepRole::Negotiation,
        Arc::new(ContentNegotiation {
            content_type: content_type.to_string(),
        }),
    ));
    steps.before.push(tag_step(
        "multipart",
        Phase::Before,
        StepRole::BodyParsing,
        Arc::new(MultipartDetect),
    ));
    steps.before.push(tag_step(
        "body-parser",
        Phase::Before,
        StepRole::BodyParsing,
        Arc::new(BodyParser {
            content_type: content_type.to_string(),
        }),
    ));
    if let Some(schema) = event_schema {
        steps.before.push(tag_step(
            "schema-before",
            Phase::Before,
            StepRole::InputValidation,
            Arc::new(SchemaBefore {
                schema,
                source: PayloadSource::ParsedBody,
            }),
        ));
    }
    if let Some(descriptor) = security {
        steps.before.push(tag_step(
            "security-context",
            Phase::Before,
            StepRole::SecurityContext,
            Arc::new(SecurityStamp { descriptor }),
        ));
    }

    if let Some(schema) = response_schema {
        steps.after.push(tag_step(
            "schema-after",
            Phase::After,
            StepRole::OutputValidation,
            Arc::new(SchemaAfter { schema }),
        ));
    }
    steps.after.push(tag_step(
        "serializer",
        Phase::After,
        StepRole::Serialization,
        Arc::new(Serializer {
            content_type: content_type.to_string(),
        }),
    ));

    steps.finally.push(error_mapper(mode));
    steps
}

/// Baseline pipeline for non-HTTP flavors: schema validation and error
/// mapping only, no content negotiation or serialization, so queue- and
/// step-triggered functions stay free of HTTP concerns.
#[must_use]
pub fn build_bare_defaults(
    event_schema: Option<Arc<dyn Schema>>,
    response_schema: Option<Arc<dyn Schema>>,
) -> PhasedSteps {
    let mut steps = PhasedSteps::default();

    if let Some(schema) = event_schema {
        steps.before.push(tag_step(
            "schema-before",
            Phase::Before,
            StepRole::InputValidation,
            Arc::new(SchemaBefore {
                schema,
                source: PayloadSource::RawEvent,
            }),
        ));
    }
    if let Some(schema) = response_schema {
        steps.after.push(tag_step(
            "schema-after",
            Phase::After,
            StepRole::OutputValidation,
            Arc::new(SchemaAfter { schema }),
        ));
    }

    steps.finally.push(error_mapper(MapperMode::Passthrough));
    steps
}

fn error_mapper(mode: MapperMode) -> PipelineStep {
    tag_step(
        "error-mapper",
        Phase::OnError,
        StepRole::ErrorMapping,
        Arc::new(ErrorMapper { mode }),
    )
}

// ── Header access ─────────────────────────────────────────────────────────────

fn header<'a>(event: &'a Value, name: &str) -> Option<&'a str> {
    event
        .get("headers")
        .and_then(Value::as_object)?
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .and_then(|(_, v)| v.as_str())
}

// ── content-negotiation ───────────────────────────────────────────────────────

/// Negotiate the response content type from the raw event's `Accept` header.
///
/// An `Accept` whose media ranges all miss the declared content type
/// produces an early 406 response, the protocol-level short-circuit.
struct ContentNegotiation {
    content_type: String,
}

impl ContentNegotiation {
    fn acceptable(&self, accept: &str) -> bool {
        accept.split(',').any(|range| {
            let media = range.split(';').next().unwrap_or("").trim();
            if media == "*/*" || media.eq_ignore_ascii_case(&self.content_type) {
                return true;
            }
            // Type wildcard: "application/*" accepts "application/json".
            media
                .strip_suffix("/*")
                .is_some_and(|ty| self.content_type.starts_with(&format!("{ty}/")))
        })
    }
}

#[async_trait]
impl StepOp for ContentNegotiation {
    async fn run(&self, record: &mut InvocationRecord) -> Result<()> {
        let accept = header(&record.raw_event, "accept").map(str::to_string);
        match accept {
            Some(accept) if !self.acceptable(&accept) => {
                debug!(accept, offered = %self.content_type, "no acceptable content type");
                let body = serde_json::json!({
                    "error": format!("cannot satisfy Accept '{accept}', offering {}", self.content_type),
                    "requestId": record.invocation_id.to_string(),
                });
                record.response = Some(Outcome::Http(HttpResponse::json(406, &body)?));
            }
            _ => {
                record.set_scratch(scratch::CONTENT_TYPE, Value::String(self.content_type.clone()));
            }
        }
        Ok(())
    }
}

// ── multipart ─────────────────────────────────────────────────────────────────

/// Flag `multipart/form-data` payloads so the body parser leaves them opaque.
struct MultipartDetect;

#[async_trait]
impl StepOp for MultipartDetect {
    async fn run(&self, record: &mut InvocationRecord) -> Result<()> {
        let multipart = header(&record.raw_event, "content-type")
            .is_some_and(|ct| ct.trim_start().starts_with("multipart/form-data"));
        if multipart {
            record.set_scratch(scratch::MULTIPART, Value::Bool(true));
        }
        Ok(())
    }
}

// ── body-parser ───────────────────────────────────────────────────────────────

/// Decode and parse the raw body into the event slot.
///
/// Base64-flagged bodies are decoded first. JSON content types are parsed;
/// multipart and everything else passes through as an opaque string.
struct BodyParser {
    content_type: String,
}

#[async_trait]
impl StepOp for BodyParser {
    async fn run(&self, record: &mut InvocationRecord) -> Result<()> {
        let Some(body) = record.raw_event.get("body").cloned() else {
            return Ok(());
        };

        match body {
            Value::Null => Ok(()),
            Value::Object(_) | Value::Array(_) => {
                // Already structured (e.g. a test harness or local invoke).
                record.event = Some(body);
                Ok(())
            }
            Value::String(raw) => {
                let decoded = if record
                    .raw_event
                    .get("isBase64Encoded")
                    .and_then(Value::as_bool)
                    .unwrap_or(false)
                {
                    match BASE64.decode(raw.as_bytes()).map(String::from_utf8) {
                        Ok(Ok(text)) => text,
                        _ => {
                            warn!(invocation = %record.invocation_id, "body is not valid base64");
                            record.capture(Error::from(ValidationError::event(vec![
                                Violation::new("body", "body is not valid base64"),
                            ])));
                            return Ok(());
                        }
                    }
                } else {
                    raw
                };

                let multipart = record
                    .scratch(scratch::MULTIPART)
                    .and_then(Value::as_bool)
                    .unwrap_or(false);

                if !multipart && self.content_type.contains("json") {
                    match serde_json::from_str::<Value>(&decoded) {
                        Ok(parsed) => record.event = Some(parsed),
                        Err(e) => {
                            debug!(invocation = %record.invocation_id, error = %e, "malformed body");
                            record.capture(Error::from(ValidationError::event(vec![
                                Violation::new("body", format!("malformed JSON body: {e}")),
                            ])));
                        }
                    }
                } else {
                    record.event = Some(Value::String(decoded));
                }
                Ok(())
            }
            other => {
                record.event = Some(other);
                Ok(())
            }
        }
    }
}

// ── schema-before ─────────────────────────────────────────────────────────────

/// Which payload the input-validation step checks.
enum PayloadSource {
    /// The parsed body (HTTP flavors); absent body validates as null
    ParsedBody,
    /// The raw event itself (queue/step flavors)
    RawEvent,
}

/// Parse and validate the incoming payload, replacing the event with the
/// validated shape. Failure captures the error and halts the `before`
/// phase and the business function.
struct SchemaBefore {
    schema: Arc<dyn Schema>,
    source: PayloadSource,
}

#[async_trait]
impl StepOp for SchemaBefore {
    async fn run(&self, record: &mut InvocationRecord) -> Result<()> {
        let payload = match self.source {
            PayloadSource::ParsedBody => record.event.clone().unwrap_or(Value::Null),
            PayloadSource::RawEvent => record.effective_event().clone(),
        };

        match self.schema.parse(&payload) {
            Ok(shaped) => {
                record.event = Some(shaped);
            }
            Err(violation) => {
                debug!(invocation = %record.invocation_id, error = %violation, "event rejected");
                record.capture(Error::from(violation));
            }
        }
        Ok(())
    }
}

// ── security-context ──────────────────────────────────────────────────────────

/// Stamp the externally-resolved security descriptor into scratch for the
/// wrapper to hand to the business function.
struct SecurityStamp {
    descriptor: Value,
}

#[async_trait]
impl StepOp for SecurityStamp {
    async fn run(&self, record: &mut InvocationRecord) -> Result<()> {
        record.set_scratch(scratch::SECURITY, self.descriptor.clone());
        Ok(())
    }
}

// ── schema-after ──────────────────────────────────────────────────────────────

/// Validate and re-shape the raw business result before serialization.
/// No-op unless the response slot holds a raw value.
struct SchemaAfter {
    schema: Arc<dyn Schema>,
}

#[async_trait]
impl StepOp for SchemaAfter {
    async fn run(&self, record: &mut InvocationRecord) -> Result<()> {
        let Some(Outcome::Raw(value)) = &record.response else {
            return Ok(());
        };
        let value = value.clone();

        match self.schema.parse(&value) {
            Ok(shaped) => {
                record.response = Some(Outcome::Raw(shaped));
            }
            Err(violation) => {
                warn!(invocation = %record.invocation_id, error = %violation, "response rejected");
                record.response = None;
                record.capture(Error::from(violation.for_response()));
            }
        }
        Ok(())
    }
}

// ── serializer ────────────────────────────────────────────────────────────────

/// Turn a raw business result into an HTTP response with the negotiated
/// content type. No-op when the response is already HTTP-shaped.
struct Serializer {
    content_type: String,
}

#[async_trait]
impl StepOp for Serializer {
    async fn run(&self, record: &mut InvocationRecord) -> Result<()> {
        let Some(Outcome::Raw(value)) = &record.response else {
            return Ok(());
        };

        let content_type = record
            .scratch(scratch::CONTENT_TYPE)
            .and_then(Value::as_str)
            .unwrap_or(&self.content_type)
            .to_string();

        let body = if content_type.contains("json") {
            serde_json::to_string(value)?
        } else if let Value::String(text) = value {
            text.clone()
        } else {
            value.to_string()
        };

        record.response = Some(Outcome::Http(HttpResponse::with_body(
            200,
            &content_type,
            body,
        )));
        Ok(())
    }
}

// ── error-mapper ──────────────────────────────────────────────────────────────

/// Terminal error mapper. Pinned in the sentinel slot so splices into the
/// error phase always run before it.
struct ErrorMapper {
    mode: MapperMode,
}

#[async_trait]
impl StepOp for ErrorMapper {
    async fn run(&self, record: &mut InvocationRecord) -> Result<()> {
        let Some(error) = &record.error else {
            return Ok(());
        };

        match self.mode {
            MapperMode::Passthrough => {}
            MapperMode::Strict if error.is_validation() => {}
            MapperMode::Shaped | MapperMode::Strict => {
                record.response = Some(Outcome::Http(shape_error(error, record.invocation_id)));
            }
        }
        Ok(())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
