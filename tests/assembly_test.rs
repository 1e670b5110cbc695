//! Registration-time pipeline assembly tests.
//!
//! Every failure here must surface from `wrap_handler`, before any
//! invocation can happen.

use std::sync::Arc;

use fnpipe::descriptor::Anchor;
use fnpipe::pipeline::{
    InvocationRecord, OpFn, Phase, StepOp, StepRole, build_safe_defaults, register_profile,
    tag_step,
};
use fnpipe::{
    CustomizationOptions, Error, FunctionDescriptor, JsonSchema, WrapOptions, business,
    wrap_handler,
};
use pretty_assertions::assert_eq;
use serde_json::{Value, json};

fn noop() -> Arc<dyn StepOp> {
    Arc::new(OpFn(|_record: &mut InvocationRecord| Ok(())))
}

fn echo_business() -> fnpipe::BusinessFn {
    business(|event, _ctx| async move { Ok(event) })
}

fn assert_configuration_error(err: &Error, needle: &str) {
    assert!(
        matches!(err, Error::Configuration(_)),
        "expected a configuration error, got: {err:?}"
    );
    let text = err.to_string();
    assert!(text.contains(needle), "message: {text}");
}

#[test]
fn extend_anchored_on_missing_step_fails_registration() {
    let options = CustomizationOptions::default().extend_with(
        Phase::Before,
        Anchor::After("nonexistent".to_string()),
        tag_step("orphan", Phase::Before, StepRole::Custom, noop()),
    );

    let err = wrap_handler(
        FunctionDescriptor::new("broken", "rest").with_customization(options),
        echo_business(),
        WrapOptions::default(),
    )
    .unwrap_err();

    assert_configuration_error(&err, "nonexistent");
}

#[test]
fn colliding_step_identifiers_fail_registration() {
    let options = CustomizationOptions::default()
        .extend_with(
            Phase::After,
            Anchor::PhaseEnd,
            tag_step("metrics", Phase::After, StepRole::Custom, noop()),
        )
        .extend_with(
            Phase::After,
            Anchor::PhaseStart,
            tag_step("metrics", Phase::After, StepRole::Custom, noop()),
        );

    let err = wrap_handler(
        FunctionDescriptor::new("broken", "rest").with_customization(options),
        echo_business(),
        WrapOptions::default(),
    )
    .unwrap_err();

    assert_configuration_error(&err, "duplicate step identifier");
}

#[test]
fn override_of_missing_step_fails_registration() {
    let options = CustomizationOptions::default().override_with(
        Phase::Before,
        tag_step("not-there", Phase::Before, StepRole::Custom, noop()),
    );

    let err = wrap_handler(
        FunctionDescriptor::new("broken", "rest").with_customization(options),
        echo_business(),
        WrapOptions::default(),
    )
    .unwrap_err();

    assert_configuration_error(&err, "not-there");
}

#[test]
fn unknown_profile_fails_registration() {
    let options = CustomizationOptions::default().with_profile("turbo");

    let err = wrap_handler(
        FunctionDescriptor::new("broken", "rest").with_customization(options),
        echo_business(),
        WrapOptions::default(),
    )
    .unwrap_err();

    assert_configuration_error(&err, "turbo");
}

#[test]
fn profile_that_drops_required_validation_fails_registration() {
    // A profile that forgets input validation cannot serve a declaration
    // with an event schema.
    register_profile(
        "no-validation",
        Arc::new(|seed| {
            build_safe_defaults(&seed.content_type, None, None, seed.security.clone())
        }),
    );

    let descriptor = FunctionDescriptor::new("broken", "rest")
        .with_event_schema(Arc::new(JsonSchema::new(json!({
            "type": "object",
            "properties": { "id": { "type": "string" } },
        }))))
        .with_customization(CustomizationOptions::default().with_profile("no-validation"));

    let err = wrap_handler(descriptor, echo_business(), WrapOptions::default()).unwrap_err();
    assert_configuration_error(&err, "input-validation");
}

#[tokio::test]
async fn valid_customization_registers_and_invokes() {
    let options = CustomizationOptions::default().extend_with(
        Phase::Before,
        Anchor::Before("body-parser".to_string()),
        tag_step("trace-marker", Phase::Before, StepRole::Custom, noop()),
    );

    let handler = wrap_handler(
        FunctionDescriptor::new("fine", "rest").with_customization(options),
        business(|_event, _ctx| async move { Ok(json!({ "ok": true })) }),
        WrapOptions::default(),
    )
    .unwrap();

    let outcome = handler.invoke(json!({}), Value::Null).await.unwrap();
    assert_eq!(outcome.as_http().unwrap().status_code, 200);
}
