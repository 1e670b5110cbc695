//! Pipeline assembly: profiles, splices, overrides, and invariant checking.
//!
//! Everything in this module runs once at registration time. Failing fast
//! here with a configuration error is always preferred over a silent gap
//! at invocation time, so every mutation is checked against the structural
//! invariants before a pipeline is handed to the combinator.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, LazyLock};

use parking_lot::RwLock;
use serde_json::Value;
use tracing::debug;

use super::defaults::{build_safe_defaults, build_strict_defaults};
use super::step::{Phase, PhasedSteps, PipelineStep, StepRole};
use crate::descriptor::{Anchor, CustomizationOptions, Extend, FunctionDescriptor, Override};
use crate::error::{Error, Result};
use crate::schema::Schema;

/// The descriptor-derived inputs a profile builds its baseline from.
#[derive(Clone)]
pub struct ProfileSeed {
    /// Declared content type
    pub content_type: String,
    /// Incoming event contract
    pub event_schema: Option<Arc<dyn Schema>>,
    /// Response contract
    pub response_schema: Option<Arc<dyn Schema>>,
    /// Resolved security descriptor
    pub security: Option<Value>,
}

/// Builds a baseline phase set for one function from its seed.
pub type ProfileBuilder = Arc<dyn Fn(&ProfileSeed) -> PhasedSteps + Send + Sync>;

// Populated at startup via register_profile; read-only afterwards. The
// "strict" profile ships built in.
static PROFILES: LazyLock<RwLock<HashMap<String, ProfileBuilder>>> = LazyLock::new(|| {
    let mut profiles: HashMap<String, ProfileBuilder> = HashMap::new();
    profiles.insert(
        "strict".to_string(),
        Arc::new(|seed: &ProfileSeed| {
            build_strict_defaults(
                &seed.content_type,
                seed.event_schema.clone(),
                seed.response_schema.clone(),
                seed.security.clone(),
            )
        }),
    );
    RwLock::new(profiles)
});

/// Register a named profile as an alternative pipeline baseline.
///
/// Call at startup, before wrapping handlers; later registrations replace
/// earlier ones with the same name.
pub fn register_profile(name: impl Into<String>, builder: ProfileBuilder) {
    let name = name.into();
    debug!(profile = %name, "registering pipeline profile");
    PROFILES.write().insert(name, builder);
}

fn profile(name: &str) -> Option<ProfileBuilder> {
    PROFILES.read().get(name).cloned()
}

/// Assemble the middleware pipeline for an HTTP-flavored function.
///
/// Baseline (safe defaults or the named profile), then `extend` splices in
/// declaration order, then `overrides`, then the invariant check. Every
/// failure is a configuration error raised here, at registration.
pub fn compute_http_middleware(
    descriptor: &FunctionDescriptor,
    options: &CustomizationOptions,
    security: Option<Value>,
) -> Result<PhasedSteps> {
    let seed = ProfileSeed {
        content_type: descriptor.content_type.clone(),
        event_schema: descriptor.event_schema.clone(),
        response_schema: descriptor.response_schema.clone(),
        security,
    };

    let mut steps = match &options.profile {
        Some(name) => {
            let builder = profile(name).ok_or_else(|| {
                Error::configuration(format!("unknown pipeline profile '{name}'"))
            })?;
            builder(&seed)
        }
        None => build_safe_defaults(
            &seed.content_type,
            seed.event_schema.clone(),
            seed.response_schema.clone(),
            seed.security.clone(),
        ),
    };

    for extend in &options.extend {
        apply_extend(&mut steps, extend)?;
    }
    for replacement in &options.overrides {
        apply_override(&mut steps, replacement)?;
    }

    assert_invariants(
        &steps,
        descriptor.event_schema.is_some(),
        descriptor.response_schema.is_some(),
    )?;
    Ok(steps)
}

fn position_of(steps: &[PipelineStep], id: &str) -> Option<usize> {
    steps
        .iter()
        .position(|s| s.id().map(|sid| sid == id).unwrap_or(false))
}

/// Splice a step into its phase at the declared anchor.
///
/// Anchors resolve against the identifiers present at apply time, so a
/// splice may anchor on a step introduced by an earlier splice. For the
/// error phase, anchors also resolve into the sentinel slot, keeping the
/// terminal mapper addressable.
fn apply_extend(steps: &mut PhasedSteps, extend: &Extend) -> Result<()> {
    let step = extend.step.clone();
    match &extend.anchor {
        Anchor::PhaseStart => steps.steps_mut(extend.phase).insert(0, step),
        Anchor::PhaseEnd => steps.steps_mut(extend.phase).push(step),
        Anchor::Before(id) => {
            if let Some(pos) = position_of(steps.steps(extend.phase), id) {
                steps.steps_mut(extend.phase).insert(pos, step);
            } else if extend.phase == Phase::OnError {
                let pos = position_of(&steps.finally, id)
                    .ok_or_else(|| anchor_error(id, extend.phase))?;
                steps.finally.insert(pos, step);
            } else {
                return Err(anchor_error(id, extend.phase));
            }
        }
        Anchor::After(id) => {
            if let Some(pos) = position_of(steps.steps(extend.phase), id) {
                steps.steps_mut(extend.phase).insert(pos + 1, step);
            } else if extend.phase == Phase::OnError {
                let pos = position_of(&steps.finally, id)
                    .ok_or_else(|| anchor_error(id, extend.phase))?;
                steps.finally.insert(pos + 1, step);
            } else {
                return Err(anchor_error(id, extend.phase));
            }
        }
    }
    Ok(())
}

fn anchor_error(id: &str, phase: Phase) -> Error {
    Error::configuration(format!(
        "extend anchor references unknown step '{id}' in {phase} phase"
    ))
}

/// Replace the step sharing the replacement's identifier, in place.
fn apply_override(steps: &mut PhasedSteps, replacement: &Override) -> Result<()> {
    let id = replacement.step.id()?.to_string();

    if let Some(pos) = position_of(steps.steps(replacement.phase), &id) {
        steps.steps_mut(replacement.phase)[pos] = replacement.step.clone();
        return Ok(());
    }
    if replacement.phase == Phase::OnError {
        if let Some(pos) = position_of(&steps.finally, &id) {
            steps.finally[pos] = replacement.step.clone();
            return Ok(());
        }
    }
    Err(Error::configuration(format!(
        "override target '{id}' not found in {} phase",
        replacement.phase
    )))
}

/// Check the structural invariants of an assembled pipeline.
///
/// 1. Identifiers are unique within each phase.
/// 2. The error phase is never empty.
/// 3. A declared event schema is matched by an input-validation step.
/// 4. A declared response schema is matched by an output-validation step.
pub fn assert_invariants(
    steps: &PhasedSteps,
    has_event_schema: bool,
    has_response_schema: bool,
) -> Result<()> {
    check_unique(steps.before.iter(), Phase::Before)?;
    check_unique(steps.after.iter(), Phase::After)?;
    check_unique(steps.error_steps(), Phase::OnError)?;

    if steps.error_steps().count() == 0 {
        return Err(Error::configuration(
            "error phase must contain a terminal error-mapping step",
        ));
    }
    if has_event_schema
        && !steps
            .before
            .iter()
            .any(|s| s.role() == StepRole::InputValidation)
    {
        return Err(Error::configuration(
            "declared event schema has no input-validation step in the before phase",
        ));
    }
    if has_response_schema
        && !steps
            .after
            .iter()
            .any(|s| s.role() == StepRole::OutputValidation)
    {
        return Err(Error::configuration(
            "declared response schema has no output-validation step in the after phase",
        ));
    }
    Ok(())
}

fn check_unique<'a>(steps: impl Iterator<Item = &'a PipelineStep>, phase: Phase) -> Result<()> {
    let mut seen = HashSet::new();
    for step in steps {
        let id = step.id()?;
        if !seen.insert(id.to_string()) {
            return Err(Error::configuration(format!(
                "duplicate step identifier '{id}' in {phase} phase"
            )));
        }
    }
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::record::InvocationRecord;
    use crate::pipeline::step::{OpFn, StepOp, tag_step};
    use crate::schema::JsonSchema;
    use serde_json::json;

    fn noop() -> Arc<dyn StepOp> {
        Arc::new(OpFn(|_record: &mut InvocationRecord| Ok(())))
    }

    fn custom(id: &str, phase: Phase) -> PipelineStep {
        tag_step(id, phase, StepRole::Custom, noop())
    }

    fn descriptor() -> FunctionDescriptor {
        FunctionDescriptor::new("get-user", "rest")
    }

    fn descriptor_with_schemas() -> FunctionDescriptor {
        let schema = || {
            Arc::new(JsonSchema::new(json!({
                "type": "object",
                "properties": { "what": { "type": "string" } },
            })))
        };
        descriptor()
            .with_event_schema(schema())
            .with_response_schema(schema())
    }

    fn ids(steps: &[PipelineStep]) -> Vec<&str> {
        steps.iter().map(|s| s.id().unwrap()).collect()
    }

    // ── Extend splices ──────────────────────────────────────────────────────

    #[test]
    fn extend_at_phase_start_and_end() {
        let options = CustomizationOptions::default()
            .extend_with(Phase::Before, Anchor::PhaseStart, custom("first", Phase::Before))
            .extend_with(Phase::Before, Anchor::PhaseEnd, custom("last", Phase::Before));

        let steps = compute_http_middleware(&descriptor(), &options, None).unwrap();
        let before = ids(&steps.before);
        assert_eq!(before.first(), Some(&"first"));
        assert_eq!(before.last(), Some(&"last"));
    }

    #[test]
    fn extend_before_and_after_named_steps() {
        let options = CustomizationOptions::default()
            .extend_with(
                Phase::Before,
                Anchor::Before("body-parser".to_string()),
                custom("decompress", Phase::Before),
            )
            .extend_with(
                Phase::Before,
                Anchor::After("body-parser".to_string()),
                custom("audit", Phase::Before),
            );

        let steps = compute_http_middleware(&descriptor(), &options, None).unwrap();
        let before = ids(&steps.before);
        let parser = before.iter().position(|id| *id == "body-parser").unwrap();
        assert_eq!(before[parser - 1], "decompress");
        assert_eq!(before[parser + 1], "audit");
    }

    #[test]
    fn extend_can_anchor_on_a_previously_spliced_step() {
        let options = CustomizationOptions::default()
            .extend_with(Phase::Before, Anchor::PhaseEnd, custom("audit", Phase::Before))
            .extend_with(
                Phase::Before,
                Anchor::After("audit".to_string()),
                custom("metrics", Phase::Before),
            );

        let steps = compute_http_middleware(&descriptor(), &options, None).unwrap();
        let before = ids(&steps.before);
        let audit = before.iter().position(|id| *id == "audit").unwrap();
        assert_eq!(before[audit + 1], "metrics");
    }

    #[test]
    fn extend_anchored_on_unknown_id_fails_at_assembly() {
        let options = CustomizationOptions::default().extend_with(
            Phase::Before,
            Anchor::After("no-such-step".to_string()),
            custom("orphan", Phase::Before),
        );

        let err = compute_http_middleware(&descriptor(), &options, None).unwrap_err();
        assert!(matches!(err, Error::Configuration(_)), "got: {err:?}");
        assert!(err.to_string().contains("no-such-step"));
    }

    #[test]
    fn extend_can_anchor_on_the_terminal_mapper() {
        let options = CustomizationOptions::default().extend_with(
            Phase::OnError,
            Anchor::Before("error-mapper".to_string()),
            custom("alerting", Phase::OnError),
        );

        let steps = compute_http_middleware(&descriptor(), &options, None).unwrap();
        let error_ids: Vec<&str> = steps.error_steps().map(|s| s.id().unwrap()).collect();
        assert_eq!(error_ids, vec!["alerting", "error-mapper"]);
    }

    // ── Overrides ───────────────────────────────────────────────────────────

    #[test]
    fn override_replaces_the_step_in_place() {
        let replacement = tag_step(
            "body-parser",
            Phase::Before,
            StepRole::BodyParsing,
            noop(),
        );
        let options =
            CustomizationOptions::default().override_with(Phase::Before, replacement);

        let steps = compute_http_middleware(&descriptor(), &options, None).unwrap();
        // Position preserved: still between multipart and the phase end.
        let before = ids(&steps.before);
        assert_eq!(
            before,
            vec!["content-negotiation", "multipart", "body-parser"]
        );
    }

    #[test]
    fn override_of_unknown_id_fails_at_assembly() {
        let options = CustomizationOptions::default()
            .override_with(Phase::After, custom("no-such-step", Phase::After));

        let err = compute_http_middleware(&descriptor(), &options, None).unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn override_can_replace_the_terminal_mapper() {
        let replacement = tag_step(
            "error-mapper",
            Phase::OnError,
            StepRole::ErrorMapping,
            noop(),
        );
        let options =
            CustomizationOptions::default().override_with(Phase::OnError, replacement);

        let steps = compute_http_middleware(&descriptor(), &options, None).unwrap();
        assert_eq!(ids(&steps.finally), vec!["error-mapper"]);
    }

    #[test]
    fn override_dropping_the_validation_role_fails_invariants() {
        // Replacing schema-before with a custom-role step leaves the declared
        // event schema unenforced.
        let options = CustomizationOptions::default()
            .override_with(Phase::Before, custom("schema-before", Phase::Before));

        let err =
            compute_http_middleware(&descriptor_with_schemas(), &options, None).unwrap_err();
        assert!(err.to_string().contains("input-validation"));
    }

    // ── Profiles ────────────────────────────────────────────────────────────

    #[test]
    fn unknown_profile_fails_at_assembly() {
        let options = CustomizationOptions::default().with_profile("does-not-exist");
        let err = compute_http_middleware(&descriptor(), &options, None).unwrap_err();
        assert!(err.to_string().contains("does-not-exist"));
    }

    #[test]
    fn strict_profile_is_built_in() {
        let options = CustomizationOptions::default().with_profile("strict");
        let steps = compute_http_middleware(&descriptor_with_schemas(), &options, None).unwrap();
        assert_eq!(ids(&steps.finally), vec!["error-mapper"]);
    }

    #[test]
    fn registered_profile_becomes_the_baseline() {
        register_profile(
            "lean-test-profile",
            Arc::new(|_seed: &ProfileSeed| {
                let mut steps = PhasedSteps::default();
                steps.finally.push(tag_step(
                    "error-mapper",
                    Phase::OnError,
                    StepRole::ErrorMapping,
                    Arc::new(OpFn(|_record: &mut InvocationRecord| Ok(()))),
                ));
                steps
            }),
        );

        let options = CustomizationOptions::default().with_profile("lean-test-profile");
        let steps = compute_http_middleware(&descriptor(), &options, None).unwrap();
        assert!(steps.before.is_empty());
        assert_eq!(steps.error_steps().count(), 1);
    }

    // ── Invariants ──────────────────────────────────────────────────────────

    #[test]
    fn colliding_identifiers_in_one_phase_fail_invariants() {
        let options = CustomizationOptions::default()
            .extend_with(Phase::Before, Anchor::PhaseEnd, custom("audit", Phase::Before))
            .extend_with(Phase::Before, Anchor::PhaseStart, custom("audit", Phase::Before));

        let err = compute_http_middleware(&descriptor(), &options, None).unwrap_err();
        assert!(err.to_string().contains("duplicate step identifier"));
    }

    #[test]
    fn same_identifier_in_different_phases_is_allowed() {
        let options = CustomizationOptions::default()
            .extend_with(Phase::Before, Anchor::PhaseEnd, custom("audit", Phase::Before))
            .extend_with(Phase::After, Anchor::PhaseStart, custom("audit", Phase::After));

        assert!(compute_http_middleware(&descriptor(), &options, None).is_ok());
    }

    #[test]
    fn empty_error_phase_fails_invariants() {
        let steps = PhasedSteps::default();
        let err = assert_invariants(&steps, false, false).unwrap_err();
        assert!(err.to_string().contains("error phase"));
    }

    #[test]
    fn untagged_step_fails_invariants() {
        let mut steps = PhasedSteps::default();
        steps.before.push(custom("", Phase::Before));
        steps.finally.push(custom("error-mapper", Phase::OnError));

        let err = assert_invariants(&steps, false, false).unwrap_err();
        assert!(err.to_string().contains("no identifier tag"));
    }

    #[test]
    fn schema_declarations_require_matching_validation_roles() {
        let mut steps = PhasedSteps::default();
        steps.finally.push(tag_step(
            "error-mapper",
            Phase::OnError,
            StepRole::ErrorMapping,
            noop(),
        ));

        let err = assert_invariants(&steps, true, false).unwrap_err();
        assert!(err.to_string().contains("input-validation"));

        let err = assert_invariants(&steps, false, true).unwrap_err();
        assert!(err.to_string().contains("output-validation"));
    }
}
