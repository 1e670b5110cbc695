//! Tagged pipeline steps and the phase container.
//!
//! Steps are opaque tagged operations: an identifier, the phase they run in,
//! a role describing what they contribute, and the operation itself behind a
//! trait object. Customization is pure data transformation over the ordered
//! step lists; nothing here executes anything.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use super::combine::PipelineUnit;
use super::record::InvocationRecord;
use crate::error::{Error, Result};

/// The phase a step is bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    /// Pre-invocation
    Before,
    /// Post-invocation
    After,
    /// Error path
    OnError,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Before => write!(f, "before"),
            Self::After => write!(f, "after"),
            Self::OnError => write!(f, "on-error"),
        }
    }
}

/// What a step contributes to the pipeline contract.
///
/// Roles are how the invariant checker recognizes that mandatory concerns
/// survive arbitrary customization without inspecting step internals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepRole {
    /// Content-type negotiation
    Negotiation,
    /// Body decoding/parsing (including multipart detection)
    BodyParsing,
    /// Input schema validation
    InputValidation,
    /// Output schema validation
    OutputValidation,
    /// Response serialization
    Serialization,
    /// Error-to-response mapping
    ErrorMapping,
    /// Security descriptor stamping
    SecurityContext,
    /// Anything supplied by callers
    Custom,
}

/// One operation over the in-flight invocation record.
///
/// Operations signal *expected* failures (validation, business errors) by
/// capturing them on the record; a returned `Err` is an unexpected raise that
/// propagates to the wrapper boundary.
#[async_trait]
pub trait StepOp: Send + Sync {
    /// Run the operation against the record.
    async fn run(&self, record: &mut InvocationRecord) -> Result<()>;
}

/// Adapter turning a plain synchronous function into a step operation.
pub struct OpFn<F>(pub F);

#[async_trait]
impl<F> StepOp for OpFn<F>
where
    F: Fn(&mut InvocationRecord) -> Result<()> + Send + Sync,
{
    async fn run(&self, record: &mut InvocationRecord) -> Result<()> {
        (self.0)(record)
    }
}

/// A named unit of behavior bound to exactly one phase.
#[derive(Clone)]
pub struct PipelineStep {
    id: String,
    phase: Phase,
    role: StepRole,
    op: Arc<dyn StepOp>,
}

impl fmt::Debug for PipelineStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineStep")
            .field("id", &self.id)
            .field("phase", &self.phase)
            .field("role", &self.role)
            .finish_non_exhaustive()
    }
}

/// Attach a stable identifier to an operation, producing a pipeline step.
pub fn tag_step(
    id: impl Into<String>,
    phase: Phase,
    role: StepRole,
    op: Arc<dyn StepOp>,
) -> PipelineStep {
    PipelineStep {
        id: id.into(),
        phase,
        role,
        op,
    }
}

impl PipelineStep {
    /// The step's stable identifier.
    ///
    /// Fails with a configuration error for a step that was never tagged
    /// (empty identifier): every step entering a pipeline must be
    /// addressable by anchors and overrides.
    pub fn id(&self) -> Result<&str> {
        if self.id.is_empty() {
            return Err(Error::configuration(format!(
                "step in {} phase has no identifier tag",
                self.phase
            )));
        }
        Ok(&self.id)
    }

    /// The phase this step is bound to.
    #[must_use]
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// The step's declared role.
    #[must_use]
    pub fn role(&self) -> StepRole {
        self.role
    }

    /// The underlying operation.
    #[must_use]
    pub fn op(&self) -> Arc<dyn StepOp> {
        Arc::clone(&self.op)
    }
}

/// Ordered steps grouped by phase, plus the sentinel `finally` slot.
///
/// Insertion order is invocation order for `before` and `after`. The
/// `finally` slot holds error-phase steps pinned after every ordinary
/// `on_error` step; the terminal error mapper lives there, so splices into
/// the error phase can never push it out of last place.
#[derive(Clone, Default)]
pub struct PhasedSteps {
    /// Pre-invocation steps, in invocation order
    pub before: Vec<PipelineStep>,
    /// Post-invocation steps, in invocation order
    pub after: Vec<PipelineStep>,
    /// Error-path steps, order advisory
    pub on_error: Vec<PipelineStep>,
    /// Sentinel slot: error-path steps that always run last
    pub finally: Vec<PipelineStep>,
}

impl fmt::Debug for PhasedSteps {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ids = |steps: &[PipelineStep]| -> Vec<String> {
            steps.iter().map(|s| s.id.clone()).collect()
        };
        f.debug_struct("PhasedSteps")
            .field("before", &ids(&self.before))
            .field("after", &ids(&self.after))
            .field("on_error", &ids(&self.on_error))
            .field("finally", &ids(&self.finally))
            .finish()
    }
}

impl PhasedSteps {
    /// The ordinary step list for a phase (`finally` is addressed separately).
    #[must_use]
    pub fn steps(&self, phase: Phase) -> &[PipelineStep] {
        match phase {
            Phase::Before => &self.before,
            Phase::After => &self.after,
            Phase::OnError => &self.on_error,
        }
    }

    /// Mutable access to the ordinary step list for a phase.
    pub fn steps_mut(&mut self, phase: Phase) -> &mut Vec<PipelineStep> {
        match phase {
            Phase::Before => &mut self.before,
            Phase::After => &mut self.after,
            Phase::OnError => &mut self.on_error,
        }
    }

    /// Every error-phase step in execution order: `on_error`, then `finally`.
    pub fn error_steps(&self) -> impl Iterator<Item = &PipelineStep> {
        self.on_error.iter().chain(self.finally.iter())
    }

    /// Flatten into independent pipeline units, one per step, preserving
    /// phase order. Error-phase units place `finally` steps last.
    #[must_use]
    pub fn into_units(self) -> Vec<PipelineUnit> {
        let mut units = Vec::new();
        for step in self.before {
            units.push(PipelineUnit::before(step.op()));
        }
        for step in self.after {
            units.push(PipelineUnit::after(step.op()));
        }
        for step in self.on_error.iter().chain(self.finally.iter()) {
            units.push(PipelineUnit::on_error(step.op()));
        }
        units
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop() -> Arc<dyn StepOp> {
        Arc::new(OpFn(|_record: &mut InvocationRecord| Ok(())))
    }

    #[test]
    fn tagged_step_exposes_its_identifier() {
        let step = tag_step("body-parser", Phase::Before, StepRole::BodyParsing, noop());
        assert_eq!(step.id().unwrap(), "body-parser");
        assert_eq!(step.phase(), Phase::Before);
        assert_eq!(step.role(), StepRole::BodyParsing);
    }

    #[test]
    fn untagged_step_fails_with_configuration_error() {
        let step = tag_step("", Phase::After, StepRole::Custom, noop());
        let err = step.id().unwrap_err();
        assert!(matches!(err, Error::Configuration(_)), "got: {err:?}");
    }

    #[test]
    fn error_steps_put_finally_last() {
        let mut steps = PhasedSteps::default();
        steps.on_error.push(tag_step(
            "retry-hint",
            Phase::OnError,
            StepRole::Custom,
            noop(),
        ));
        steps.finally.push(tag_step(
            "error-mapper",
            Phase::OnError,
            StepRole::ErrorMapping,
            noop(),
        ));

        let ids: Vec<&str> = steps.error_steps().map(|s| s.id().unwrap()).collect();
        assert_eq!(ids, vec!["retry-hint", "error-mapper"]);
    }

    #[test]
    fn into_units_yields_one_unit_per_step() {
        let mut steps = PhasedSteps::default();
        steps
            .before
            .push(tag_step("a", Phase::Before, StepRole::Custom, noop()));
        steps
            .after
            .push(tag_step("b", Phase::After, StepRole::Custom, noop()));
        steps
            .finally
            .push(tag_step("c", Phase::OnError, StepRole::ErrorMapping, noop()));

        assert_eq!(steps.into_units().len(), 3);
    }
}
