//! Author-supplied function declarations.
//!
//! A [`FunctionDescriptor`] is the single source of truth for one unit of
//! compute: trigger kind, payload contracts, content type, security posture,
//! and pipeline customization. It is created once at registration time and
//! never mutated; the handler wrapper derives everything else from it.

use std::fmt;
use std::sync::Arc;

use crate::pipeline::step::{Phase, PipelineStep};
use crate::schema::Schema;

/// Default content type for declared functions.
pub const DEFAULT_CONTENT_TYPE: &str = "application/json";

/// Immutable declaration of one unit of compute.
#[derive(Clone)]
pub struct FunctionDescriptor {
    /// Function name, used for logging and resource binding
    pub name: String,
    /// Trigger token, e.g. `rest`, `http`, `queue`, `step`
    pub event_kind: String,
    /// Declared content type for request/response bodies
    pub content_type: String,
    /// Contract for the incoming event payload
    pub event_schema: Option<Arc<dyn Schema>>,
    /// Contract for the business function's result
    pub response_schema: Option<Arc<dyn Schema>>,
    /// Security-context token, resolved externally at registration
    pub security_context: Option<String>,
    /// Pipeline customization applied at assembly time
    pub customization: CustomizationOptions,
}

impl fmt::Debug for FunctionDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionDescriptor")
            .field("name", &self.name)
            .field("event_kind", &self.event_kind)
            .field("content_type", &self.content_type)
            .field("event_schema", &self.event_schema.is_some())
            .field("response_schema", &self.response_schema.is_some())
            .field("security_context", &self.security_context)
            .finish_non_exhaustive()
    }
}

impl FunctionDescriptor {
    /// Declare a function with the given name and trigger kind.
    #[must_use]
    pub fn new(name: impl Into<String>, event_kind: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            event_kind: event_kind.into(),
            content_type: DEFAULT_CONTENT_TYPE.to_string(),
            event_schema: None,
            response_schema: None,
            security_context: None,
            customization: CustomizationOptions::default(),
        }
    }

    /// Declare the incoming event contract.
    #[must_use]
    pub fn with_event_schema(mut self, schema: Arc<dyn Schema>) -> Self {
        self.event_schema = Some(schema);
        self
    }

    /// Declare the response contract.
    #[must_use]
    pub fn with_response_schema(mut self, schema: Arc<dyn Schema>) -> Self {
        self.response_schema = Some(schema);
        self
    }

    /// Override the declared content type.
    #[must_use]
    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = content_type.into();
        self
    }

    /// Attach a security-context token.
    #[must_use]
    pub fn with_security_context(mut self, token: impl Into<String>) -> Self {
        self.security_context = Some(token.into());
        self
    }

    /// Attach pipeline customization.
    #[must_use]
    pub fn with_customization(mut self, customization: CustomizationOptions) -> Self {
        self.customization = customization;
        self
    }
}

/// Where an [`Extend`] splice lands relative to the current step set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Anchor {
    /// At the start of the phase
    PhaseStart,
    /// At the end of the phase
    PhaseEnd,
    /// Immediately before the step with this identifier
    Before(String),
    /// Immediately after the step with this identifier
    After(String),
}

/// An additional step spliced into a phase at a named anchor.
#[derive(Clone)]
pub struct Extend {
    /// Phase receiving the step
    pub phase: Phase,
    /// Insertion point, resolved against identifiers present at apply time
    pub anchor: Anchor,
    /// The step to insert
    pub step: PipelineStep,
}

/// A replacement for an existing step, matched by identifier.
#[derive(Clone)]
pub struct Override {
    /// Phase to search (the sentinel slot of the error phase included)
    pub phase: Phase,
    /// The replacement; its identifier selects the step to replace
    pub step: PipelineStep,
}

/// Pipeline customization recognized by the assembly engine.
///
/// `profile` swaps the baseline; `extend` splices run in declaration order;
/// `overrides` apply last. Whatever the combination, the assembled pipeline
/// must still satisfy the structural invariants; in particular the error
/// phase always keeps a terminal error-mapping step.
#[derive(Clone, Default)]
pub struct CustomizationOptions {
    /// Named preset baseline replacing the safe defaults
    pub profile: Option<String>,
    /// Steps spliced into phases, applied in declaration order
    pub extend: Vec<Extend>,
    /// Step replacements, applied after all splices
    pub overrides: Vec<Override>,
}

impl CustomizationOptions {
    /// Select a named profile as the baseline.
    #[must_use]
    pub fn with_profile(mut self, name: impl Into<String>) -> Self {
        self.profile = Some(name.into());
        self
    }

    /// Splice a step into a phase at the given anchor.
    #[must_use]
    pub fn extend_with(mut self, phase: Phase, anchor: Anchor, step: PipelineStep) -> Self {
        self.extend.push(Extend {
            phase,
            anchor,
            step,
        });
        self
    }

    /// Replace the step sharing the replacement's identifier.
    #[must_use]
    pub fn override_with(mut self, phase: Phase, step: PipelineStep) -> Self {
        self.overrides.push(Override { phase, step });
        self
    }
}
