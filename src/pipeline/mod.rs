//! Middleware pipeline: steps, assembly, combination, execution state.
//!
//! A pipeline is data until the wrapper runs it: tagged steps grouped by
//! phase ([`step`]), baselines derived from a function's declaration
//! ([`defaults`]), caller customization validated against structural
//! invariants ([`customize`]), and flattening into a single executable unit
//! ([`combine`]) over the per-invocation record ([`record`]).

pub mod combine;
pub mod customize;
pub mod defaults;
pub mod record;
pub mod step;

pub use combine::{PipelineUnit, combine};
pub use customize::{
    ProfileBuilder, ProfileSeed, assert_invariants, compute_http_middleware, register_profile,
};
pub use defaults::{build_bare_defaults, build_safe_defaults, build_strict_defaults};
pub use record::InvocationRecord;
pub use step::{OpFn, Phase, PhasedSteps, PipelineStep, StepOp, StepRole, tag_step};
