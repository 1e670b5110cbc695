//! Flattening ordered pipeline units into a single unit.

use std::sync::Arc;

use async_trait::async_trait;

use super::record::InvocationRecord;
use super::step::StepOp;
use crate::error::Result;

/// An independent pipeline unit with optional operations per phase.
///
/// [`combine`] flattens many units into one; combined units nest, so a
/// combined unit can itself be combined again.
#[derive(Clone, Default)]
pub struct PipelineUnit {
    /// Pre-invocation operation
    pub before: Option<Arc<dyn StepOp>>,
    /// Post-invocation operation
    pub after: Option<Arc<dyn StepOp>>,
    /// Error-path operation
    pub on_error: Option<Arc<dyn StepOp>>,
}

impl PipelineUnit {
    /// A unit with only a `before` operation.
    #[must_use]
    pub fn before(op: Arc<dyn StepOp>) -> Self {
        Self {
            before: Some(op),
            ..Self::default()
        }
    }

    /// A unit with only an `after` operation.
    #[must_use]
    pub fn after(op: Arc<dyn StepOp>) -> Self {
        Self {
            after: Some(op),
            ..Self::default()
        }
    }

    /// A unit with only an `on_error` operation.
    #[must_use]
    pub fn on_error(op: Arc<dyn StepOp>) -> Self {
        Self {
            on_error: Some(op),
            ..Self::default()
        }
    }

    /// Run the `before` operation, if any.
    pub async fn run_before(&self, record: &mut InvocationRecord) -> Result<()> {
        match &self.before {
            Some(op) => op.run(record).await,
            None => Ok(()),
        }
    }

    /// Run the `after` operation, if any.
    pub async fn run_after(&self, record: &mut InvocationRecord) -> Result<()> {
        match &self.after {
            Some(op) => op.run(record).await,
            None => Ok(()),
        }
    }

    /// Run the `on_error` operation, if any.
    pub async fn run_on_error(&self, record: &mut InvocationRecord) -> Result<()> {
        match &self.on_error {
            Some(op) => op.run(record).await,
            None => Ok(()),
        }
    }
}

/// Flatten ordered units into one unit with before/after/on-error semantics.
///
/// - `before` runs each constituent in order, stopping as soon as the record
///   carries a response or a captured error: the short-circuit mechanism
///   for validation failures and protocol-level early returns.
/// - `after` runs every constituent unconditionally; steps are expected to
///   be no-ops on record shapes that do not concern them.
/// - `on_error` runs each constituent only while the record carries a
///   captured error, independent of whether a response exists.
///
/// The combinator never raises on its own; whatever a constituent raises
/// propagates unchanged to the wrapper boundary.
#[must_use]
pub fn combine(units: impl IntoIterator<Item = PipelineUnit>) -> PipelineUnit {
    let mut befores = Vec::new();
    let mut afters = Vec::new();
    let mut on_errors = Vec::new();
    for unit in units {
        if let Some(op) = unit.before {
            befores.push(op);
        }
        if let Some(op) = unit.after {
            afters.push(op);
        }
        if let Some(op) = unit.on_error {
            on_errors.push(op);
        }
    }

    PipelineUnit {
        before: Some(Arc::new(BeforeChain(befores))),
        after: Some(Arc::new(AfterChain(afters))),
        on_error: Some(Arc::new(ErrorChain(on_errors))),
    }
}

struct BeforeChain(Vec<Arc<dyn StepOp>>);

#[async_trait]
impl StepOp for BeforeChain {
    async fn run(&self, record: &mut InvocationRecord) -> Result<()> {
        for op in &self.0 {
            if record.halted() {
                break;
            }
            op.run(record).await?;
        }
        Ok(())
    }
}

struct AfterChain(Vec<Arc<dyn StepOp>>);

#[async_trait]
impl StepOp for AfterChain {
    async fn run(&self, record: &mut InvocationRecord) -> Result<()> {
        for op in &self.0 {
            op.run(record).await?;
        }
        Ok(())
    }
}

struct ErrorChain(Vec<Arc<dyn StepOp>>);

#[async_trait]
impl StepOp for ErrorChain {
    async fn run(&self, record: &mut InvocationRecord) -> Result<()> {
        for op in &self.0 {
            if record.error.is_none() {
                break;
            }
            op.run(record).await?;
        }
        Ok(())
    }
}
