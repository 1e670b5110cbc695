//! The outward-facing handler wrapper.
//!
//! `wrap_handler` turns a [`FunctionDescriptor`] and a business function
//! into a single entrypoint. The pipeline is assembled once here, at
//! registration (configuration failures surface immediately, never on the
//! invocation path) and is immutable afterwards, so concurrent invocations
//! share it without synchronization. Each invocation gets its own record.

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::BoxFuture;
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::EngineConfig;
use crate::descriptor::FunctionDescriptor;
use crate::error::{BusinessError, Error, Result};
use crate::pipeline::combine::{PipelineUnit, combine};
use crate::pipeline::customize::{assert_invariants, compute_http_middleware};
use crate::pipeline::defaults::build_bare_defaults;
use crate::pipeline::record::{InvocationRecord, scratch};
use crate::response::Outcome;

/// Structured logging capability handed to business functions.
///
/// Steps and business logic must not assume a concrete implementation
/// beyond these four levels.
pub trait Logger: Send + Sync {
    /// Debug-level message
    fn debug(&self, message: &str);
    /// Info-level message
    fn info(&self, message: &str);
    /// Warn-level message
    fn warn(&self, message: &str);
    /// Error-level message
    fn error(&self, message: &str);
}

/// Default [`Logger`] backed by the `tracing` macros.
pub struct TracingLogger;

impl Logger for TracingLogger {
    fn debug(&self, message: &str) {
        tracing::debug!(target: "fnpipe::handler", "{message}");
    }
    fn info(&self, message: &str) {
        tracing::info!(target: "fnpipe::handler", "{message}");
    }
    fn warn(&self, message: &str) {
        tracing::warn!(target: "fnpipe::handler", "{message}");
    }
    fn error(&self, message: &str) {
        tracing::error!(target: "fnpipe::handler", "{message}");
    }
}

/// Resolves a security-context token into an opaque descriptor.
///
/// Consulted once, at registration, and only for HTTP-flavored functions.
pub trait SecurityResolver: Send + Sync {
    /// Resolve `token`, returning `None` when it is unknown.
    fn resolve(&self, token: &str) -> Option<Value>;
}

/// Everything a business function receives besides the validated event.
#[derive(Clone)]
pub struct HandlerContext {
    /// Platform context passed through from the hosting runtime
    pub platform: Value,
    /// Resolved security descriptor, when the declaration carries one
    pub security: Option<Value>,
    /// Flat stage environment from the engine configuration
    pub env: HashMap<String, String>,
    /// Structured logger
    pub logger: Arc<dyn Logger>,
}

/// The caller's business logic: validated event in, raw result or error out.
pub type BusinessFn = Arc<
    dyn Fn(Value, HandlerContext) -> BoxFuture<'static, std::result::Result<Value, BusinessError>>
        + Send
        + Sync,
>;

/// Adapt an async closure into a [`BusinessFn`].
pub fn business<F, Fut>(f: F) -> BusinessFn
where
    F: Fn(Value, HandlerContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = std::result::Result<Value, BusinessError>> + Send + 'static,
{
    Arc::new(move |event, ctx| {
        let fut: BoxFuture<'static, std::result::Result<Value, BusinessError>> =
            Box::pin(f(event, ctx));
        fut
    })
}

/// Registration-time collaborators for [`wrap_handler`].
#[derive(Clone)]
pub struct WrapOptions {
    /// Engine configuration (HTTP token set, stage environment)
    pub config: EngineConfig,
    /// External security resolver, consulted for HTTP flavors
    pub security_resolver: Option<Arc<dyn SecurityResolver>>,
    /// Logger handed to business functions
    pub logger: Arc<dyn Logger>,
}

impl Default for WrapOptions {
    fn default() -> Self {
        Self {
            config: EngineConfig::default(),
            security_resolver: None,
            logger: Arc::new(TracingLogger),
        }
    }
}

/// Wrap a declared function into its invocation entrypoint.
///
/// Pipeline assembly happens here: HTTP-flavored declarations get the full
/// customized middleware set, everything else gets schema validation and
/// error mapping only. Assembly failures are configuration errors and are
/// fatal to registration.
pub fn wrap_handler(
    descriptor: FunctionDescriptor,
    business_fn: BusinessFn,
    options: WrapOptions,
) -> Result<WrappedHandler> {
    let http = options.config.is_http_kind(&descriptor.event_kind);

    let security = if http {
        match (&descriptor.security_context, &options.security_resolver) {
            (Some(token), Some(resolver)) => resolver.resolve(token),
            _ => None,
        }
    } else {
        None
    };

    let steps = if http {
        compute_http_middleware(&descriptor, &descriptor.customization, security.clone())?
    } else {
        let steps = build_bare_defaults(
            descriptor.event_schema.clone(),
            descriptor.response_schema.clone(),
        );
        assert_invariants(
            &steps,
            descriptor.event_schema.is_some(),
            descriptor.response_schema.is_some(),
        )?;
        steps
    };

    debug!(
        function = %descriptor.name,
        kind = %descriptor.event_kind,
        http,
        "handler registered"
    );

    Ok(WrappedHandler {
        pipeline: combine(steps.into_units()),
        security,
        env: options.config.env.clone(),
        logger: Arc::clone(&options.logger),
        business: business_fn,
        descriptor,
    })
}

/// A registered function: descriptor plus its assembled pipeline.
pub struct WrappedHandler {
    descriptor: FunctionDescriptor,
    business: BusinessFn,
    pipeline: PipelineUnit,
    security: Option<Value>,
    env: HashMap<String, String>,
    logger: Arc<dyn Logger>,
}

impl std::fmt::Debug for WrappedHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WrappedHandler")
            .field("descriptor", &self.descriptor)
            .field("security", &self.security)
            .field("env", &self.env)
            .finish_non_exhaustive()
    }
}

impl WrappedHandler {
    /// The declaration this handler was built from, for the documentation
    /// and deployment generators.
    #[must_use]
    pub fn descriptor(&self) -> &FunctionDescriptor {
        &self.descriptor
    }

    /// Invoke the wrapped function with a raw event and platform context.
    ///
    /// HTTP flavors resolve to an HTTP-shaped outcome, shaped error
    /// responses included, while other flavors resolve to the raw business
    /// result or rethrow the original error for the hosting platform's
    /// retry semantics.
    pub async fn invoke(&self, raw_event: Value, platform: Value) -> Result<Outcome> {
        let mut record = InvocationRecord::new(raw_event);
        debug!(
            function = %self.descriptor.name,
            invocation = %record.invocation_id,
            "invocation started"
        );

        // Failures in `before` route through the error phase, never past it.
        if let Err(raised) = self.pipeline.run_before(&mut record).await {
            record.capture(raised);
        }

        // A response produced in `before` is a protocol-level early return;
        // it is already fully shaped and skips the rest of the pipeline.
        if record.error.is_none() {
            if let Some(outcome) = record.response.take() {
                return Ok(outcome);
            }

            let context = HandlerContext {
                platform,
                security: record
                    .scratch(scratch::SECURITY)
                    .cloned()
                    .or_else(|| self.security.clone()),
                env: self.env.clone(),
                logger: Arc::clone(&self.logger),
            };
            let event = record.effective_event().clone();
            match (self.business)(event, context).await {
                Ok(result) => record.response = Some(Outcome::Raw(result)),
                Err(business_error) => record.capture(Error::Business(business_error)),
            }
        }

        if let Err(raised) = self.pipeline.run_after(&mut record).await {
            if record.error.is_none() {
                record.capture(raised);
            }
        }

        if record.error.is_some() {
            // A raise out of the error phase itself cannot be recovered.
            self.pipeline.run_on_error(&mut record).await?;
        }

        match (record.response.take(), record.error.take()) {
            (Some(outcome), _) => Ok(outcome),
            (None, Some(error)) => {
                warn!(
                    function = %self.descriptor.name,
                    invocation = %record.invocation_id,
                    error = %error,
                    "invocation failed"
                );
                Err(error)
            }
            (None, None) => Err(Error::InternalInvariant(format!(
                "pipeline for '{}' produced neither a response nor an error",
                self.descriptor.name
            ))),
        }
    }
}
