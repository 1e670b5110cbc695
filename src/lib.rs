//! fnpipe
//!
//! Declarative handler registration for event-driven compute. A function is
//! described once (trigger kind, payload contracts, content type, security
//! posture) and fnpipe derives a validated, middleware-wrapped invocation
//! entrypoint from that single declaration.
//!
//! # Features
//!
//! - **Phased pipelines**: ordered `before`/`after`/error steps with
//!   explicit short-circuit semantics
//! - **Safe defaults**: content negotiation, body parsing, schema
//!   validation, serialization, and error shaping out of the box
//! - **Customization**: named profiles, anchored splices, and identifier
//!   overrides, all checked against structural invariants at registration
//! - **Flavor-aware**: HTTP-kind functions get the full middleware set;
//!   queue/step functions stay free of HTTP concerns
//!
//! # Example
//!
//! ```rust,ignore
//! use fnpipe::{FunctionDescriptor, WrapOptions, business, wrap_handler};
//!
//! let handler = wrap_handler(
//!     FunctionDescriptor::new("echo", "rest"),
//!     business(|event, _ctx| async move { Ok(event) }),
//!     WrapOptions::default(),
//! )?;
//! let outcome = handler.invoke(raw_event, platform_context).await?;
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod descriptor;
pub mod error;
pub mod handler;
pub mod pipeline;
pub mod response;
pub mod schema;

pub use config::EngineConfig;
pub use descriptor::{Anchor, CustomizationOptions, FunctionDescriptor};
pub use error::{BusinessError, Error, Result, ValidationError};
pub use handler::{
    BusinessFn, HandlerContext, Logger, SecurityResolver, TracingLogger, WrapOptions,
    WrappedHandler, business, wrap_handler,
};
pub use response::{HttpResponse, Outcome};
pub use schema::{JsonSchema, Schema};

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Setup tracing/logging
pub fn setup_tracing(level: &str, format: Option<&str>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::registry().with(filter);

    match format {
        Some("json") => {
            subscriber.with(fmt::layer().json()).init();
        }
        _ => {
            subscriber.with(fmt::layer()).init();
        }
    }

    Ok(())
}
