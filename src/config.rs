//! Engine configuration.
//!
//! Layered the usual way: compiled-in defaults, then an optional YAML file,
//! then `FNPIPE_*` environment variables (double underscore separating
//! nested keys, e.g. `FNPIPE_ENV__API_URL`). The `env` map is the flat
//! key→value mapping handed to every business function as its resolved
//! stage environment.

use std::collections::HashMap;
use std::path::Path;

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Yaml},
};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Event-kind tokens treated as HTTP-flavored
    pub http_kinds: Vec<String>,
    /// Deployment stage name (e.g. `dev`, `prod`)
    pub stage: String,
    /// Flat stage environment injected into every handler context
    pub env: HashMap<String, String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            http_kinds: vec!["rest".to_string(), "http".to_string()],
            stage: "dev".to_string(),
            env: HashMap::new(),
        }
    }
}

impl EngineConfig {
    /// Load configuration, layering an optional YAML file and `FNPIPE_*`
    /// environment variables over the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));
        if let Some(path) = path {
            figment = figment.merge(Yaml::file(path));
        }
        figment
            .merge(Env::prefixed("FNPIPE_").split("__"))
            .extract()
            .map_err(|e| Error::configuration(format!("failed to load engine config: {e}")))
    }

    /// Whether functions with this event-kind token get HTTP middleware.
    #[must_use]
    pub fn is_http_kind(&self, kind: &str) -> bool {
        self.http_kinds.iter().any(|k| k == kind)
    }

    /// Extend the HTTP token set (e.g. for a host-specific `webhook` kind).
    pub fn register_http_kind(&mut self, kind: impl Into<String>) {
        let kind = kind.into();
        if !self.is_http_kind(&kind) {
            self.http_kinds.push(kind);
        }
    }
}
