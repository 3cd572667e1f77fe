//! Error types for tensor-grid-rs.
//!
//! Every fallible engine operation returns [`Result`]. Batch operations such as
//! [`StatsEngine::compare`](crate::stats::StatsEngine::compare) do not fail on a
//! single bad layer; they record it and move on. Single explicit requests
//! (transform by name, plugin load) propagate the error directly.
//!
//! # Example
//!
//! ```rust
//! use tensor_grid::{GridError, PluginRegistry};
//!
//! let registry = PluginRegistry::new();
//! match registry.get("does-not-exist") {
//!     Err(GridError::UnknownPlugin(name)) => assert_eq!(name, "does-not-exist"),
//!     _ => unreachable!(),
//! }
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias for tensor-grid-rs operations.
pub type Result<T> = std::result::Result<T, GridError>;

/// Pipeline stage of a transformer plugin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    /// Tensor preprocessing before layout.
    Preprocess,
    /// The layout itself.
    Transform,
    /// Grid postprocessing after layout.
    Postprocess,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Preprocess => "preprocess",
            Self::Transform => "transform",
            Self::Postprocess => "postprocess",
        };
        f.write_str(name)
    }
}

/// Errors that can occur in tensor-grid-rs.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum GridError {
    /// No plugin registered under this name.
    #[error("unknown plugin: {0}")]
    UnknownPlugin(String),

    /// A plugin with this name is already registered.
    #[error("plugin already registered: {0}")]
    DuplicateName(String),

    /// An external plugin source could not be loaded.
    #[error("failed to load plugins from {locator}: {reason}")]
    PluginLoad {
        /// Path or other locator of the source.
        locator: String,
        /// Underlying cause.
        reason: String,
    },

    /// A plugin stage failed.
    #[error("plugin '{plugin}' failed during {stage}: {message}")]
    Transform {
        /// Plugin name.
        plugin: String,
        /// Stage that failed.
        stage: Stage,
        /// Failure description.
        message: String,
    },

    /// Statistics requested on a tensor without values.
    #[error("tensor '{0}' has no elements")]
    EmptyTensor(String),

    /// Tensor shape and values disagree, or a shape is unusable for a layout.
    #[error("shape error: {0}")]
    Shape(String),

    /// Layer name inserted twice into a collection.
    #[error("duplicate layer name: {0}")]
    DuplicateLayer(String),

    /// Layer selection matched nothing or could not be parsed.
    #[error("layer selection error: {0}")]
    Selection(String),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// Invalid YAML document.
    #[error("invalid YAML: {0}")]
    ConfigParse(#[from] serde_yaml::Error),

    /// Invalid JSON document.
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Candle tensor error.
    #[cfg(feature = "candle")]
    #[error("candle error: {0}")]
    Candle(#[from] candle_core::Error),
}

impl GridError {
    /// Build a [`GridError::PluginLoad`] from a locator and any displayable cause.
    pub fn plugin_load(locator: impl fmt::Display, reason: impl fmt::Display) -> Self {
        Self::PluginLoad {
            locator: locator.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Wrap an error raised inside a plugin stage.
    ///
    /// An error that is already a [`GridError::Transform`] is passed through
    /// so nested pipelines keep the innermost plugin and stage.
    #[must_use]
    pub fn in_stage(self, plugin: &str, stage: Stage) -> Self {
        match self {
            err @ Self::Transform { .. } => err,
            other => Self::Transform {
                plugin: plugin.to_string(),
                stage,
                message: other.to_string(),
            },
        }
    }
}
