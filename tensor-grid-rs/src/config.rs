//! Engine configuration.
//!
//! [`EngineConfig`] collects every tunable of the engine. It is read from YAML,
//! optionally overridden by `TENSOR_GRID_*` environment variables, and
//! validated before use.

use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::dead_neurons::{DeadNeuronDetector, DEFAULT_DEAD_THRESHOLD};
use crate::error::{GridError, Result};
use crate::gradient_health::{
    GradientHealthAnalyzer, DEFAULT_EXPLODE_THRESHOLD, DEFAULT_VANISH_THRESHOLD,
};
use crate::stats::{StatsEngine, DEFAULT_EPSILON};

/// Prefix of environment variables read by [`EngineConfig::with_env_overrides`].
pub const ENV_PREFIX: &str = "TENSOR_GRID_";

/// Configuration for the statistics engine, analyzers and plugin registry.
///
/// # Example
///
/// ```rust
/// use tensor_grid::EngineConfig;
///
/// # fn main() -> tensor_grid::Result<()> {
/// let config = EngineConfig::default()
///     .with_dead_neuron_threshold(1e-4)
///     .with_default_plugin("spiral");
/// config.validate()?;
/// assert_eq!(config.dead_detector().threshold(), 1e-4);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Values with `|v| < near_zero_epsilon` count as near zero.
    pub near_zero_epsilon: f64,

    /// Units whose weights are all below this magnitude are dead.
    pub dead_neuron_threshold: f64,

    /// Mean absolute gradient below this is vanishing.
    pub gradient_vanishing_threshold: f64,

    /// Max absolute gradient above this is exploding.
    pub gradient_exploding_threshold: f64,

    /// Plugin used when none is named.
    pub default_plugin: String,

    /// Directory of plugin manifests.
    pub plugin_directory: Option<PathBuf>,

    /// Load `plugin_directory` when building a registry.
    pub auto_load_plugins: bool,

    /// Bins for value histograms.
    pub histogram_bins: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            near_zero_epsilon: DEFAULT_EPSILON,
            dead_neuron_threshold: DEFAULT_DEAD_THRESHOLD,
            gradient_vanishing_threshold: DEFAULT_VANISH_THRESHOLD,
            gradient_exploding_threshold: DEFAULT_EXPLODE_THRESHOLD,
            default_plugin: "flatten".into(),
            plugin_directory: None,
            auto_load_plugins: true,
            histogram_bins: 50,
        }
    }
}

impl EngineConfig {
    /// Load configuration from a YAML file. Missing keys take their defaults.
    ///
    /// # Errors
    ///
    /// Returns an IO error if the file cannot be read and
    /// [`GridError::ConfigParse`] if it is not valid YAML.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a YAML file.
    ///
    /// # Errors
    ///
    /// Returns an IO or serialization error.
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = serde_yaml::to_string(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Apply `TENSOR_GRID_<KEY>` environment variables on top of this config.
    ///
    /// Keys are the upper-cased field names, e.g. `TENSOR_GRID_DEFAULT_PLUGIN`.
    /// Values that fail to parse are ignored with a warning.
    #[must_use]
    pub fn with_env_overrides(mut self) -> Self {
        self.apply_overrides(|key| std::env::var(format!("{ENV_PREFIX}{key}")).ok());
        self
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        override_parsed(&lookup, "NEAR_ZERO_EPSILON", &mut self.near_zero_epsilon);
        override_parsed(&lookup, "DEAD_NEURON_THRESHOLD", &mut self.dead_neuron_threshold);
        override_parsed(
            &lookup,
            "GRADIENT_VANISHING_THRESHOLD",
            &mut self.gradient_vanishing_threshold,
        );
        override_parsed(
            &lookup,
            "GRADIENT_EXPLODING_THRESHOLD",
            &mut self.gradient_exploding_threshold,
        );
        override_parsed(&lookup, "AUTO_LOAD_PLUGINS", &mut self.auto_load_plugins);
        override_parsed(&lookup, "HISTOGRAM_BINS", &mut self.histogram_bins);
        if let Some(plugin) = lookup("DEFAULT_PLUGIN") {
            self.default_plugin = plugin;
        }
        if let Some(dir) = lookup("PLUGIN_DIRECTORY") {
            self.plugin_directory = (!dir.is_empty()).then(|| PathBuf::from(dir));
        }
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`GridError::Config`] naming the first invalid field.
    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("near_zero_epsilon", self.near_zero_epsilon),
            ("dead_neuron_threshold", self.dead_neuron_threshold),
            ("gradient_vanishing_threshold", self.gradient_vanishing_threshold),
            ("gradient_exploding_threshold", self.gradient_exploding_threshold),
        ];
        for (field, value) in positive {
            if !(value.is_finite() && value > 0.0) {
                return Err(GridError::Config(format!(
                    "{field} must be a positive number, got {value}"
                )));
            }
        }

        if self.gradient_vanishing_threshold >= self.gradient_exploding_threshold {
            return Err(GridError::Config(
                "gradient_vanishing_threshold must be below gradient_exploding_threshold".into(),
            ));
        }

        if self.default_plugin.trim().is_empty() {
            return Err(GridError::Config("default_plugin is required".into()));
        }

        if self.histogram_bins == 0 {
            return Err(GridError::Config("histogram_bins must be > 0".into()));
        }

        Ok(())
    }

    /// Statistics engine using `near_zero_epsilon`.
    #[must_use]
    pub fn stats_engine(&self) -> StatsEngine {
        StatsEngine::new(self.near_zero_epsilon)
    }

    /// Dead neuron detector using `dead_neuron_threshold`.
    #[must_use]
    pub fn dead_detector(&self) -> DeadNeuronDetector {
        DeadNeuronDetector::new(self.dead_neuron_threshold)
    }

    /// Gradient analyzer using both gradient thresholds.
    #[must_use]
    pub fn gradient_analyzer(&self) -> GradientHealthAnalyzer {
        GradientHealthAnalyzer::new(
            self.gradient_vanishing_threshold,
            self.gradient_exploding_threshold,
        )
    }

    /// Set the near-zero epsilon.
    #[must_use]
    pub fn with_near_zero_epsilon(mut self, epsilon: f64) -> Self {
        self.near_zero_epsilon = epsilon;
        self
    }

    /// Set the dead neuron threshold.
    #[must_use]
    pub fn with_dead_neuron_threshold(mut self, threshold: f64) -> Self {
        self.dead_neuron_threshold = threshold;
        self
    }

    /// Set both gradient thresholds.
    #[must_use]
    pub fn with_gradient_thresholds(mut self, vanish: f64, explode: f64) -> Self {
        self.gradient_vanishing_threshold = vanish;
        self.gradient_exploding_threshold = explode;
        self
    }

    /// Set the default plugin name.
    #[must_use]
    pub fn with_default_plugin(mut self, name: impl Into<String>) -> Self {
        self.default_plugin = name.into();
        self
    }

    /// Set the plugin manifest directory.
    #[must_use]
    pub fn with_plugin_directory(mut self, directory: impl Into<PathBuf>) -> Self {
        self.plugin_directory = Some(directory.into());
        self
    }

    /// Enable or disable loading the plugin directory.
    #[must_use]
    pub const fn with_auto_load_plugins(mut self, enabled: bool) -> Self {
        self.auto_load_plugins = enabled;
        self
    }

    /// Set the number of histogram bins.
    #[must_use]
    pub const fn with_histogram_bins(mut self, bins: usize) -> Self {
        self.histogram_bins = bins;
        self
    }
}

fn override_parsed<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str, slot: &mut T) {
    let Some(raw) = lookup(key) else {
        return;
    };
    match raw.trim().parse() {
        Ok(value) => *slot = value,
        Err(_) => tracing::warn!("Ignoring {ENV_PREFIX}{key}={raw:?}: not a valid value"),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::io::Write;

    use tempfile::NamedTempFile;

    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.near_zero_epsilon, 1e-6);
        assert_eq!(config.dead_neuron_threshold, 1e-6);
        assert_eq!(config.gradient_vanishing_threshold, 1e-7);
        assert_eq!(config.gradient_exploding_threshold, 1e3);
        assert_eq!(config.default_plugin, "flatten");
        assert!(config.plugin_directory.is_none());
        assert!(config.auto_load_plugins);
        assert_eq!(config.histogram_bins, 50);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "dead_neuron_threshold: 0.001\ndefault_plugin: spiral").unwrap();

        let config = EngineConfig::from_file(file.path()).unwrap();
        assert_eq!(config.dead_neuron_threshold, 0.001);
        assert_eq!(config.default_plugin, "spiral");
        assert_eq!(config.histogram_bins, 50);
    }

    #[test]
    fn test_file_roundtrip() {
        let file = NamedTempFile::new().unwrap();
        let config = EngineConfig::default()
            .with_plugin_directory("plugins")
            .with_histogram_bins(8);
        config.to_file(file.path()).unwrap();
        assert_eq!(EngineConfig::from_file(file.path()).unwrap(), config);
    }

    #[test]
    fn test_invalid_yaml() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "histogram_bins: [not, a, number]").unwrap();
        assert!(matches!(
            EngineConfig::from_file(file.path()),
            Err(GridError::ConfigParse(_))
        ));
    }

    #[test]
    fn test_validation() {
        assert!(EngineConfig::default().with_near_zero_epsilon(0.0).validate().is_err());
        assert!(EngineConfig::default()
            .with_dead_neuron_threshold(f64::NAN)
            .validate()
            .is_err());
        assert!(EngineConfig::default()
            .with_gradient_thresholds(10.0, 1.0)
            .validate()
            .is_err());
        assert!(EngineConfig::default().with_default_plugin(" ").validate().is_err());
        assert!(EngineConfig::default().with_histogram_bins(0).validate().is_err());
    }

    #[test]
    fn test_overrides() {
        let vars: HashMap<&str, &str> = [
            ("DEAD_NEURON_THRESHOLD", "0.5"),
            ("DEFAULT_PLUGIN", "normalized"),
            ("AUTO_LOAD_PLUGINS", "false"),
            ("HISTOGRAM_BINS", "many"),
            ("PLUGIN_DIRECTORY", "/opt/plugins"),
        ]
        .into_iter()
        .collect();

        let mut config = EngineConfig::default();
        config.apply_overrides(|key| vars.get(key).map(|v| (*v).to_string()));

        assert_eq!(config.dead_neuron_threshold, 0.5);
        assert_eq!(config.default_plugin, "normalized");
        assert!(!config.auto_load_plugins);
        assert_eq!(config.histogram_bins, 50);
        assert_eq!(config.plugin_directory, Some(PathBuf::from("/opt/plugins")));
    }

    #[test]
    fn test_engines_use_configured_values() {
        let config = EngineConfig::default()
            .with_near_zero_epsilon(0.1)
            .with_gradient_thresholds(1e-3, 5.0);
        assert_eq!(config.stats_engine().epsilon(), 0.1);
        let report = config
            .gradient_analyzer()
            .analyze(&crate::tensor::TensorCollection::new());
        assert_eq!(report.vanish_threshold, 1e-3);
        assert_eq!(report.explode_threshold, 5.0);
    }
}
