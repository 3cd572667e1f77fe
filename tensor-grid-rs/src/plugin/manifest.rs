//! Declarative plugin manifests loaded at runtime.
//!
//! External plugins are not code. A manifest names one or more plugins and
//! composes each from a fixed vocabulary of preprocess steps, a layout, and
//! postprocess steps. Loading a manifest therefore never executes anything
//! from the file; it trusts the source only to describe a layout it wants.
//!
//! ```yaml
//! plugins:
//!   - name: reversed
//!     description: Fills grid in reverse order for a different perspective
//!     layout: reversed
//!   - name: conv_magnitude
//!     requires:
//!       min_rank: 4
//!     preprocess:
//!       - op: min_rank
//!         rank: 4
//!       - op: abs
//!     layout: layer_separated
//!     border: 2
//!     postprocess:
//!       - op: normalize
//! ```
//!
//! Every definition is validated before anything is registered; see
//! [`PluginRegistry::load_from_external_source`](super::PluginRegistry::load_from_external_source).

use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{GridError, Result};
use crate::grid::Grid;
use crate::tensor::TensorCollection;

use super::builtin::{
    column_major_layout, flatten_layout, layer_separated_layout, layer_weighted_layout,
    min_max_scale, reversed_layout, spiral_layout,
};
use super::TransformerPlugin;

/// A parsed manifest file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PluginManifest {
    /// Plugin definitions in file order.
    #[serde(default)]
    pub plugins: Vec<PluginDefinition>,
}

/// One plugin described by a manifest.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PluginDefinition {
    /// Unique plugin name.
    pub name: String,

    /// Description shown in plugin listings.
    #[serde(default)]
    pub description: Option<String>,

    /// Applicability conditions; all given conditions must hold.
    #[serde(default)]
    pub requires: Requirements,

    /// Steps applied to the tensors before layout.
    #[serde(default)]
    pub preprocess: Vec<PreStep>,

    /// The layout algorithm.
    pub layout: LayoutKind,

    /// Border width for `layer_separated`.
    #[serde(default)]
    pub border: Option<usize>,

    /// Border value for `layer_separated`.
    #[serde(default)]
    pub sentinel: Option<f64>,

    /// Steps applied to the grid after layout.
    #[serde(default)]
    pub postprocess: Vec<PostStep>,
}

/// Conditions checked by `can_handle`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Requirements {
    /// At least one tensor must have this many dimensions or more.
    #[serde(default)]
    pub min_rank: Option<usize>,

    /// At least one layer name must contain this substring.
    #[serde(default)]
    pub layer_pattern: Option<String>,
}

/// Tensor preprocessing step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum PreStep {
    /// Absolute value of every element.
    Abs,
    /// Clamp every element into `[min, max]`.
    Clip {
        /// Lower bound.
        min: f64,
        /// Upper bound.
        max: f64,
    },
    /// Multiply every element.
    Scale {
        /// Multiplier.
        factor: f64,
    },
    /// Keep layers whose name contains the pattern.
    SelectLayers {
        /// Substring to match.
        pattern: String,
    },
    /// Drop layers whose name contains the pattern.
    ExcludeLayers {
        /// Substring to match.
        pattern: String,
    },
    /// Keep layers with at least this many dimensions.
    MinRank {
        /// Minimum rank.
        rank: usize,
    },
}

/// Grid postprocessing step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum PostStep {
    /// Swap rows and columns.
    Transpose,
    /// Mirror top to bottom.
    FlipRows,
    /// Mirror left to right.
    FlipCols,
    /// Min-max scale finite cells into `[0, 1]`.
    Normalize,
}

/// Layout algorithm a manifest plugin delegates to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LayoutKind {
    /// Square grid, row-major.
    RowMajor,
    /// Square grid, filled from the last cell backwards.
    Reversed,
    /// Square grid, column-major.
    ColumnMajor,
    /// Square grid, spiral from the center.
    Spiral,
    /// Min-max scaled, then row-major.
    Normalized,
    /// One band per layer sized by element count.
    LayerWeighted,
    /// One block per layer with sentinel borders.
    LayerSeparated,
}

impl PluginManifest {
    /// Parse a manifest from a file. `.json` files are read as JSON, anything
    /// else as YAML.
    ///
    /// # Errors
    ///
    /// Returns [`GridError::PluginLoad`] naming the path and cause.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let locator = path.display();
        let content = std::fs::read_to_string(path).map_err(|e| GridError::plugin_load(&locator, e))?;
        let is_json = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
        let manifest: Self = if is_json {
            serde_json::from_str(&content).map_err(|e| GridError::plugin_load(&locator, e))?
        } else {
            serde_yaml::from_str(&content).map_err(|e| GridError::plugin_load(&locator, e))?
        };
        manifest
            .validate()
            .map_err(|reason| GridError::plugin_load(&locator, reason))?;
        Ok(manifest)
    }

    /// Parse and validate a YAML manifest held in memory.
    ///
    /// # Errors
    ///
    /// Returns [`GridError::PluginLoad`] with locator `<inline>`.
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let manifest: Self = serde_yaml::from_str(yaml).map_err(|e| GridError::plugin_load("<inline>", e))?;
        manifest
            .validate()
            .map_err(|reason| GridError::plugin_load("<inline>", reason))?;
        Ok(manifest)
    }

    /// Check every definition and name uniqueness within the manifest.
    ///
    /// # Errors
    ///
    /// Returns a description of the first violation.
    pub fn validate(&self) -> std::result::Result<(), String> {
        let mut seen = HashSet::new();
        for definition in &self.plugins {
            definition.validate()?;
            if !seen.insert(definition.name.as_str()) {
                return Err(format!("plugin '{}' is defined twice", definition.name));
            }
        }
        Ok(())
    }

    /// Turn every definition into a plugin.
    #[must_use]
    pub fn into_plugins(self) -> Vec<ManifestPlugin> {
        self.plugins.into_iter().map(ManifestPlugin::new).collect()
    }
}

impl PluginDefinition {
    /// Check the definition against the plugin contract.
    ///
    /// # Errors
    ///
    /// Returns a description of the first violation.
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("plugin name must not be empty".into());
        }
        if self.name.chars().any(char::is_whitespace) {
            return Err(format!("plugin name '{}' must not contain whitespace", self.name));
        }
        for step in &self.preprocess {
            match step {
                PreStep::Clip { min, max } if !(min <= max) => {
                    return Err(format!("plugin '{}': clip min {min} exceeds max {max}", self.name));
                }
                PreStep::Scale { factor } if !factor.is_finite() => {
                    return Err(format!("plugin '{}': scale factor must be finite", self.name));
                }
                PreStep::SelectLayers { pattern } | PreStep::ExcludeLayers { pattern }
                    if pattern.is_empty() =>
                {
                    return Err(format!("plugin '{}': layer pattern must not be empty", self.name));
                }
                _ => {}
            }
        }
        if self.border == Some(0) {
            return Err(format!("plugin '{}': border must be at least 1", self.name));
        }
        if (self.border.is_some() || self.sentinel.is_some()) && self.layout != LayoutKind::LayerSeparated {
            return Err(format!(
                "plugin '{}': border and sentinel only apply to layer_separated",
                self.name
            ));
        }
        Ok(())
    }
}

/// A plugin built from a [`PluginDefinition`].
#[derive(Debug, Clone)]
pub struct ManifestPlugin {
    definition: PluginDefinition,
}

impl ManifestPlugin {
    /// Wrap a definition. Call [`PluginDefinition::validate`] first.
    #[must_use]
    pub fn new(definition: PluginDefinition) -> Self {
        Self { definition }
    }

    /// The underlying definition.
    #[must_use]
    pub fn definition(&self) -> &PluginDefinition {
        &self.definition
    }
}

impl TransformerPlugin for ManifestPlugin {
    fn name(&self) -> &str {
        &self.definition.name
    }

    fn description(&self) -> &str {
        self.definition
            .description
            .as_deref()
            .unwrap_or("Custom transformer plugin")
    }

    fn can_handle(&self, tensors: &TensorCollection) -> bool {
        let requires = &self.definition.requires;
        let rank_ok = requires
            .min_rank
            .map_or(true, |rank| tensors.iter().any(|t| t.ndim() >= rank));
        let name_ok = requires
            .layer_pattern
            .as_deref()
            .map_or(true, |pattern| tensors.iter().any(|t| t.name().contains(pattern)));
        rank_ok && name_ok
    }

    fn preprocess(&self, tensors: &TensorCollection) -> Result<TensorCollection> {
        let mut current = tensors.clone();
        for step in &self.definition.preprocess {
            current = match step {
                PreStep::Abs => current.map_values(f64::abs),
                PreStep::Clip { min, max } => current.map_values(|v| v.clamp(*min, *max)),
                PreStep::Scale { factor } => current.map_values(|v| v * factor),
                PreStep::SelectLayers { pattern } => current.filtered(|t| t.name().contains(pattern.as_str())),
                PreStep::ExcludeLayers { pattern } => current.filtered(|t| !t.name().contains(pattern.as_str())),
                PreStep::MinRank { rank } => current.filtered(|t| t.ndim() >= *rank),
            };
        }
        Ok(current)
    }

    fn transform(&self, tensors: &TensorCollection) -> Result<Grid> {
        let grid = match self.definition.layout {
            LayoutKind::RowMajor => flatten_layout(&tensors.concat_values()),
            LayoutKind::Reversed => reversed_layout(&tensors.concat_values()),
            LayoutKind::ColumnMajor => column_major_layout(&tensors.concat_values()),
            LayoutKind::Spiral => spiral_layout(&tensors.concat_values()),
            LayoutKind::Normalized => {
                let mut values = tensors.concat_values();
                min_max_scale(&mut values);
                flatten_layout(&values)
            }
            LayoutKind::LayerWeighted => layer_weighted_layout(tensors),
            LayoutKind::LayerSeparated => layer_separated_layout(
                tensors,
                self.definition.border.unwrap_or(1),
                self.definition.sentinel.unwrap_or(f64::NAN),
            ),
        };
        Ok(grid)
    }

    fn postprocess(&self, grid: Grid) -> Result<Grid> {
        let mut grid = grid;
        for step in &self.definition.postprocess {
            grid = match step {
                PostStep::Transpose => grid.transposed(),
                PostStep::FlipRows => grid.flipped_rows(),
                PostStep::FlipCols => grid.flipped_cols(),
                PostStep::Normalize => {
                    min_max_scale(grid.as_mut_slice());
                    grid
                }
            };
        }
        Ok(grid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::run_pipeline;
    use crate::tensor::Tensor;

    const MANIFEST: &str = r"
plugins:
  - name: reversed
    description: Fills grid in reverse order for a different perspective
    layout: reversed
  - name: conv_abs
    requires:
      min_rank: 4
    preprocess:
      - op: min_rank
        rank: 4
      - op: abs
    layout: row_major
    postprocess:
      - op: transpose
";

    fn mixed() -> TensorCollection {
        TensorCollection::from_tensors([
            Tensor::new("conv.weight", vec![1, 1, 1, 2], vec![-1.0, 2.0]).unwrap(),
            Tensor::from_vec("conv.bias", vec![5.0]),
        ])
        .unwrap()
    }

    #[test]
    fn test_parse_manifest() {
        let manifest = PluginManifest::from_yaml_str(MANIFEST).unwrap();
        assert_eq!(manifest.plugins.len(), 2);
        assert_eq!(manifest.plugins[1].preprocess[0], PreStep::MinRank { rank: 4 });
        assert_eq!(manifest.plugins[1].postprocess, vec![PostStep::Transpose]);
    }

    #[test]
    fn test_reversed_plugin() {
        let plugins = PluginManifest::from_yaml_str(MANIFEST).unwrap().into_plugins();
        let reversed = &plugins[0];
        assert_eq!(reversed.description(), "Fills grid in reverse order for a different perspective");

        let grid = run_pipeline(reversed, &mixed()).unwrap();
        assert_eq!(grid.as_slice(), &[0.0, 5.0, 2.0, -1.0]);
    }

    #[test]
    fn test_conv_plugin_pipeline() {
        let plugins = PluginManifest::from_yaml_str(MANIFEST).unwrap().into_plugins();
        let conv = &plugins[1];
        assert!(conv.can_handle(&mixed()));
        assert!(!conv.can_handle(&TensorCollection::from_tensors([Tensor::from_vec("b", vec![1.0])]).unwrap()));

        let grid = run_pipeline(conv, &mixed()).unwrap();
        // abs(conv.weight) = [1, 2] row-major in 2x2, then transposed
        assert_eq!(grid.to_rows(), vec![vec![1.0, 0.0], vec![2.0, 0.0]]);
    }

    #[test]
    fn test_missing_layout_is_rejected() {
        let err = PluginManifest::from_yaml_str("plugins:\n  - name: broken\n").unwrap_err();
        assert!(err.to_string().contains("layout"));
    }

    #[test]
    fn test_unknown_step_is_rejected() {
        let yaml = "plugins:\n  - name: x\n    layout: row_major\n    preprocess:\n      - op: blur\n";
        assert!(PluginManifest::from_yaml_str(yaml).is_err());
    }

    #[test]
    fn test_duplicate_names_are_rejected() {
        let yaml = "plugins:\n  - name: x\n    layout: spiral\n  - name: x\n    layout: reversed\n";
        let err = PluginManifest::from_yaml_str(yaml).unwrap_err();
        assert!(err.to_string().contains("defined twice"));
    }

    #[test]
    fn test_invalid_clip_is_rejected() {
        let yaml = "plugins:\n  - name: x\n    layout: spiral\n    preprocess:\n      - op: clip\n        min: 1.0\n        max: -1.0\n";
        assert!(PluginManifest::from_yaml_str(yaml).is_err());
    }

    #[test]
    fn test_border_requires_layer_separated() {
        let yaml = "plugins:\n  - name: x\n    layout: spiral\n    border: 2\n";
        assert!(PluginManifest::from_yaml_str(yaml).is_err());
    }

    #[test]
    fn test_layer_separated_options() {
        let yaml = "plugins:\n  - name: boxed\n    layout: layer_separated\n    border: 2\n    sentinel: -9.0\n";
        let plugins = PluginManifest::from_yaml_str(yaml).unwrap().into_plugins();
        let tensors = TensorCollection::from_tensors([
            Tensor::from_vec("a", vec![1.0]),
            Tensor::from_vec("b", vec![2.0]),
        ])
        .unwrap();
        let grid = run_pipeline(&plugins[0], &tensors).unwrap();
        assert_eq!(grid.as_slice(), &[1.0, -9.0, -9.0, 2.0]);
    }

    #[test]
    fn test_normalize_postprocess_keeps_nan_borders() {
        let yaml = "plugins:\n  - name: boxed\n    layout: layer_separated\n    postprocess:\n      - op: normalize\n";
        let plugins = PluginManifest::from_yaml_str(yaml).unwrap().into_plugins();
        let tensors = TensorCollection::from_tensors([
            Tensor::from_vec("a", vec![2.0]),
            Tensor::from_vec("b", vec![4.0]),
        ])
        .unwrap();
        let grid = run_pipeline(&plugins[0], &tensors).unwrap();
        assert_eq!(grid.get(0, 0), Some(0.0));
        assert!(grid.get(0, 1).unwrap().is_nan());
        assert_eq!(grid.get(0, 2), Some(1.0));
    }
}
