//! Transformer plugins: the algorithms that lay a tensor collection into a grid.
//!
//! A plugin implements [`TransformerPlugin`]. Only [`name`] and [`transform`]
//! are required; the other members have identity or permissive defaults and
//! can be overridden to filter layers, reshape values, or decorate the grid.
//!
//! Always invoke plugins through [`run_pipeline`] (or
//! [`PluginRegistry::transform`]), which runs preprocess → transform →
//! postprocess and tags any failure with the plugin name and stage.
//!
//! # Example
//!
//! ```rust
//! use tensor_grid::plugin::{run_pipeline, TransformerPlugin};
//! use tensor_grid::{Grid, Result, Tensor, TensorCollection};
//!
//! struct Diagonal;
//!
//! impl TransformerPlugin for Diagonal {
//!     fn name(&self) -> &str {
//!         "diagonal"
//!     }
//!
//!     fn transform(&self, tensors: &TensorCollection) -> Result<Grid> {
//!         let values = tensors.concat_values();
//!         let mut grid = Grid::zeros(values.len(), values.len());
//!         for (i, v) in values.into_iter().enumerate() {
//!             grid.set(i, i, v);
//!         }
//!         Ok(grid)
//!     }
//! }
//!
//! # fn main() -> Result<()> {
//! let tensors = TensorCollection::from_tensors([Tensor::from_vec("w", vec![1.0, 2.0])])?;
//! let grid = run_pipeline(&Diagonal, &tensors)?;
//! assert_eq!(grid.get(1, 1), Some(2.0));
//! # Ok(())
//! # }
//! ```
//!
//! [`name`]: TransformerPlugin::name
//! [`transform`]: TransformerPlugin::transform
//! [`PluginRegistry::transform`]: registry::PluginRegistry::transform

pub mod builtin;
pub mod manifest;
pub mod registry;

pub use builtin::{
    is_conv_kernel, spiral_order, ConvKernelsTransformer, FlattenTransformer,
    LayerSeparatedTransformer, LayerWeightedTransformer, NormalizedTransformer, SpiralTransformer,
};
pub use manifest::{LayoutKind, ManifestPlugin, PluginDefinition, PluginManifest, PostStep, PreStep};
pub use registry::PluginRegistry;

use crate::error::{Result, Stage};
use crate::grid::Grid;
use crate::tensor::TensorCollection;

/// Contract every layout algorithm implements.
pub trait TransformerPlugin: Send + Sync {
    /// Unique name the plugin is registered under.
    fn name(&self) -> &str;

    /// Human-readable description.
    fn description(&self) -> &str {
        "Custom transformer plugin"
    }

    /// Whether this plugin applies to the collection.
    ///
    /// Callers use this to skip incompatible plugins without raising.
    fn can_handle(&self, _tensors: &TensorCollection) -> bool {
        true
    }

    /// Filter or rewrite tensors before layout.
    ///
    /// # Errors
    ///
    /// Implementations may fail; the pipeline reports it as a preprocess failure.
    fn preprocess(&self, tensors: &TensorCollection) -> Result<TensorCollection> {
        Ok(tensors.clone())
    }

    /// Lay the tensors into a grid. Must be deterministic.
    ///
    /// # Errors
    ///
    /// Implementations may fail; the pipeline reports it as a transform failure.
    fn transform(&self, tensors: &TensorCollection) -> Result<Grid>;

    /// Rewrite the grid after layout.
    ///
    /// # Errors
    ///
    /// Implementations may fail; the pipeline reports it as a postprocess failure.
    fn postprocess(&self, grid: Grid) -> Result<Grid> {
        Ok(grid)
    }
}

/// Run a plugin's full pipeline: preprocess → transform → postprocess.
///
/// # Errors
///
/// Returns [`GridError::Transform`](crate::GridError::Transform) naming the
/// plugin and the failing stage.
pub fn run_pipeline(plugin: &dyn TransformerPlugin, tensors: &TensorCollection) -> Result<Grid> {
    let name = plugin.name();
    let prepared = plugin
        .preprocess(tensors)
        .map_err(|e| e.in_stage(name, Stage::Preprocess))?;
    let grid = plugin
        .transform(&prepared)
        .map_err(|e| e.in_stage(name, Stage::Transform))?;
    let grid = plugin
        .postprocess(grid)
        .map_err(|e| e.in_stage(name, Stage::Postprocess))?;
    tracing::debug!("Plugin '{}' produced a {}x{} grid", name, grid.rows(), grid.cols());
    Ok(grid)
}
