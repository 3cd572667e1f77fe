//! # tensor-grid-rs
//!
//! Lay trained model parameters out as 2D grids and diagnose them.
//!
//! The crate turns a [`TensorCollection`] (named, shaped arrays of weights or
//! gradients) into a [`Grid`] through pluggable layout algorithms, and
//! computes per-layer diagnostics: descriptive statistics, dead units and
//! gradient health.
//!
//! ## Features
//!
//! - **Plugin layouts** - flatten, spiral, normalized, layer-weighted,
//!   layer-separated and conv-kernel grids, plus declarative YAML/JSON
//!   plugin manifests
//! - **Layer selection** - pick layers by position (`1,3-5`) or glob (`conv*`)
//! - **Statistics** - mean, std, range, near-zero share and histograms per layer
//! - **Dead neurons** - output units whose weights are all near zero
//! - **Gradient health** - vanishing and exploding gradient classification
//! - **Reports** - terminal tables and JSON documents
//!
//! ## Quick Start (CLI)
//!
//! ```bash
//! # List available layouts
//! tensor-grid plugins
//!
//! # Lay a model out as a spiral grid
//! tensor-grid transform model.json --plugin spiral --output grid.json
//!
//! # Only the convolution layers
//! tensor-grid transform model.json --plugin conv_kernels --layers 'conv*'
//!
//! # Diagnose weights and gradients
//! tensor-grid dead-neurons model.json --threshold 1e-5
//! tensor-grid gradients grads.json --json
//! ```
//!
//! ## Quick Start (Library)
//!
//! ```rust
//! use tensor_grid::{PluginRegistry, StatsEngine, Tensor, TensorCollection};
//!
//! # fn main() -> tensor_grid::Result<()> {
//! let tensors = TensorCollection::from_tensors([
//!     Tensor::new("A", vec![2, 2], vec![1.0, 2.0, 3.0, 4.0])?,
//!     Tensor::from_vec("B", vec![0.0; 4]),
//! ])?;
//!
//! let grid = PluginRegistry::new().transform("flatten", &tensors)?;
//! assert_eq!(grid.dims(), (3, 3));
//!
//! let stats = StatsEngine::default().compute(tensors.get("B").unwrap())?;
//! assert_eq!(stats.near_zero_fraction, 1.0);
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//!
//! - [`tensor`]: Tensors and ordered tensor collections
//! - [`grid`]: The 2D grid produced by layouts
//! - [`plugin`]: Plugin contract, built-in layouts, manifests and registry
//! - [`stats`], [`dead_neurons`], [`gradient_health`]: Diagnostics
//! - [`selection`]: Layer selection by position or name pattern
//! - [`report`]: Text and JSON rendering
//! - [`config`]: Engine configuration
//! - [`error`]: Error types and result alias

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::cast_precision_loss)]

pub mod config;
pub mod dead_neurons;
pub mod error;
pub mod gradient_health;
pub mod grid;
pub mod plugin;
pub mod report;
pub mod selection;
pub mod stats;
pub mod tensor;

pub use config::EngineConfig;
pub use dead_neurons::{DeadNeuronDetector, DeadNeuronReport, DeadNeuronSeverity, LayerDeadUnits};
pub use error::{GridError, Result, Stage};
pub use gradient_health::{
    GradientHealthAnalyzer, GradientHealthReport, GradientStatus, LayerGradientHealth,
};
pub use grid::{Grid, GridRegion};
pub use plugin::{PluginRegistry, TransformerPlugin};
pub use report::ReportDocument;
pub use selection::LayerSelection;
pub use stats::{Histogram, StatsComparison, StatsEngine, StatsRecord};
pub use tensor::{Tensor, TensorCollection};
