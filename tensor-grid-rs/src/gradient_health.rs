//! Gradient health classification.
//!
//! Each gradient tensor is summarized by its mean and maximum absolute value
//! and classified against two thresholds:
//!
//! - `exploding` when `max_abs > explode_threshold`,
//! - otherwise `vanishing` when `mean_abs < vanish_threshold`,
//! - otherwise `healthy`.
//!
//! A single huge element marks a layer as exploding even if its mean is tiny.
//! So does a single NaN: it propagates into `max_abs` and `mean_abs`, and a
//! non-finite summary is always classified as exploding.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::stats::SkippedLayer;
use crate::tensor::{Tensor, TensorCollection};

/// Default mean-absolute threshold for vanishing gradients.
pub const DEFAULT_VANISH_THRESHOLD: f64 = 1e-7;

/// Default max-absolute threshold for exploding gradients.
pub const DEFAULT_EXPLODE_THRESHOLD: f64 = 1e3;

/// Health of one layer's gradients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GradientStatus {
    /// Within both thresholds.
    Healthy,
    /// Mean magnitude below the vanish threshold.
    Vanishing,
    /// Max magnitude above the explode threshold.
    Exploding,
}

impl fmt::Display for GradientStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Healthy => "healthy",
            Self::Vanishing => "vanishing",
            Self::Exploding => "exploding",
        };
        f.write_str(label)
    }
}

/// Gradient summary for one layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerGradientHealth {
    /// Layer name.
    pub layer_name: String,
    /// Mean absolute gradient.
    pub mean_abs: f64,
    /// Maximum absolute gradient.
    pub max_abs: f64,
    /// Population standard deviation of the raw gradient.
    pub std: f64,
    /// Classification.
    pub status: GradientStatus,
}

/// Result of [`GradientHealthAnalyzer::analyze`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradientHealthReport {
    /// Mean-absolute threshold used.
    pub vanish_threshold: f64,
    /// Max-absolute threshold used.
    pub explode_threshold: f64,
    /// Per-layer results in collection order.
    pub per_layer: Vec<LayerGradientHealth>,
    /// Number of healthy layers.
    pub healthy: usize,
    /// Number of vanishing layers.
    pub vanishing: usize,
    /// Number of exploding layers.
    pub exploding: usize,
    /// Layers that could not be analyzed.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub skipped: Vec<SkippedLayer>,
}

impl GradientHealthReport {
    /// Number of analyzed layers.
    #[must_use]
    pub fn total(&self) -> usize {
        self.per_layer.len()
    }

    /// Layers with a given status.
    #[must_use]
    pub fn count(&self, status: GradientStatus) -> usize {
        match status {
            GradientStatus::Healthy => self.healthy,
            GradientStatus::Vanishing => self.vanishing,
            GradientStatus::Exploding => self.exploding,
        }
    }

    /// Percentage of analyzed layers with a given status (0 when empty).
    #[must_use]
    pub fn percentage(&self, status: GradientStatus) -> f64 {
        let total = self.total();
        if total == 0 {
            0.0
        } else {
            self.count(status) as f64 / total as f64 * 100.0
        }
    }

    /// Names of layers with a given status, in order.
    #[must_use]
    pub fn layers_with(&self, status: GradientStatus) -> Vec<&str> {
        self.per_layer
            .iter()
            .filter(|l| l.status == status)
            .map(|l| l.layer_name.as_str())
            .collect()
    }

    /// Whether every analyzed layer is healthy.
    #[must_use]
    pub fn is_healthy(&self) -> bool {
        self.vanishing == 0 && self.exploding == 0
    }

    /// Remediation hints for the problems found.
    #[must_use]
    pub fn recommendations(&self) -> Vec<String> {
        let mut hints = Vec::new();
        if self.vanishing > 0 {
            hints.push(format!(
                "{} layer(s) with vanishing gradients. Consider: gradient clipping, batch normalization, or residual connections",
                self.vanishing
            ));
        }
        if self.exploding > 0 {
            hints.push(format!(
                "{} layer(s) with exploding gradients. Consider: gradient clipping, lower learning rate, or weight initialization",
                self.exploding
            ));
        }
        hints
    }
}

/// Classifies gradient tensors as healthy, vanishing or exploding.
///
/// # Example
///
/// ```rust
/// use tensor_grid::{GradientHealthAnalyzer, GradientStatus, Tensor, TensorCollection};
///
/// # fn main() -> tensor_grid::Result<()> {
/// let grads = TensorCollection::from_tensors([
///     Tensor::from_vec("deep", vec![1e-8, 1e-7]),
///     Tensor::from_vec("spiky", vec![0.0, 100.0]),
///     Tensor::from_vec("fine", vec![0.01, -0.02]),
/// ])?;
///
/// let report = GradientHealthAnalyzer::new(1e-6, 10.0).analyze(&grads);
/// assert_eq!(report.per_layer[0].status, GradientStatus::Vanishing);
/// assert_eq!(report.per_layer[1].status, GradientStatus::Exploding);
/// assert_eq!(report.per_layer[2].status, GradientStatus::Healthy);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GradientHealthAnalyzer {
    vanish_threshold: f64,
    explode_threshold: f64,
}

impl Default for GradientHealthAnalyzer {
    fn default() -> Self {
        Self::new(DEFAULT_VANISH_THRESHOLD, DEFAULT_EXPLODE_THRESHOLD)
    }
}

impl GradientHealthAnalyzer {
    /// Create an analyzer with vanish and explode thresholds.
    #[must_use]
    pub fn new(vanish_threshold: f64, explode_threshold: f64) -> Self {
        Self {
            vanish_threshold,
            explode_threshold,
        }
    }

    /// Classify from summary magnitudes. NaN in either is exploding.
    #[must_use]
    pub fn classify(&self, mean_abs: f64, max_abs: f64) -> GradientStatus {
        if max_abs.is_nan() || mean_abs.is_nan() || max_abs > self.explode_threshold {
            GradientStatus::Exploding
        } else if mean_abs < self.vanish_threshold {
            GradientStatus::Vanishing
        } else {
            GradientStatus::Healthy
        }
    }

    /// Summarize and classify one gradient tensor, or `None` if it is empty.
    #[must_use]
    pub fn analyze_layer(&self, gradient: &Tensor) -> Option<LayerGradientHealth> {
        let values = gradient.values();
        if values.is_empty() {
            return None;
        }
        let n = values.len() as f64;
        let mean_abs = values.iter().map(|v| v.abs()).sum::<f64>() / n;
        // f64::max drops NaN, so carry it through explicitly
        let max_abs = values.iter().fold(0.0_f64, |acc, v| {
            if acc.is_nan() || v.is_nan() {
                f64::NAN
            } else {
                acc.max(v.abs())
            }
        });
        let mean = values.iter().sum::<f64>() / n;
        let std = (values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n).sqrt();

        Some(LayerGradientHealth {
            layer_name: gradient.name().to_string(),
            mean_abs,
            max_abs,
            std,
            status: self.classify(mean_abs, max_abs),
        })
    }

    /// Classify every gradient tensor of a collection, in order.
    ///
    /// Empty tensors are skipped with a warning and listed in
    /// [`GradientHealthReport::skipped`].
    #[must_use]
    pub fn analyze(&self, gradients: &TensorCollection) -> GradientHealthReport {
        let mut report = GradientHealthReport {
            vanish_threshold: self.vanish_threshold,
            explode_threshold: self.explode_threshold,
            per_layer: Vec::with_capacity(gradients.len()),
            healthy: 0,
            vanishing: 0,
            exploding: 0,
            skipped: Vec::new(),
        };

        for gradient in gradients {
            let Some(layer) = self.analyze_layer(gradient) else {
                tracing::warn!("Skipping empty gradient for layer '{}'", gradient.name());
                report.skipped.push(SkippedLayer {
                    layer_name: gradient.name().to_string(),
                    reason: "gradient tensor has no elements".into(),
                });
                continue;
            };
            match layer.status {
                GradientStatus::Healthy => report.healthy += 1,
                GradientStatus::Vanishing => report.vanishing += 1,
                GradientStatus::Exploding => report.exploding += 1,
            }
            report.per_layer.push(layer);
        }
        report
    }
}
