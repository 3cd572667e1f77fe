//! Dead neuron detection.
//!
//! A unit (row of a weight matrix, output channel of a convolution kernel)
//! is dead when every one of its weights has magnitude below the threshold,
//! i.e. its maximum absolute weight is below the threshold. Such a unit
//! contributes nothing to the layer's output.
//!
//! Tensors with two or more dimensions use the leading dimension as the unit
//! axis. Scalars and vectors (usually biases) count as a single unit that is
//! dead only when all of their values are below the threshold.

use serde::{Deserialize, Serialize};

use crate::tensor::{Tensor, TensorCollection};

/// Default magnitude threshold.
pub const DEFAULT_DEAD_THRESHOLD: f64 = 1e-6;

/// Dead units found in one layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerDeadUnits {
    /// Layer name.
    pub layer_name: String,
    /// Number of output units checked.
    pub total_units: usize,
    /// Number of dead units.
    pub dead_units: usize,
    /// Indices of dead units along the leading dimension.
    pub dead_indices: Vec<usize>,
}

impl LayerDeadUnits {
    /// Percentage of this layer's units that are dead.
    #[must_use]
    pub fn dead_percentage(&self) -> f64 {
        percentage(self.dead_units, self.total_units)
    }
}

/// How worrying the overall dead unit share is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeadNeuronSeverity {
    /// No dead units.
    None,
    /// Some dead units, at most 20%.
    Some,
    /// More than 20% dead.
    Significant,
    /// More than 50% dead.
    Critical,
}

impl DeadNeuronSeverity {
    /// Classify a dead percentage.
    #[must_use]
    pub fn from_percentage(dead_percentage: f64, total_dead: usize) -> Self {
        if dead_percentage > 50.0 {
            Self::Critical
        } else if dead_percentage > 20.0 {
            Self::Significant
        } else if total_dead > 0 {
            Self::Some
        } else {
            Self::None
        }
    }

    /// One-line summary for terminal output.
    #[must_use]
    pub const fn message(&self) -> &'static str {
        match self {
            Self::None => "No dead neurons detected. All neurons are active.",
            Self::Some => "Some dead neurons detected.",
            Self::Significant => "Significant number of dead neurons detected.",
            Self::Critical => "Over 50% of neurons are dead! Model may be undertrained.",
        }
    }
}

/// Result of [`DeadNeuronDetector::detect`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadNeuronReport {
    /// Magnitude threshold used.
    pub threshold: f64,
    /// Per-layer results in collection order.
    pub per_layer: Vec<LayerDeadUnits>,
    /// Dead units across all layers.
    pub total_dead: usize,
    /// Units checked across all layers.
    pub total_units: usize,
    /// Layers with at least one dead unit.
    pub affected_layer_count: usize,
}

impl DeadNeuronReport {
    /// Percentage of all units that are dead.
    #[must_use]
    pub fn dead_percentage(&self) -> f64 {
        percentage(self.total_dead, self.total_units)
    }

    /// Overall severity.
    #[must_use]
    pub fn severity(&self) -> DeadNeuronSeverity {
        DeadNeuronSeverity::from_percentage(self.dead_percentage(), self.total_dead)
    }

    /// Result for one layer.
    #[must_use]
    pub fn layer(&self, layer_name: &str) -> Option<&LayerDeadUnits> {
        self.per_layer.iter().find(|l| l.layer_name == layer_name)
    }
}

/// Finds output units whose weights are all near zero.
///
/// # Example
///
/// ```rust
/// use tensor_grid::{DeadNeuronDetector, Tensor, TensorCollection};
///
/// # fn main() -> tensor_grid::Result<()> {
/// let tensors = TensorCollection::from_tensors([Tensor::new(
///     "fc.weight",
///     vec![3, 2],
///     vec![0.5, -0.1, 0.0, 0.0, 1e-9, 0.2],
/// )?])?;
///
/// let report = DeadNeuronDetector::new(1e-6).detect(&tensors);
/// assert_eq!(report.total_units, 3);
/// assert_eq!(report.total_dead, 1);
/// assert_eq!(report.per_layer[0].dead_indices, vec![1]);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DeadNeuronDetector {
    threshold: f64,
}

impl Default for DeadNeuronDetector {
    fn default() -> Self {
        Self::new(DEFAULT_DEAD_THRESHOLD)
    }
}

impl DeadNeuronDetector {
    /// Create a detector with a magnitude threshold.
    #[must_use]
    pub fn new(threshold: f64) -> Self {
        Self { threshold }
    }

    /// The magnitude threshold.
    #[must_use]
    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Check every layer of a collection. Zero-size tensors are skipped.
    #[must_use]
    pub fn detect(&self, tensors: &TensorCollection) -> DeadNeuronReport {
        let mut report = DeadNeuronReport {
            threshold: self.threshold,
            per_layer: Vec::new(),
            total_dead: 0,
            total_units: 0,
            affected_layer_count: 0,
        };

        for tensor in tensors {
            let Some(layer) = self.detect_layer(tensor) else {
                tracing::debug!("Skipping zero-size layer '{}'", tensor.name());
                continue;
            };
            report.total_units += layer.total_units;
            report.total_dead += layer.dead_units;
            if layer.dead_units > 0 {
                report.affected_layer_count += 1;
            }
            report.per_layer.push(layer);
        }

        tracing::debug!(
            "Dead neuron scan: {}/{} units dead at threshold {:e}",
            report.total_dead,
            report.total_units,
            self.threshold
        );
        report
    }

    /// Check a single layer, or `None` for a zero-size tensor.
    #[must_use]
    pub fn detect_layer(&self, tensor: &Tensor) -> Option<LayerDeadUnits> {
        if tensor.is_empty() {
            return None;
        }
        let dead_indices: Vec<usize> = tensor
            .units()
            .enumerate()
            .filter(|(_, unit)| self.is_dead(unit))
            .map(|(idx, _)| idx)
            .collect();
        Some(LayerDeadUnits {
            layer_name: tensor.name().to_string(),
            total_units: tensor.units().count(),
            dead_units: dead_indices.len(),
            dead_indices,
        })
    }

    fn is_dead(&self, unit: &[f64]) -> bool {
        unit.iter().all(|v| v.abs() < self.threshold)
    }
}

fn percentage(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64 * 100.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn model() -> TensorCollection {
        TensorCollection::from_tensors([
            Tensor::new(
                "conv.weight",
                vec![2, 1, 2, 2],
                vec![0.0, 0.0, 0.0, 0.0, 0.3, 0.0, 0.0, 0.0],
            )
            .unwrap(),
            Tensor::from_vec("conv.bias", vec![0.0, 0.0]),
            Tensor::new("fc.weight", vec![2, 3], vec![1e-3, 1e-4, 0.0, 2.0, 1.0, 0.5]).unwrap(),
        ])
        .unwrap()
    }

    #[test]
    fn test_conv_channels_are_units() {
        let report = DeadNeuronDetector::new(1e-6).detect(&model());
        let conv = report.layer("conv.weight").unwrap();
        assert_eq!(conv.total_units, 2);
        assert_eq!(conv.dead_indices, vec![0]);
    }

    #[test]
    fn test_bias_is_single_unit() {
        let report = DeadNeuronDetector::new(1e-6).detect(&model());
        let bias = report.layer("conv.bias").unwrap();
        assert_eq!(bias.total_units, 1);
        assert_eq!(bias.dead_units, 1);
    }

    #[test]
    fn test_totals() {
        let report = DeadNeuronDetector::new(1e-6).detect(&model());
        assert_eq!(report.total_units, 5);
        assert_eq!(report.total_dead, 2);
        assert_eq!(report.affected_layer_count, 2);
        assert!((report.dead_percentage() - 40.0).abs() < 1e-9);
        assert_eq!(report.severity(), DeadNeuronSeverity::Significant);
    }

    #[test]
    fn test_higher_threshold_finds_more() {
        let report = DeadNeuronDetector::new(1e-2).detect(&model());
        assert_eq!(report.layer("fc.weight").unwrap().dead_indices, vec![0]);
        assert_eq!(report.total_dead, 3);
        assert_eq!(report.severity(), DeadNeuronSeverity::Critical);
    }

    #[test]
    fn test_monotonic_in_threshold() {
        let tensors = model();
        let thresholds = [0.0, 1e-9, 1e-6, 1e-4, 1e-3, 2e-3, 0.5, 1.0, 10.0];
        let dead: Vec<usize> = thresholds
            .iter()
            .map(|&t| DeadNeuronDetector::new(t).detect(&tensors).total_dead)
            .collect();
        assert!(dead.windows(2).all(|w| w[0] <= w[1]), "{dead:?}");
    }

    #[test]
    fn test_zero_size_layers_skipped() {
        let tensors = TensorCollection::from_tensors([Tensor::new("e", vec![0, 4], vec![]).unwrap()]).unwrap();
        let report = DeadNeuronDetector::default().detect(&tensors);
        assert!(report.per_layer.is_empty());
        assert_eq!(report.severity(), DeadNeuronSeverity::None);
        assert_eq!(report.dead_percentage(), 0.0);
    }
}
