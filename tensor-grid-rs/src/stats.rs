//! Per-layer descriptive statistics.
//!
//! [`StatsEngine::compute`] summarizes one tensor; [`StatsEngine::compare`]
//! summarizes a whole collection for the layer comparison table, skipping
//! (and reporting) layers that cannot be summarized.

use serde::{Deserialize, Serialize};

use crate::error::{GridError, Result};
use crate::tensor::{Tensor, TensorCollection};

/// Default threshold below which a value counts as near zero.
pub const DEFAULT_EPSILON: f64 = 1e-6;

/// Summary statistics for one tensor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatsRecord {
    /// Layer name.
    pub layer_name: String,
    /// Tensor shape.
    pub shape: Vec<usize>,
    /// Number of elements.
    pub count: usize,
    /// Arithmetic mean.
    pub mean: f64,
    /// Population standard deviation.
    pub std: f64,
    /// Smallest value.
    pub min: f64,
    /// Largest value.
    pub max: f64,
    /// Fraction of values with `|v| < epsilon`.
    pub near_zero_fraction: f64,
}

/// A layer left out of a batch operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedLayer {
    /// Layer name.
    pub layer_name: String,
    /// Why it was skipped.
    pub reason: String,
}

/// Statistics for a whole collection, in collection order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatsComparison {
    /// Epsilon used for the near-zero fraction.
    pub epsilon: f64,
    /// One record per summarized layer.
    pub records: Vec<StatsRecord>,
    /// Layers that could not be summarized.
    pub skipped: Vec<SkippedLayer>,
}

impl StatsComparison {
    /// Record for a layer, if it was summarized.
    #[must_use]
    pub fn get(&self, layer_name: &str) -> Option<&StatsRecord> {
        self.records.iter().find(|r| r.layer_name == layer_name)
    }
}

/// Equal-width histogram of a tensor's values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Histogram {
    /// Layer name.
    pub layer_name: String,
    /// Left edge of the first bin.
    pub min: f64,
    /// Right edge of the last bin.
    pub max: f64,
    /// Width of every bin.
    pub bin_width: f64,
    /// Number of values per bin.
    pub counts: Vec<usize>,
}

impl Histogram {
    /// Left edges of every bin.
    #[must_use]
    pub fn edges(&self) -> Vec<f64> {
        (0..self.counts.len())
            .map(|i| self.min + i as f64 * self.bin_width)
            .collect()
    }

    /// Total values counted.
    #[must_use]
    pub fn total(&self) -> usize {
        self.counts.iter().sum()
    }
}

/// Computes [`StatsRecord`]s with a configured near-zero epsilon.
///
/// # Example
///
/// ```rust
/// use tensor_grid::{StatsEngine, Tensor};
///
/// # fn main() -> tensor_grid::Result<()> {
/// let stats = StatsEngine::default().compute(&Tensor::from_vec("b", vec![0.0, 0.0, 2.0, 2.0]))?;
/// assert_eq!(stats.mean, 1.0);
/// assert_eq!(stats.std, 1.0);
/// assert_eq!(stats.near_zero_fraction, 0.5);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StatsEngine {
    epsilon: f64,
}

impl Default for StatsEngine {
    fn default() -> Self {
        Self {
            epsilon: DEFAULT_EPSILON,
        }
    }
}

impl StatsEngine {
    /// Create an engine with a near-zero epsilon.
    #[must_use]
    pub fn new(epsilon: f64) -> Self {
        Self { epsilon }
    }

    /// The near-zero epsilon.
    #[must_use]
    pub fn epsilon(&self) -> f64 {
        self.epsilon
    }

    /// Summarize one tensor.
    ///
    /// # Errors
    ///
    /// Returns [`GridError::EmptyTensor`] if the tensor has no values.
    pub fn compute(&self, tensor: &Tensor) -> Result<StatsRecord> {
        let values = tensor.values();
        if values.is_empty() {
            return Err(GridError::EmptyTensor(tensor.name().to_string()));
        }

        let count = values.len();
        let n = count as f64;
        let mut min = f64::INFINITY;
        let mut max = f64::NEG_INFINITY;
        let mut sum = 0.0_f64;
        let mut near_zero = 0_usize;
        for &v in values {
            min = min.min(v);
            max = max.max(v);
            sum += v;
            if v.abs() < self.epsilon {
                near_zero += 1;
            }
        }
        let mean = sum / n;
        let variance = values.iter().map(|&v| (v - mean).powi(2)).sum::<f64>() / n;

        Ok(StatsRecord {
            layer_name: tensor.name().to_string(),
            shape: tensor.shape().to_vec(),
            count,
            mean,
            std: variance.sqrt(),
            min,
            max,
            near_zero_fraction: near_zero as f64 / n,
        })
    }

    /// Summarize every tensor of a collection, in order.
    ///
    /// Layers that fail are skipped with a warning and listed in
    /// [`StatsComparison::skipped`].
    #[must_use]
    pub fn compare(&self, tensors: &TensorCollection) -> StatsComparison {
        let mut comparison = StatsComparison {
            epsilon: self.epsilon,
            ..StatsComparison::default()
        };
        for tensor in tensors {
            match self.compute(tensor) {
                Ok(record) => comparison.records.push(record),
                Err(e) => {
                    tracing::warn!("Skipping layer '{}' in statistics: {}", tensor.name(), e);
                    comparison.skipped.push(SkippedLayer {
                        layer_name: tensor.name().to_string(),
                        reason: e.to_string(),
                    });
                }
            }
        }
        comparison
    }

    /// Bin a tensor's finite values into `bins` equal-width bins over `[min, max]`.
    ///
    /// # Errors
    ///
    /// Returns [`GridError::Config`] if `bins` is zero and
    /// [`GridError::EmptyTensor`] if there are no finite values.
    pub fn histogram(&self, tensor: &Tensor, bins: usize) -> Result<Histogram> {
        if bins == 0 {
            return Err(GridError::Config("histogram needs at least one bin".into()));
        }
        let finite: Vec<f64> = tensor.values().iter().copied().filter(|v| v.is_finite()).collect();
        if finite.is_empty() {
            return Err(GridError::EmptyTensor(tensor.name().to_string()));
        }

        let min = finite.iter().copied().fold(f64::INFINITY, f64::min);
        let max = finite.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let bin_width = if max > min { (max - min) / bins as f64 } else { 1.0 };

        let mut counts = vec![0; bins];
        for v in finite {
            let idx = (((v - min) / bin_width) as usize).min(bins - 1);
            counts[idx] += 1;
        }
        Ok(Histogram {
            layer_name: tensor.name().to_string(),
            min,
            max,
            bin_width,
            counts,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-12
    }

    #[test]
    fn test_compute_basic() {
        let tensor = Tensor::new("w", vec![2, 2], vec![1.0, 2.0, 3.0, 4.0]).unwrap();
        let stats = StatsEngine::default().compute(&tensor).unwrap();
        assert_eq!(stats.count, 4);
        assert!(close(stats.mean, 2.5));
        assert!(close(stats.std, 1.25_f64.sqrt()));
        assert_eq!(stats.min, 1.0);
        assert_eq!(stats.max, 4.0);
        assert_eq!(stats.near_zero_fraction, 0.0);
        assert_eq!(stats.shape, vec![2, 2]);
    }

    #[test]
    fn test_all_zero_tensor() {
        let stats = StatsEngine::default()
            .compute(&Tensor::from_vec("b", vec![0.0; 4]))
            .unwrap();
        assert_eq!(stats.mean, 0.0);
        assert_eq!(stats.std, 0.0);
        assert_eq!(stats.near_zero_fraction, 1.0);
    }

    #[test]
    fn test_epsilon_is_strict_and_configurable() {
        let tensor = Tensor::from_vec("t", vec![1e-6, 5e-7, 1e-3, -2e-7]);
        let default = StatsEngine::default().compute(&tensor).unwrap();
        assert_eq!(default.near_zero_fraction, 0.5);

        let loose = StatsEngine::new(1e-2).compute(&tensor).unwrap();
        assert_eq!(loose.near_zero_fraction, 1.0);
    }

    #[test]
    fn test_empty_tensor_errors() {
        let tensor = Tensor::new("e", vec![0], vec![]).unwrap();
        let err = StatsEngine::default().compute(&tensor).unwrap_err();
        assert!(matches!(err, GridError::EmptyTensor(name) if name == "e"));
    }

    #[test]
    fn test_compare_keeps_order_and_skips_empty() {
        let tensors = TensorCollection::from_tensors([
            Tensor::from_vec("z", vec![1.0]),
            Tensor::new("empty", vec![0, 3], vec![]).unwrap(),
            Tensor::from_vec("a", vec![2.0, 4.0]),
        ])
        .unwrap();
        let comparison = StatsEngine::default().compare(&tensors);
        let names: Vec<&str> = comparison.records.iter().map(|r| r.layer_name.as_str()).collect();
        assert_eq!(names, vec!["z", "a"]);
        assert_eq!(comparison.skipped.len(), 1);
        assert_eq!(comparison.skipped[0].layer_name, "empty");
        assert_eq!(comparison.get("a").unwrap().mean, 3.0);
    }

    #[test]
    fn test_histogram_bins() {
        let tensor = Tensor::from_vec("h", vec![0.0, 0.1, 0.5, 0.9, 1.0, f64::NAN]);
        let hist = StatsEngine::default().histogram(&tensor, 2).unwrap();
        assert_eq!(hist.counts, vec![2, 3]);
        assert_eq!(hist.total(), 5);
        assert_eq!(hist.edges(), vec![0.0, 0.5]);
    }

    #[test]
    fn test_histogram_constant_values() {
        let tensor = Tensor::from_vec("c", vec![3.0; 4]);
        let hist = StatsEngine::default().histogram(&tensor, 10).unwrap();
        assert_eq!(hist.counts[0], 4);
        assert_eq!(hist.total(), 4);
    }

    #[test]
    fn test_histogram_zero_bins() {
        let tensor = Tensor::from_vec("c", vec![1.0]);
        assert!(StatsEngine::default().histogram(&tensor, 0).is_err());
    }
}
