//! Text and JSON renderings of engine results.
//!
//! Every report type implements [`fmt::Display`] as a fixed-width terminal
//! table and [`ReportDocument`] for machine-readable persistence.

use std::fmt;
use std::path::Path;

use serde::Serialize;

use crate::dead_neurons::DeadNeuronReport;
use crate::error::Result;
use crate::gradient_health::{GradientHealthReport, GradientStatus};
use crate::grid::Grid;
use crate::stats::{Histogram, StatsComparison};

const RULE_WIDTH: usize = 80;

/// JSON persistence for report types.
pub trait ReportDocument: Serialize {
    /// Compact JSON.
    ///
    /// # Errors
    ///
    /// Returns [`GridError::Json`](crate::GridError::Json) if serialization fails.
    fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Indented JSON.
    ///
    /// # Errors
    ///
    /// Returns [`GridError::Json`](crate::GridError::Json) if serialization fails.
    fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Write indented JSON to `path`, creating parent directories.
    ///
    /// # Errors
    ///
    /// Returns an IO or JSON error.
    fn save_json<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, self.to_json_pretty()?)?;
        tracing::info!("Saved report: {:?}", path);
        Ok(())
    }
}

impl ReportDocument for StatsComparison {}
impl ReportDocument for DeadNeuronReport {}
impl ReportDocument for GradientHealthReport {}
impl ReportDocument for Histogram {}
impl ReportDocument for Grid {}

fn rule(f: &mut fmt::Formatter<'_>, ch: char) -> fmt::Result {
    writeln!(f, "{}", ch.to_string().repeat(RULE_WIDTH))
}

/// Shorten long layer names so columns stay aligned.
fn clip_name(name: &str, width: usize) -> String {
    let len = name.chars().count();
    if len <= width {
        name.to_string()
    } else {
        let tail: String = name.chars().skip(len - width.saturating_sub(3)).collect();
        format!("...{tail}")
    }
}

impl fmt::Display for StatsComparison {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        rule(f, '=')?;
        writeln!(f, "Layer Statistics Comparison")?;
        rule(f, '=')?;
        writeln!(
            f,
            "{:<30} {:>10} {:>10} {:>10} {:>10} {:>7}",
            "Layer Name", "Mean", "Std", "Min", "Max", "~Zero%"
        )?;
        rule(f, '-')?;
        for r in &self.records {
            writeln!(
                f,
                "{:<30} {:>10.4} {:>10.4} {:>10.4} {:>10.4} {:>6.2}%",
                clip_name(&r.layer_name, 30),
                r.mean,
                r.std,
                r.min,
                r.max,
                r.near_zero_fraction * 100.0
            )?;
        }
        rule(f, '=')?;
        for s in &self.skipped {
            writeln!(f, "skipped {}: {}", s.layer_name, s.reason)?;
        }
        Ok(())
    }
}

impl fmt::Display for DeadNeuronReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        rule(f, '=')?;
        writeln!(f, "Dead Neuron Detection Report")?;
        rule(f, '=')?;
        writeln!(f, "Threshold: {:e}", self.threshold)?;
        writeln!(f, "Total neurons/channels: {}", self.total_units)?;
        writeln!(
            f,
            "Dead neurons/channels: {} ({:.2}%)",
            self.total_dead,
            self.dead_percentage()
        )?;
        writeln!(
            f,
            "Layers affected: {}/{}",
            self.affected_layer_count,
            self.per_layer.len()
        )?;
        rule(f, '=')?;

        if !self.per_layer.is_empty() {
            writeln!(f, "{:<40} {:>8} {:>8} {:>8}", "Layer", "Total", "Dead", "%")?;
            rule(f, '-')?;
            for layer in &self.per_layer {
                let marker = if layer.dead_units > 0 { " !" } else { "" };
                writeln!(
                    f,
                    "{:<40} {:>8} {:>8} {:>7.2}%{marker}",
                    clip_name(&layer.layer_name, 40),
                    layer.total_units,
                    layer.dead_units,
                    layer.dead_percentage()
                )?;
            }
            rule(f, '-')?;
        }
        writeln!(f, "{}", self.severity().message())
    }
}

impl fmt::Display for GradientHealthReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        rule(f, '=')?;
        writeln!(f, "Gradient Health Report")?;
        rule(f, '=')?;
        writeln!(f, "Total layers: {}", self.total())?;
        for status in [
            GradientStatus::Healthy,
            GradientStatus::Vanishing,
            GradientStatus::Exploding,
        ] {
            writeln!(
                f,
                "{:<10} {} ({:.1}%)",
                format!("{status}:"),
                self.count(status),
                self.percentage(status)
            )?;
        }
        rule(f, '=')?;

        if !self.per_layer.is_empty() {
            writeln!(f, "{:<40} {:>12} {:>12} {:>12}", "Layer", "Mean", "Max", "Status")?;
            rule(f, '-')?;
            for layer in &self.per_layer {
                writeln!(
                    f,
                    "{:<40} {:>12.2e} {:>12.2e} {:>12}",
                    clip_name(&layer.layer_name, 40),
                    layer.mean_abs,
                    layer.max_abs,
                    layer.status.to_string()
                )?;
            }
            rule(f, '-')?;
        }

        if self.is_healthy() {
            writeln!(f, "All gradients are healthy.")?;
        }
        for hint in self.recommendations() {
            writeln!(f, "WARNING: {hint}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;
    use crate::dead_neurons::DeadNeuronDetector;
    use crate::gradient_health::GradientHealthAnalyzer;
    use crate::stats::StatsEngine;
    use crate::tensor::{Tensor, TensorCollection};

    fn tensors() -> TensorCollection {
        TensorCollection::from_tensors([
            Tensor::new("fc1.weight", vec![2, 2], vec![1.0, 2.0, 0.0, 0.0]).unwrap(),
            Tensor::from_vec("fc1.bias", vec![0.0, 0.0]),
        ])
        .unwrap()
    }

    #[test]
    fn test_clip_name() {
        assert_eq!(clip_name("short", 10), "short");
        assert_eq!(clip_name("encoder.layers.11.weight", 12), "...11.weight");
    }

    #[test]
    fn test_stats_table() {
        let text = StatsEngine::default().compare(&tensors()).to_string();
        assert!(text.contains("Layer Statistics Comparison"));
        assert!(text.contains("fc1.weight"));
        assert!(text.contains("100.00%"));
    }

    #[test]
    fn test_dead_neuron_table() {
        let text = DeadNeuronDetector::default().detect(&tensors()).to_string();
        assert!(text.contains("Dead neurons/channels: 2 (66.67%)"));
        assert!(text.contains("Layers affected: 2/2"));
        assert!(text.contains("Over 50% of neurons are dead"));
    }

    #[test]
    fn test_gradient_table() {
        let grads = TensorCollection::from_tensors([Tensor::from_vec("g", vec![1e5])]).unwrap();
        let text = GradientHealthAnalyzer::default().analyze(&grads).to_string();
        assert!(text.contains("exploding"));
        assert!(text.contains("WARNING: 1 layer(s) with exploding gradients"));
    }

    #[test]
    fn test_json_document() {
        let report = DeadNeuronDetector::default().detect(&tensors());
        let value: serde_json::Value = serde_json::from_str(&report.to_json().unwrap()).unwrap();
        assert_eq!(value["total_dead"], 2);
        assert_eq!(value["per_layer"][0]["layer_name"], "fc1.weight");
        assert_eq!(value["per_layer"][0]["dead_indices"][0], 1);
    }

    #[test]
    fn test_save_json_creates_directories() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("reports/nested/gradients.json");
        let grads = TensorCollection::from_tensors([Tensor::from_vec("g", vec![0.5])]).unwrap();
        GradientHealthAnalyzer::default().analyze(&grads).save_json(&path).unwrap();

        let back: GradientHealthReport =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(back.healthy, 1);
    }
}
