//! CLI entry point for tensor-grid-rs.

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tensor_grid::{
    EngineConfig, Histogram, LayerSelection, PluginRegistry, ReportDocument, Result,
    TensorCollection,
};

#[derive(Parser)]
#[command(name = "tensor-grid")]
#[command(about = "Lay model tensors out as 2D grids and diagnose them")]
#[command(version)]
struct Cli {
    /// Engine configuration file (YAML)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List registered transformer plugins
    Plugins {
        /// Extra directory of plugin manifests
        #[arg(long)]
        plugin_dir: Option<PathBuf>,
    },
    /// Lay tensors out as a grid
    Transform {
        /// Tensor document (JSON)
        input: PathBuf,
        /// Plugin name (defaults to the configured default plugin)
        #[arg(long)]
        plugin: Option<String>,
        /// Write grid JSON here instead of stdout
        #[arg(long)]
        output: Option<PathBuf>,
        /// Plugin manifest to load before transforming
        #[arg(long)]
        plugin_file: Option<PathBuf>,
        /// Only these layers: positions like "1,3-5" or globs like "conv*"
        #[arg(long)]
        layers: Option<String>,
    },
    /// Per-layer statistics
    Stats {
        /// Tensor document (JSON)
        input: PathBuf,
        /// Near-zero epsilon
        #[arg(long)]
        epsilon: Option<f64>,
        /// Also compute value histograms
        #[arg(long)]
        histogram: bool,
        /// Only these layers: positions like "1,3-5" or globs like "conv*"
        #[arg(long)]
        layers: Option<String>,
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// Find dead output units
    DeadNeurons {
        /// Tensor document (JSON)
        input: PathBuf,
        /// Magnitude threshold
        #[arg(long)]
        threshold: Option<f64>,
        /// Only these layers: positions like "1,3-5" or globs like "conv*"
        #[arg(long)]
        layers: Option<String>,
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
        /// Save the JSON report here
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Classify gradient health
    Gradients {
        /// Gradient document (JSON)
        input: PathBuf,
        /// Vanishing threshold on mean |g|
        #[arg(long)]
        vanish: Option<f64>,
        /// Exploding threshold on max |g|
        #[arg(long)]
        explode: Option<f64>,
        /// Only these layers: positions like "1,3-5" or globs like "conv*"
        #[arg(long)]
        layers: Option<String>,
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
        /// Save the JSON report here
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Write a default configuration file
    InitConfig {
        /// Output path for config file
        #[arg(default_value = "tensor-grid.yaml")]
        output: PathBuf,
    },
}

fn main() -> Result<()> {
    // Logs go to stderr so JSON on stdout stays parseable
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Plugins { plugin_dir } => {
            let mut registry = PluginRegistry::from_config(&config)?;
            if let Some(dir) = plugin_dir {
                let outcome = registry.load_from_directory(&dir)?;
                for (file, err) in &outcome.failed {
                    eprintln!("✗ {}: {err}", file.display());
                }
            }
            println!("Available plugins ({}):", registry.len());
            for name in registry.list() {
                println!("  {name:<20} {}", registry.describe(name)?);
            }
        }
        Commands::Transform {
            input,
            plugin,
            output,
            plugin_file,
            layers,
        } => {
            let mut registry = PluginRegistry::from_config(&config)?;
            if let Some(file) = plugin_file {
                registry.load_from_external_source(&file)?;
            }
            let name = plugin.unwrap_or_else(|| config.default_plugin.clone());
            let tensors = read_tensors(&input, layers.as_deref())?;
            tracing::info!("Transforming {} layer(s) with '{}'", tensors.len(), name);

            let grid = registry.transform(&name, &tensors)?;
            match output {
                Some(path) => {
                    grid.save_json(&path)?;
                    println!(
                        "✓ {}x{} grid written to: {}",
                        grid.rows(),
                        grid.cols(),
                        path.display()
                    );
                }
                None => println!("{}", grid.to_json_pretty()?),
            }
        }
        Commands::Stats {
            input,
            epsilon,
            histogram,
            layers,
            json,
        } => {
            let config = config
                .clone()
                .with_near_zero_epsilon(epsilon.unwrap_or(config.near_zero_epsilon));
            config.validate()?;
            let engine = config.stats_engine();
            let tensors = read_tensors(&input, layers.as_deref())?;
            let comparison = engine.compare(&tensors);
            let histograms: Vec<Histogram> = if histogram {
                tensors
                    .iter()
                    .filter_map(|t| engine.histogram(t, config.histogram_bins).ok())
                    .collect()
            } else {
                Vec::new()
            };

            if json {
                let doc = serde_json::json!({
                    "stats": comparison,
                    "histograms": histograms,
                });
                println!("{}", serde_json::to_string_pretty(&doc)?);
            } else {
                print!("{comparison}");
                for hist in &histograms {
                    println!("{}: {:?}", hist.layer_name, hist.counts);
                }
            }
        }
        Commands::DeadNeurons {
            input,
            threshold,
            layers,
            json,
            output,
        } => {
            let config = config
                .clone()
                .with_dead_neuron_threshold(threshold.unwrap_or(config.dead_neuron_threshold));
            config.validate()?;
            let report = config
                .dead_detector()
                .detect(&read_tensors(&input, layers.as_deref())?);
            emit(&report, json, output.as_deref())?;
        }
        Commands::Gradients {
            input,
            vanish,
            explode,
            layers,
            json,
            output,
        } => {
            let config = config.clone().with_gradient_thresholds(
                vanish.unwrap_or(config.gradient_vanishing_threshold),
                explode.unwrap_or(config.gradient_exploding_threshold),
            );
            config.validate()?;
            let report = config
                .gradient_analyzer()
                .analyze(&read_tensors(&input, layers.as_deref())?);
            emit(&report, json, output.as_deref())?;
        }
        Commands::InitConfig { output } => {
            EngineConfig::default().to_file(&output)?;
            println!("✓ Configuration written to: {}", output.display());
        }
    }

    Ok(())
}

fn load_config(path: Option<&Path>) -> Result<EngineConfig> {
    let config = match path {
        Some(path) => {
            tracing::info!("Loading configuration: {:?}", path);
            EngineConfig::from_file(path)?
        }
        None => EngineConfig::default(),
    }
    .with_env_overrides();
    config.validate()?;
    Ok(config)
}

fn read_tensors(path: &Path, layers: Option<&str>) -> Result<TensorCollection> {
    let tensors = TensorCollection::from_json_file(path)?;
    match layers {
        Some(selection) => LayerSelection::parse(selection)?.apply(&tensors),
        None => Ok(tensors),
    }
}

fn emit<R>(report: &R, json: bool, output: Option<&Path>) -> Result<()>
where
    R: ReportDocument + std::fmt::Display,
{
    if json {
        println!("{}", report.to_json_pretty()?);
    } else {
        print!("{report}");
    }
    if let Some(path) = output {
        report.save_json(path)?;
        eprintln!("✓ Report saved to: {}", path.display());
    }
    Ok(())
}
