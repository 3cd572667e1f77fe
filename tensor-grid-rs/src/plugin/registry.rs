//! Plugin registry: resolves plugin names to transformer instances.
//!
//! A registry is an ordinary value. The CLI builds one per process and passes
//! it to whatever needs it; tests build their own with [`PluginRegistry::new`]
//! or [`PluginRegistry::empty`].
//!
//! # Example
//!
//! ```rust
//! use tensor_grid::{PluginRegistry, Tensor, TensorCollection};
//!
//! # fn main() -> tensor_grid::Result<()> {
//! let registry = PluginRegistry::new();
//! assert_eq!(
//!     registry.list(),
//!     vec![
//!         "flatten",
//!         "layer_weighted",
//!         "spiral",
//!         "normalized",
//!         "layer_separated",
//!         "conv_kernels"
//!     ]
//! );
//!
//! let tensors = TensorCollection::from_tensors([Tensor::from_vec("w", vec![1.0, 2.0, 3.0])])?;
//! let grid = registry.transform("spiral", &tensors)?;
//! assert_eq!(grid.dims(), (2, 2));
//! # Ok(())
//! # }
//! ```

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::EngineConfig;
use crate::error::{GridError, Result};
use crate::grid::Grid;
use crate::tensor::TensorCollection;

use super::builtin::{
    ConvKernelsTransformer, FlattenTransformer, LayerSeparatedTransformer, LayerWeightedTransformer,
    NormalizedTransformer, SpiralTransformer,
};
use super::manifest::PluginManifest;
use super::{run_pipeline, TransformerPlugin};

/// Shared handle to a registered plugin.
pub type PluginHandle = Arc<dyn TransformerPlugin>;

/// Outcome of loading a plugin directory.
#[derive(Debug, Default)]
pub struct DirectoryLoad {
    /// Names registered, in load order.
    pub registered: Vec<String>,
    /// Files that failed, with the error each produced.
    pub failed: Vec<(PathBuf, GridError)>,
}

/// Ordered set of named transformer plugins.
#[derive(Clone, Default)]
pub struct PluginRegistry {
    plugins: Vec<PluginHandle>,
}

impl PluginRegistry {
    /// A registry holding the built-in layouts.
    #[must_use]
    pub fn new() -> Self {
        let mut registry = Self::empty();
        let builtins: [PluginHandle; 6] = [
            Arc::new(FlattenTransformer),
            Arc::new(LayerWeightedTransformer),
            Arc::new(SpiralTransformer),
            Arc::new(NormalizedTransformer),
            Arc::new(LayerSeparatedTransformer::default()),
            Arc::new(ConvKernelsTransformer::default()),
        ];
        registry.plugins.extend(builtins);
        registry
    }

    /// Built-ins plus, when `auto_load_plugins` is set, every manifest in
    /// the configured plugin directory. A missing directory is not an error.
    ///
    /// # Errors
    ///
    /// Returns [`GridError::PluginLoad`] if the directory exists but cannot be read.
    pub fn from_config(config: &EngineConfig) -> Result<Self> {
        let mut registry = Self::new();
        match (&config.plugin_directory, config.auto_load_plugins) {
            (Some(dir), true) if dir.is_dir() => {
                let outcome = registry.load_from_directory(dir)?;
                tracing::info!(
                    "Plugin directory {:?}: {} loaded, {} failed",
                    dir,
                    outcome.registered.len(),
                    outcome.failed.len()
                );
            }
            (Some(dir), true) => tracing::debug!("Plugin directory {:?} does not exist", dir),
            _ => {}
        }
        Ok(registry)
    }

    /// A registry with no plugins at all.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Register a plugin.
    ///
    /// # Errors
    ///
    /// Returns [`GridError::DuplicateName`] if the name is taken. Built-ins
    /// cannot be shadowed this way.
    pub fn register(&mut self, plugin: impl TransformerPlugin + 'static) -> Result<()> {
        self.register_shared(Arc::new(plugin))
    }

    /// Register an already shared plugin.
    ///
    /// # Errors
    ///
    /// Returns [`GridError::DuplicateName`] if the name is taken.
    pub fn register_shared(&mut self, plugin: PluginHandle) -> Result<()> {
        if self.contains(plugin.name()) {
            return Err(GridError::DuplicateName(plugin.name().to_string()));
        }
        tracing::info!("Registered plugin: {}", plugin.name());
        self.plugins.push(plugin);
        Ok(())
    }

    /// Remove a plugin and return it.
    ///
    /// # Errors
    ///
    /// Returns [`GridError::UnknownPlugin`] if absent.
    pub fn unregister(&mut self, name: &str) -> Result<PluginHandle> {
        let idx = self
            .plugins
            .iter()
            .position(|p| p.name() == name)
            .ok_or_else(|| GridError::UnknownPlugin(name.to_string()))?;
        Ok(self.plugins.remove(idx))
    }

    /// Resolve a plugin by name.
    ///
    /// # Errors
    ///
    /// Returns [`GridError::UnknownPlugin`] if absent.
    pub fn get(&self, name: &str) -> Result<PluginHandle> {
        self.plugins
            .iter()
            .find(|p| p.name() == name)
            .cloned()
            .ok_or_else(|| GridError::UnknownPlugin(name.to_string()))
    }

    /// Whether a plugin with this name is registered.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.plugins.iter().any(|p| p.name() == name)
    }

    /// Plugin names in registration order, built-ins first.
    #[must_use]
    pub fn list(&self) -> Vec<&str> {
        self.plugins.iter().map(|p| p.name()).collect()
    }

    /// Description of a plugin.
    ///
    /// # Errors
    ///
    /// Returns [`GridError::UnknownPlugin`] if absent.
    pub fn describe(&self, name: &str) -> Result<String> {
        Ok(self.get(name)?.description().to_string())
    }

    /// Number of registered plugins.
    #[must_use]
    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    /// Whether no plugins are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }

    /// First plugin, in registration order, that accepts the collection.
    #[must_use]
    pub fn find_compatible(&self, tensors: &TensorCollection) -> Option<PluginHandle> {
        self.plugins.iter().find(|p| p.can_handle(tensors)).cloned()
    }

    /// Resolve a plugin and run its full pipeline on the collection.
    ///
    /// # Errors
    ///
    /// Returns [`GridError::UnknownPlugin`] if absent, or the pipeline's
    /// [`GridError::Transform`].
    pub fn transform(&self, name: &str, tensors: &TensorCollection) -> Result<Grid> {
        let plugin = self.get(name)?;
        run_pipeline(plugin.as_ref(), tensors)
    }

    /// Load and register every plugin defined in a manifest file.
    ///
    /// The whole manifest is parsed and validated, and every name checked
    /// against the registry, before anything is registered. On any failure
    /// the registry is left exactly as it was.
    ///
    /// Manifests are declarative, so no code from the file runs. The source
    /// is still trusted to name plugins sensibly; load only files you control.
    ///
    /// # Errors
    ///
    /// Returns [`GridError::PluginLoad`] with the locator and cause.
    pub fn load_from_external_source<P: AsRef<Path>>(&mut self, locator: P) -> Result<Vec<String>> {
        let locator = locator.as_ref();
        let manifest = PluginManifest::from_file(locator)?;
        let names = self.register_manifest(manifest, &locator.display().to_string())?;
        if names.is_empty() {
            tracing::warn!("No plugins found in {:?}", locator);
        } else {
            tracing::info!("Loaded {} plugin(s) from {:?}", names.len(), locator);
        }
        Ok(names)
    }

    /// Register every plugin of an already parsed manifest, atomically.
    ///
    /// # Errors
    ///
    /// Returns [`GridError::PluginLoad`] if validation fails or any name is taken.
    pub fn register_manifest(&mut self, manifest: PluginManifest, locator: &str) -> Result<Vec<String>> {
        manifest
            .validate()
            .map_err(|reason| GridError::plugin_load(locator, reason))?;
        if let Some(taken) = manifest.plugins.iter().find(|d| self.contains(&d.name)) {
            return Err(GridError::plugin_load(
                locator,
                GridError::DuplicateName(taken.name.clone()),
            ));
        }

        let plugins = manifest.into_plugins();
        let names: Vec<String> = plugins.iter().map(|p| p.name().to_string()).collect();
        for plugin in plugins {
            tracing::info!("Registered plugin: {}", plugin.name());
            self.plugins.push(Arc::new(plugin));
        }
        Ok(names)
    }

    /// Load every manifest in a directory.
    ///
    /// Reads `*.yaml`, `*.yml` and `*.json` files whose names do not start
    /// with `_`, in filename order. A failing file is logged and recorded in
    /// [`DirectoryLoad::failed`]; the remaining files still load.
    ///
    /// # Errors
    ///
    /// Returns [`GridError::PluginLoad`] if the directory cannot be read.
    pub fn load_from_directory<P: AsRef<Path>>(&mut self, directory: P) -> Result<DirectoryLoad> {
        let directory = directory.as_ref();
        if !directory.is_dir() {
            return Err(GridError::plugin_load(directory.display(), "not a directory"));
        }

        let entries = std::fs::read_dir(directory).map_err(|e| GridError::plugin_load(directory.display(), e))?;
        let mut files: Vec<PathBuf> = entries
            .filter_map(std::result::Result::ok)
            .map(|entry| entry.path())
            .filter(|path| is_manifest_file(path))
            .collect();
        files.sort();

        let mut outcome = DirectoryLoad::default();
        for file in files {
            match self.load_from_external_source(&file) {
                Ok(names) => outcome.registered.extend(names),
                Err(e) => {
                    tracing::warn!("Could not load plugins from {:?}: {}", file, e);
                    outcome.failed.push((file, e));
                }
            }
        }
        Ok(outcome)
    }
}

fn is_manifest_file(path: &Path) -> bool {
    let hidden = path
        .file_name()
        .and_then(|n| n.to_str())
        .map_or(true, |n| n.starts_with('_'));
    let manifest_ext = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| matches!(e.to_ascii_lowercase().as_str(), "yaml" | "yml" | "json"));
    path.is_file() && !hidden && manifest_ext
}

impl fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginRegistry")
            .field("plugins", &self.list())
            .finish()
    }
}

impl fmt::Display for PluginRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PluginRegistry({} plugins)", self.plugins.len())
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::TempDir;

    use super::*;
    use crate::tensor::Tensor;

    struct Reversed;

    impl TransformerPlugin for Reversed {
        fn name(&self) -> &str {
            "reversed"
        }

        fn transform(&self, tensors: &TensorCollection) -> Result<Grid> {
            let mut values = tensors.concat_values();
            values.reverse();
            Ok(Grid::from_vec(1, values.len(), values).unwrap_or_else(Grid::empty))
        }
    }

    struct FourDOnly;

    impl TransformerPlugin for FourDOnly {
        fn name(&self) -> &str {
            "conv_only"
        }

        fn can_handle(&self, tensors: &TensorCollection) -> bool {
            tensors.iter().any(|t| t.ndim() == 4)
        }

        fn transform(&self, _tensors: &TensorCollection) -> Result<Grid> {
            Ok(Grid::empty())
        }
    }

    fn sample() -> TensorCollection {
        TensorCollection::from_tensors([Tensor::from_vec("w", vec![1.0, 2.0, 3.0])]).unwrap()
    }

    #[test]
    fn test_builtins_listed_in_order() {
        let registry = PluginRegistry::new();
        assert_eq!(
            registry.list(),
            vec![
                "flatten",
                "layer_weighted",
                "spiral",
                "normalized",
                "layer_separated",
                "conv_kernels"
            ]
        );
        assert_eq!(registry.to_string(), "PluginRegistry(6 plugins)");
    }

    #[test]
    fn test_register_then_get() {
        let mut registry = PluginRegistry::new();
        registry.register(Reversed).unwrap();
        assert_eq!(registry.list().last(), Some(&"reversed"));

        let plugin = registry.get("reversed").unwrap();
        assert_eq!(plugin.name(), "reversed");
        assert_eq!(registry.describe("reversed").unwrap(), "Custom transformer plugin");
    }

    #[test]
    fn test_register_shared_returns_same_instance() {
        let mut registry = PluginRegistry::empty();
        let handle: PluginHandle = Arc::new(Reversed);
        registry.register_shared(Arc::clone(&handle)).unwrap();
        assert!(Arc::ptr_eq(&registry.get("reversed").unwrap(), &handle));
    }

    #[test]
    fn test_duplicate_name_rejected() {
        let mut registry = PluginRegistry::new();
        let err = registry.register(FlattenTransformer).unwrap_err();
        assert!(matches!(err, GridError::DuplicateName(name) if name == "flatten"));
        assert_eq!(registry.len(), 6);
    }

    #[test]
    fn test_unknown_plugin() {
        let registry = PluginRegistry::new();
        assert!(matches!(registry.get("nope"), Err(GridError::UnknownPlugin(_))));
        assert!(matches!(
            registry.transform("nope", &sample()),
            Err(GridError::UnknownPlugin(_))
        ));
    }

    #[test]
    fn test_unregister() {
        let mut registry = PluginRegistry::new();
        let removed = registry.unregister("spiral").unwrap();
        assert_eq!(removed.name(), "spiral");
        assert!(!registry.contains("spiral"));
        assert!(registry.unregister("spiral").is_err());
    }

    #[test]
    fn test_find_compatible_skips_incompatible() {
        let mut registry = PluginRegistry::empty();
        registry.register(FourDOnly).unwrap();
        registry.register(Reversed).unwrap();
        let chosen = registry.find_compatible(&sample()).unwrap();
        assert_eq!(chosen.name(), "reversed");
    }

    #[test]
    fn test_find_compatible_conv_builtin() {
        let mut registry = PluginRegistry::new();
        for name in ["flatten", "layer_weighted", "spiral", "normalized", "layer_separated"] {
            registry.unregister(name).unwrap();
        }
        assert!(registry.find_compatible(&sample()).is_none());

        let conv = TensorCollection::from_tensors([
            Tensor::new("conv.weight", vec![1, 1, 2, 2], vec![0.0, 1.0, 2.0, 3.0]).unwrap(),
        ])
        .unwrap();
        assert_eq!(registry.find_compatible(&conv).unwrap().name(), "conv_kernels");
    }

    #[test]
    fn test_transform_by_name() {
        let mut registry = PluginRegistry::new();
        registry.register(Reversed).unwrap();
        let grid = registry.transform("reversed", &sample()).unwrap();
        assert_eq!(grid.as_slice(), &[3.0, 2.0, 1.0]);
    }

    #[test]
    fn test_load_from_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("extra.yaml");
        fs::write(
            &path,
            "plugins:\n  - name: reversed\n    layout: reversed\n  - name: columns\n    layout: column_major\n",
        )
        .unwrap();

        let mut registry = PluginRegistry::new();
        let names = registry.load_from_external_source(&path).unwrap();
        assert_eq!(names, vec!["reversed", "columns"]);
        assert_eq!(registry.len(), 8);
    }

    #[test]
    fn test_failed_load_leaves_registry_unchanged() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("clash.yaml");
        // second plugin collides with a built-in
        fs::write(
            &path,
            "plugins:\n  - name: fresh\n    layout: reversed\n  - name: spiral\n    layout: spiral\n",
        )
        .unwrap();

        let mut registry = PluginRegistry::new();
        let before = registry.list().iter().map(ToString::to_string).collect::<Vec<_>>();
        let err = registry.load_from_external_source(&path).unwrap_err();
        assert!(matches!(err, GridError::PluginLoad { .. }));
        assert!(err.to_string().contains("spiral"));
        assert_eq!(registry.list(), before);
    }

    #[test]
    fn test_missing_file() {
        let mut registry = PluginRegistry::new();
        let err = registry
            .load_from_external_source("/nonexistent/plugins.yaml")
            .unwrap_err();
        assert!(matches!(err, GridError::PluginLoad { .. }));
    }

    #[test]
    fn test_load_from_directory() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("a.yaml"), "plugins:\n  - name: a_rev\n    layout: reversed\n").unwrap();
        fs::write(dir.path().join("b.json"), r#"{"plugins": [{"name": "b_col", "layout": "column_major"}]}"#).unwrap();
        fs::write(dir.path().join("c.yaml"), "plugins: [oops").unwrap();
        fs::write(dir.path().join("_skip.yaml"), "plugins:\n  - name: hidden\n    layout: spiral\n").unwrap();
        fs::write(dir.path().join("notes.txt"), "not a manifest").unwrap();

        let mut registry = PluginRegistry::new();
        let outcome = registry.load_from_directory(dir.path()).unwrap();
        assert_eq!(outcome.registered, vec!["a_rev", "b_col"]);
        assert_eq!(outcome.failed.len(), 1);
        assert!(outcome.failed[0].0.ends_with("c.yaml"));
        assert!(!registry.contains("hidden"));
    }

    #[test]
    fn test_from_config_loads_directory() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("p.yaml"), "plugins:\n  - name: mirrored\n    layout: reversed\n").unwrap();

        let config = EngineConfig::default().with_plugin_directory(dir.path());
        assert!(PluginRegistry::from_config(&config).unwrap().contains("mirrored"));

        let disabled = config.with_auto_load_plugins(false);
        assert_eq!(PluginRegistry::from_config(&disabled).unwrap().len(), 6);

        let missing = EngineConfig::default().with_plugin_directory(dir.path().join("absent"));
        assert_eq!(PluginRegistry::from_config(&missing).unwrap().len(), 6);
    }

    #[test]
    fn test_load_from_directory_rejects_file() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("x.yaml");
        fs::write(&file, "plugins: []").unwrap();
        let mut registry = PluginRegistry::new();
        assert!(registry.load_from_directory(&file).is_err());
    }
}
